//! Raw ICMP echo backend built on `surge-ping`

use crate::errors::{MonitorError, Result};
use crate::probe::{pre_probe_jitter, ProbeOutcome, Prober};
use crate::resolver::resolve_ip;
use async_trait::async_trait;
use std::time::Duration;
use surge_ping::{Client, Config as PingConfig, ICMP, PingIdentifier, PingSequence};
use tokio::time::timeout;
use tracing::info;

const PAYLOAD: [u8; 56] = [0; 56];

pub struct IcmpProber {
    v4: Client,
    v6: Client,
    timeout: Duration,
    jitter_ms: u64,
}

impl IcmpProber {
    /// Open one ICMP socket per address family; needs raw socket privileges
    /// or an unprivileged ping group on Linux.
    pub fn new(timeout: Duration, jitter_ms: u64) -> Result<Self> {
        let v4 = Client::new(&PingConfig::default())
            .map_err(|e| MonitorError::Probe(format!("cannot open ICMPv4 socket: {}", e)))?;
        let v6 = Client::new(&PingConfig::builder().kind(ICMP::V6).build())
            .map_err(|e| MonitorError::Probe(format!("cannot open ICMPv6 socket: {}", e)))?;

        info!("ICMP probe backend ready");

        Ok(Self {
            v4,
            v6,
            timeout,
            jitter_ms,
        })
    }

    async fn echo(&self, target: &str) -> ProbeOutcome {
        let Some(ip) = resolve_ip(target, self.timeout).await else {
            return ProbeOutcome::unreachable();
        };

        let client = if ip.is_ipv4() { &self.v4 } else { &self.v6 };
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout);

        match pinger.ping(PingSequence(0), &PAYLOAD).await {
            Ok((_, rtt)) => ProbeOutcome::reachable(rtt.as_secs_f64() * 1000.0),
            Err(_) => ProbeOutcome::unreachable(),
        }
    }
}

#[async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, target: &str) -> ProbeOutcome {
        pre_probe_jitter(self.jitter_ms).await;

        timeout(self.timeout, self.echo(target))
            .await
            .unwrap_or_else(|_| ProbeOutcome::unreachable())
    }

    fn name(&self) -> &'static str {
        "icmp"
    }
}
