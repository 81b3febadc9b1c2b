//! Bounded-concurrency probe dispatch
//!
//! A sweep is split into waves of `batch_size` hosts. Every probe in a wave
//! is issued before any result is awaited; a fair semaphore caps how many
//! run at once.

use crate::probe::{ProbeResult, Prober};
use crate::resolver::HostResolver;
use crate::shutdown::Shutdown;
use chrono::Local;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, instrument};

/// Results of one sweep
#[derive(Debug, Clone)]
pub struct SweepReport {
    pub results: Vec<ProbeResult>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl SweepReport {
    pub fn reachable(&self) -> usize {
        self.results.iter().filter(|r| r.success).count()
    }
}

pub struct Dispatcher {
    prober: Arc<dyn Prober>,
    resolver: HostResolver,
    gate: Arc<Semaphore>,
    max_in_flight: usize,
    batch_size: usize,
    batch_pause: Duration,
}

impl Dispatcher {
    pub fn new(
        prober: Arc<dyn Prober>,
        max_in_flight: usize,
        batch_size: usize,
        batch_pause: Duration,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        Self {
            prober,
            resolver: HostResolver::default(),
            gate: Arc::new(Semaphore::new(max_in_flight)),
            max_in_flight,
            batch_size: batch_size.max(1),
            batch_pause,
        }
    }

    pub fn with_resolver(mut self, resolver: HostResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn resolver_mut(&mut self) -> &mut HostResolver {
        &mut self.resolver
    }

    pub fn prober_name(&self) -> &'static str {
        self.prober.name()
    }

    /// Probes currently holding a permit
    pub fn in_flight(&self) -> usize {
        self.max_in_flight - self.gate.available_permits()
    }

    /// Probe every host once.
    ///
    /// Shutdown is honoured at wave boundaries and while a probe waits for a
    /// permit; admitted probes finish within the prober's own timeout.
    #[instrument(skip_all, fields(hosts = hosts.len()))]
    pub async fn sweep(&self, hosts: &[String], shutdown: &Shutdown) -> SweepReport {
        let started = Instant::now();
        let mut results = Vec::with_capacity(hosts.len());
        let mut cancelled = false;

        for (wave, chunk) in hosts.chunks(self.batch_size).enumerate() {
            if shutdown.is_triggered() {
                cancelled = true;
                break;
            }

            if wave > 0 && !self.batch_pause.is_zero() {
                tokio::time::sleep(self.batch_pause).await;
            }

            let mut pending: FuturesUnordered<_> = chunk
                .iter()
                .map(|host| self.probe_one(host, shutdown.clone()))
                .collect();

            while let Some(outcome) = pending.next().await {
                match outcome {
                    Some(result) => results.push(result),
                    None => cancelled = true,
                }
            }

            debug!("Wave {} finished: {} probes", wave + 1, chunk.len());
        }

        SweepReport {
            results,
            cancelled,
            elapsed: started.elapsed(),
        }
    }

    async fn probe_one(&self, host: &str, mut shutdown: Shutdown) -> Option<ProbeResult> {
        let _permit = tokio::select! {
            biased;
            _ = shutdown.triggered() => return None,
            permit = self.gate.acquire() => permit.ok()?,
        };

        let outcome = self.prober.probe(self.resolver.target(host)).await;
        Some(ProbeResult::new(host, outcome, Local::now()))
    }
}
