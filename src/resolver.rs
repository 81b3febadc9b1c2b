//! One-shot DNS pre-resolution so sweeps do not pay for name lookups

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tracing::{debug, info};

const LOOKUP_CONCURRENCY: usize = 64;

/// Resolve a host name to a single address, preferring IPv4
pub async fn resolve_ip(host: &str, deadline: Duration) -> Option<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Some(ip);
    }

    let addrs: Vec<IpAddr> = match timeout(deadline, lookup_host((host, 0))).await {
        Ok(Ok(addrs)) => addrs.map(|a| a.ip()).collect(),
        Ok(Err(e)) => {
            debug!("Lookup for {} failed: {}", host, e);
            return None;
        }
        Err(_) => {
            debug!("Lookup for {} timed out", host);
            return None;
        }
    };

    addrs
        .iter()
        .find(|ip| ip.is_ipv4())
        .or_else(|| addrs.first())
        .copied()
}

/// Host name to probe target cache
#[derive(Debug, Clone, Default)]
pub struct HostResolver {
    cache: HashMap<String, String>,
    lookup_timeout: Duration,
}

impl HostResolver {
    pub fn new(lookup_timeout: Duration) -> Self {
        Self {
            cache: HashMap::new(),
            lookup_timeout,
        }
    }

    /// Resolve every name that is not already an IP literal.
    ///
    /// Names that fail to resolve are left out and probed as written.
    pub async fn preload(&mut self, hosts: &[String]) -> usize {
        let lookup_timeout = self.lookup_timeout;
        let names: Vec<String> = hosts
            .iter()
            .filter(|h| h.parse::<IpAddr>().is_err() && !self.cache.contains_key(*h))
            .cloned()
            .collect();

        let resolved: Vec<(String, IpAddr)> = stream::iter(names)
            .map(move |host| async move {
                let ip = resolve_ip(&host, lookup_timeout).await?;
                Some((host, ip))
            })
            .buffer_unordered(LOOKUP_CONCURRENCY)
            .filter_map(|entry| async move { entry })
            .collect()
            .await;

        let count = resolved.len();
        for (host, ip) in resolved {
            self.cache.insert(host, ip.to_string());
        }

        if count > 0 {
            info!("Pre-resolved {} host names", count);
        }
        count
    }

    /// Address to probe for `host`
    pub fn target<'a>(&'a self, host: &'a str) -> &'a str {
        self.cache.get(host).map(String::as_str).unwrap_or(host)
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}
