//! Raw probe statistics, independent of the debounce thresholds

use crate::probe::ProbeResult;
use std::collections::{HashMap, VecDeque};

/// Per-host counters plus a bounded window of recent results
#[derive(Debug, Clone)]
pub struct HostStats {
    total: u64,
    successes: u64,
    recent: VecDeque<ProbeResult>,
}

impl HostStats {
    fn new() -> Self {
        Self {
            total: 0,
            successes: 0,
            recent: VecDeque::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn success_rate(&self) -> f64 {
        if self.total > 0 {
            self.successes as f64 * 100.0 / self.total as f64
        } else {
            0.0
        }
    }

    pub fn last(&self) -> Option<&ProbeResult> {
        self.recent.back()
    }
}

/// Running totals across the whole run
#[derive(Debug, Clone)]
pub struct ResultAggregator {
    hosts: HashMap<String, HostStats>,
    capacity: usize,
}

impl ResultAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            hosts: HashMap::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn record(&mut self, result: &ProbeResult) {
        let stats = self
            .hosts
            .entry(result.host.clone())
            .or_insert_with(HostStats::new);

        stats.total += 1;
        if result.success {
            stats.successes += 1;
        }

        if stats.recent.len() >= self.capacity {
            stats.recent.pop_front();
        }
        stats.recent.push_back(result.clone());
    }

    /// Success percentage over the whole run; 0 for hosts never probed
    pub fn success_rate(&self, host: &str) -> f64 {
        self.hosts.get(host).map_or(0.0, HostStats::success_rate)
    }

    pub fn last_result(&self, host: &str) -> Option<&ProbeResult> {
        self.hosts.get(host).and_then(HostStats::last)
    }

    pub fn last_status(&self, host: &str) -> Option<bool> {
        self.last_result(host).map(|r| r.success)
    }

    /// Recent results, oldest first
    pub fn recent(&self, host: &str) -> impl Iterator<Item = &ProbeResult> {
        self.hosts.get(host).into_iter().flat_map(|s| s.recent.iter())
    }

    pub fn stats(&self, host: &str) -> Option<&HostStats> {
        self.hosts.get(host)
    }

    pub fn summary(&self) -> AggregateSummary {
        let hosts = self.hosts.len();
        let total: u64 = self.hosts.values().map(|s| s.total).sum();
        let successes: u64 = self.hosts.values().map(|s| s.successes).sum();
        let reachable = self
            .hosts
            .values()
            .filter(|s| s.last().is_some_and(|r| r.success))
            .count();

        AggregateSummary {
            hosts,
            reachable,
            total_probes: total,
            success_rate: if total > 0 {
                successes as f64 * 100.0 / total as f64
            } else {
                0.0
            },
        }
    }

    pub fn clear(&mut self) {
        for stats in self.hosts.values_mut() {
            stats.recent.clear();
        }
        self.hosts.clear();
    }
}

/// Snapshot across every host
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSummary {
    pub hosts: usize,
    pub reachable: usize,
    pub total_probes: u64,
    pub success_rate: f64,
}
