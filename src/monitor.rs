//! Main monitor loop orchestrating sweeps, debounce, rendering and output

use crate::aggregator::ResultAggregator;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::errors::{MonitorError, Result};
use crate::groups::HostGroups;
use crate::probe::{ProbeResult, Prober};
use crate::render::{FrameInput, Renderer};
use crate::resolver::HostResolver;
use crate::shutdown::Shutdown;
use crate::sink::{Frame, FrameSink};
use crate::state::{HostStateTable, HostStatus, Transition};
use chrono::Local;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Waits out the interval between the end of one sweep and the start of the next
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    poll_step: Duration,
    baseline: Instant,
}

impl Cadence {
    pub fn new(interval: Duration, poll_step: Duration) -> Self {
        Self {
            interval,
            poll_step,
            baseline: Instant::now(),
        }
    }

    /// Restart the interval from now
    pub fn rearm(&mut self) {
        self.baseline = Instant::now();
    }

    pub fn remaining(&self) -> Duration {
        self.interval.saturating_sub(self.baseline.elapsed())
    }

    /// Poll until the interval has elapsed; `false` if shutdown came first
    pub async fn wait(&self, shutdown: &mut Shutdown) -> bool {
        loop {
            if shutdown.is_triggered() {
                return false;
            }

            let remaining = self.remaining();
            if remaining.is_zero() {
                return true;
            }

            tokio::select! {
                _ = shutdown.triggered() => return false,
                _ = sleep(remaining.min(self.poll_step)) => {}
            }
        }
    }
}

/// A host whose debounced status changed during a cycle
#[derive(Debug, Clone, PartialEq)]
pub struct HostChange {
    pub host: String,
    pub transition: Transition,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub probed: usize,
    pub reachable: usize,
    pub changed: Vec<HostChange>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

pub struct PingMonitor {
    config: Config,
    groups: HostGroups,
    hosts: Vec<String>,
    dispatcher: Dispatcher,
    states: HostStateTable,
    stats: ResultAggregator,
    renderer: Renderer,
    sink: Box<dyn FrameSink>,
    monitor_id: String,
    cycle: u64,
}

impl PingMonitor {
    pub fn new(
        config: Config,
        groups: HostGroups,
        prober: Arc<dyn Prober>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self> {
        config.validate().map_err(MonitorError::Config)?;

        let hosts = groups.hosts();
        if hosts.is_empty() {
            return Err(MonitorError::GroupFile("no hosts to monitor".to_string()));
        }

        let dispatcher = Dispatcher::new(
            prober,
            config.max_in_flight,
            config.settings.batch_size(),
            config.batch_pause,
        )
        .with_resolver(HostResolver::new(LOOKUP_TIMEOUT));

        Ok(Self {
            states: HostStateTable::new(hosts.iter().map(String::as_str), config.history_slots),
            stats: ResultAggregator::new(config.result_cache_capacity),
            renderer: Renderer::new(config.history_slots),
            monitor_id: Uuid::new_v4().to_string(),
            cycle: 0,
            config,
            groups,
            hosts,
            dispatcher,
            sink,
        })
    }

    pub fn monitor_id(&self) -> &str {
        &self.monitor_id
    }

    pub fn states(&self) -> &HostStateTable {
        &self.states
    }

    pub fn stats(&self) -> &ResultAggregator {
        &self.stats
    }

    /// Sweep, wait, repeat until shutdown is requested
    #[instrument(skip_all, fields(monitor_id = %self.monitor_id))]
    pub async fn run(&mut self, mut shutdown: Shutdown) -> Result<()> {
        info!(
            "Starting monitor for {} hosts with {} backend (interval {}s, failure {}, recovery {})",
            self.hosts.len(),
            self.dispatcher.prober_name(),
            self.config.settings.interval_secs(),
            self.config.settings.failure_threshold(),
            self.config.settings.recovery_threshold()
        );

        if self.config.preresolve_hosts {
            let interrupted = tokio::select! {
                biased;
                _ = shutdown.triggered() => true,
                _ = self.dispatcher.resolver_mut().preload(&self.hosts) => false,
            };
            if interrupted {
                info!("Shutdown requested during name pre-resolution");
                self.shutdown();
                return Ok(());
            }
        }

        let mut cadence = Cadence::new(self.config.settings.interval(), self.config.poll_step);

        loop {
            let report = self.run_cycle(&shutdown).await;
            if report.cancelled {
                break;
            }

            cadence.rearm();
            if !cadence.wait(&mut shutdown).await {
                break;
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One sweep plus result processing and frame emission.
    ///
    /// A cancelled sweep is discarded without touching host state.
    pub async fn run_cycle(&mut self, shutdown: &Shutdown) -> CycleReport {
        let sweep = self.dispatcher.sweep(&self.hosts, shutdown).await;

        if sweep.cancelled {
            info!(
                "Sweep cancelled after {} of {} probes",
                sweep.results.len(),
                self.hosts.len()
            );
            return CycleReport {
                cycle: self.cycle,
                probed: sweep.results.len(),
                reachable: sweep.reachable(),
                changed: Vec::new(),
                cancelled: true,
                elapsed: sweep.elapsed,
            };
        }

        self.cycle += 1;
        let changed = self.apply_results(&sweep.results);
        let reachable = sweep.reachable();
        let now = Local::now();

        let text = self.renderer.render(&FrameInput {
            now,
            settings: &self.config.settings,
            groups: &self.groups,
            states: &self.states,
            results: &sweep.results,
        });

        let frame = Frame {
            monitor_id: self.monitor_id.clone(),
            cycle: self.cycle,
            rendered_at: now,
            hosts_total: sweep.results.len(),
            hosts_up: reachable,
            text,
        };

        // A pending push must not hold up shutdown; the loop stops at the next wait
        let mut stop = shutdown.clone();
        let emitted = tokio::select! {
            biased;
            _ = stop.triggered() => None,
            result = self.sink.emit(&frame) => Some(result),
        };
        match emitted {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                warn!("Failed to emit frame {} to {} sink: {}", self.cycle, self.sink.name(), e)
            }
            None => info!("Frame {} abandoned on shutdown", self.cycle),
        }

        let summary = self.stats.summary();
        debug!(
            "Cycle {} done in {}ms: {}/{} reachable, {} down, {} changed, {:.1}% lifetime success",
            self.cycle,
            sweep.elapsed.as_millis(),
            reachable,
            sweep.results.len(),
            self.states.count(HostStatus::Down),
            changed.len(),
            summary.success_rate
        );

        CycleReport {
            cycle: self.cycle,
            probed: sweep.results.len(),
            reachable,
            changed,
            cancelled: false,
            elapsed: sweep.elapsed,
        }
    }

    /// Feed results to the statistics and the debounce state in one pass
    pub fn apply_results(&mut self, results: &[ProbeResult]) -> Vec<HostChange> {
        let mut changed = Vec::new();

        for result in results {
            self.stats.record(result);

            let Some(transition) = self.states.apply(result, &self.config.settings) else {
                continue;
            };

            match transition {
                Transition::Down { at } => warn!(
                    "Host {} is DOWN since {} ({:.1}% lifetime success)",
                    result.host,
                    at.format("%H:%M:%S"),
                    self.stats.success_rate(&result.host)
                ),
                Transition::Up { at } => info!(
                    "Host {} recovered at {}",
                    result.host,
                    at.format("%H:%M:%S")
                ),
                Transition::FirstUp => debug!("Host {} is up", result.host),
            }

            changed.push(HostChange {
                host: result.host.clone(),
                transition,
            });
        }

        changed
    }

    fn shutdown(&mut self) {
        info!(
            "Stopping monitor after {} cycles ({} hosts down)",
            self.cycle,
            self.states.count(HostStatus::Down)
        );

        self.stats.clear();
        self.states.clear();
        self.dispatcher.resolver_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::ProbeOutcome;
    use crate::shutdown;
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    /// Replays a fixed outcome script per host; succeeds once a script runs out
    struct ScriptedProber {
        scripts: Mutex<HashMap<String, VecDeque<bool>>>,
        delay: Duration,
    }

    impl ScriptedProber {
        fn new(scripts: &[(&str, &[bool])], delay: Duration) -> Self {
            Self {
                scripts: Mutex::new(
                    scripts
                        .iter()
                        .map(|(h, s)| (h.to_string(), s.iter().copied().collect()))
                        .collect(),
                ),
                delay,
            }
        }
    }

    #[async_trait]
    impl Prober for ScriptedProber {
        async fn probe(&self, target: &str) -> ProbeOutcome {
            if !self.delay.is_zero() {
                sleep(self.delay).await;
            }

            let next = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(target)
                .and_then(|s| s.pop_front())
                .unwrap_or(true);

            if next {
                ProbeOutcome::reachable(0.8)
            } else {
                ProbeOutcome::unreachable()
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    #[derive(Clone, Default)]
    struct CollectingSink {
        frames: Arc<Mutex<Vec<Frame>>>,
    }

    #[async_trait]
    impl FrameSink for CollectingSink {
        async fn emit(&self, frame: &Frame) -> Result<()> {
            self.frames.lock().unwrap().push(frame.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "collecting"
        }
    }

    /// Never finishes a push within a test's patience
    struct StalledSink;

    #[async_trait]
    impl FrameSink for StalledSink {
        async fn emit(&self, _frame: &Frame) -> Result<()> {
            sleep(Duration::from_secs(3)).await;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    fn test_config(failure: u32, recovery: u32) -> Config {
        let mut config = Config::default();
        config.settings = crate::config::MonitorSettings::new(1, failure, recovery, 500).unwrap();
        config.preresolve_hosts = false;
        config.batch_pause = Duration::ZERO;
        config.poll_step = Duration::from_millis(10);
        config
    }

    fn monitor(
        config: Config,
        groups: &str,
        prober: ScriptedProber,
    ) -> (PingMonitor, CollectingSink) {
        let sink = CollectingSink::default();
        let monitor = PingMonitor::new(
            config,
            HostGroups::parse(groups),
            Arc::new(prober),
            Box::new(sink.clone()),
        )
        .unwrap();
        (monitor, sink)
    }

    #[tokio::test]
    async fn test_cycles_debounce_and_emit_frames() {
        let prober = ScriptedProber::new(
            &[("10.0.0.1", &[true, false, false, true, true]), ("10.0.0.2", &[])],
            Duration::ZERO,
        );
        let groups = "[core]\n10.0.0.1\n10.0.0.2\n";
        let (mut monitor, sink) = monitor(test_config(2, 2), groups, prober);
        let (_trigger, shutdown) = shutdown::channel();

        let mut changes = Vec::new();
        for _ in 0..5 {
            let report = monitor.run_cycle(&shutdown).await;
            assert!(!report.cancelled);
            assert_eq!(report.probed, 2);
            changes.push(report.changed);
        }

        assert_eq!(changes[0].len(), 2);
        assert!(changes[1].is_empty());
        assert!(matches!(changes[2][0].transition, Transition::Down { .. }));
        assert!(changes[3].is_empty());
        assert!(matches!(changes[4][0].transition, Transition::Up { .. }));

        let state = monitor.states().get("10.0.0.1").unwrap();
        assert_eq!(state.status(), HostStatus::Up);
        assert_eq!(state.history().cursor(), 1);
        assert_eq!(monitor.stats().success_rate("10.0.0.1"), 60.0);

        let frames = sink.frames.lock().unwrap();
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[2].hosts_up, 1);
        assert_eq!(frames[4].cycle, 5);
        assert!(frames[2].text.contains("Group reachability: 1/2 (50.0%)"));
    }

    #[tokio::test]
    async fn test_run_exits_when_shutdown_arrives_between_sweeps() {
        let prober = ScriptedProber::new(&[], Duration::ZERO);
        let (mut monitor, sink) = monitor(test_config(3, 2), "10.0.0.1\n", prober);
        let (trigger, shutdown) = shutdown::channel();

        let handle = tokio::spawn(async move {
            monitor.run(shutdown).await.unwrap();
            monitor
        });

        sleep(Duration::from_millis(100)).await;
        trigger.trigger();

        let monitor = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("monitor should stop promptly")
            .unwrap();

        assert_eq!(sink.frames.lock().unwrap().len(), 1);
        assert!(monitor.states().is_empty());
        assert_eq!(monitor.stats().summary().hosts, 0);
    }

    #[tokio::test]
    async fn test_cancel_mid_sweep_discards_partial_results() {
        let prober = ScriptedProber::new(&[], Duration::from_millis(300));
        let mut config = test_config(3, 2);
        config.max_in_flight = 2;
        let groups: String = (1..=10).map(|i| format!("10.0.0.{}\n", i)).collect();
        let (mut monitor, sink) = monitor(config, &groups, prober);
        let (trigger, shutdown) = shutdown::channel();

        let started = Instant::now();
        let handle = tokio::spawn(async move { monitor.run(shutdown).await });

        sleep(Duration::from_millis(50)).await;
        trigger.trigger();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("cancellation should finish within one probe timeout")
            .unwrap()
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(800));
        assert!(sink.frames.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_abandons_slow_frame_push() {
        let mut monitor = PingMonitor::new(
            test_config(3, 2),
            HostGroups::parse("10.0.0.1\n"),
            Arc::new(ScriptedProber::new(&[], Duration::ZERO)),
            Box::new(StalledSink),
        )
        .unwrap();
        let (trigger, shutdown) = shutdown::channel();

        let handle = tokio::spawn(async move {
            monitor.run(shutdown).await.unwrap();
            monitor
        });

        sleep(Duration::from_millis(100)).await;
        let triggered_at = Instant::now();
        trigger.trigger();

        let monitor = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor should not wait for the push")
            .unwrap();

        assert!(triggered_at.elapsed() < Duration::from_millis(700));
        assert!(monitor.states().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_skips_name_pre_resolution() {
        let mut config = test_config(3, 2);
        config.preresolve_hosts = true;
        let (mut monitor, sink) = monitor(
            config,
            "localhost\n",
            ScriptedProber::new(&[], Duration::ZERO),
        );
        let (trigger, shutdown) = shutdown::channel();
        trigger.trigger();

        let handle = tokio::spawn(async move {
            monitor.run(shutdown).await.unwrap();
            monitor
        });

        let monitor = tokio::time::timeout(Duration::from_millis(500), handle)
            .await
            .expect("monitor should stop before resolving names")
            .unwrap();

        assert!(sink.frames.lock().unwrap().is_empty());
        assert!(monitor.states().is_empty());
    }

    #[test]
    fn test_apply_results_keeps_views_consistent() {
        let prober = ScriptedProber::new(&[], Duration::ZERO);
        let (mut monitor, _sink) = monitor(test_config(1, 1), "10.0.0.1\n", prober);
        let now = Local::now();

        monitor.apply_results(&[ProbeResult::unreachable("10.0.0.1", now)]);

        assert_eq!(monitor.stats().last_status("10.0.0.1"), Some(false));
        assert_eq!(monitor.states().get("10.0.0.1").unwrap().status(), HostStatus::Down);
    }

    #[test]
    fn test_new_rejects_empty_groups() {
        let result = PingMonitor::new(
            test_config(3, 2),
            HostGroups::parse("[empty]\n"),
            Arc::new(ScriptedProber::new(&[], Duration::ZERO)),
            Box::new(CollectingSink::default()),
        );
        assert!(matches!(result, Err(MonitorError::GroupFile(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_waits_full_interval_from_rearm() {
        let (_trigger, mut shutdown) = shutdown::channel();
        let mut cadence = Cadence::new(Duration::from_secs(5), Duration::from_millis(100));

        sleep(Duration::from_secs(3)).await;
        cadence.rearm();
        assert_eq!(cadence.remaining(), Duration::from_secs(5));

        let started = Instant::now();
        assert!(cadence.wait(&mut shutdown).await);
        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(started.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_wait_stops_on_shutdown() {
        let (trigger, mut shutdown) = shutdown::channel();
        let cadence = Cadence::new(Duration::from_secs(60), Duration::from_millis(100));

        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            trigger.trigger();
        });

        let started = Instant::now();
        assert!(!cadence.wait(&mut shutdown).await);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
