//! Reachability probes
//!
//! A [`Prober`] answers one question per host per sweep: did an echo come
//! back before the deadline, and how long did it take.

use crate::config::{Config, ProbeBackend};
use crate::errors::{MonitorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use rand::Rng;
use regex::Regex;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Time a terminated process group gets before SIGKILL
const KILL_GRACE: Duration = Duration::from_millis(100);

/// Raw outcome of a single probe
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeOutcome {
    pub success: bool,
    /// Round-trip time; 0 when the probe failed
    pub latency_ms: f64,
}

impl ProbeOutcome {
    pub fn reachable(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms: latency_ms.max(0.0),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            success: false,
            latency_ms: 0.0,
        }
    }
}

/// Probe outcome attributed to a host and a moment
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub host: String,
    pub success: bool,
    pub latency_ms: f64,
    pub timestamp: DateTime<Local>,
}

impl ProbeResult {
    pub fn new(host: impl Into<String>, outcome: ProbeOutcome, timestamp: DateTime<Local>) -> Self {
        Self {
            host: host.into(),
            success: outcome.success,
            latency_ms: outcome.latency_ms,
            timestamp,
        }
    }

    pub fn reachable(host: impl Into<String>, latency_ms: f64, timestamp: DateTime<Local>) -> Self {
        Self::new(host, ProbeOutcome::reachable(latency_ms), timestamp)
    }

    pub fn unreachable(host: impl Into<String>, timestamp: DateTime<Local>) -> Self {
        Self::new(host, ProbeOutcome::unreachable(), timestamp)
    }
}

/// Capability shared by every probe backend
#[async_trait]
pub trait Prober: Send + Sync {
    /// Probe `target` once; must return within the backend's timeout
    async fn probe(&self, target: &str) -> ProbeOutcome;

    fn name(&self) -> &'static str;
}

/// Probe by running the platform `ping` binary
#[derive(Debug, Clone)]
pub struct SystemPingProber {
    program: String,
    base_args: Vec<String>,
    timeout: Duration,
    jitter_ms: u64,
}

impl SystemPingProber {
    pub fn new(timeout: Duration, jitter_ms: u64) -> Self {
        let base_args: &[&str] = if cfg!(target_os = "macos") {
            &["-c", "1", "-W", "1000", "-q"]
        } else {
            &["-c", "1", "-W", "1", "-n", "-q"]
        };

        Self {
            program: "ping".to_string(),
            base_args: base_args.iter().map(|s| s.to_string()).collect(),
            timeout,
            jitter_ms,
        }
    }

    /// Use an arbitrary command; the target is appended as the last argument
    pub fn with_command(program: &str, base_args: &[&str], timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            base_args: base_args.iter().map(|s| s.to_string()).collect(),
            timeout,
            jitter_ms: 0,
        }
    }
}

#[async_trait]
impl Prober for SystemPingProber {
    async fn probe(&self, target: &str) -> ProbeOutcome {
        pre_probe_jitter(self.jitter_ms).await;

        let mut command = Command::new(&self.program);
        command.args(&self.base_args).arg(target);

        match run_bounded(command, self.timeout).await {
            Ok(CommandOutcome::Exited {
                success: true,
                stdout,
            }) => parse_average_latency(&stdout)
                .map(ProbeOutcome::reachable)
                .unwrap_or_else(ProbeOutcome::unreachable),
            Ok(CommandOutcome::Exited { .. }) => ProbeOutcome::unreachable(),
            Ok(CommandOutcome::TimedOut { pgid }) => {
                debug!(
                    "Probe of {} timed out after {:?}, process group {} terminated",
                    target, self.timeout, pgid
                );
                ProbeOutcome::unreachable()
            }
            Err(e) => {
                warn!("Failed to spawn {} for {}: {}", self.program, target, e);
                ProbeOutcome::unreachable()
            }
        }
    }

    fn name(&self) -> &'static str {
        "system"
    }
}

/// Builds the prober selected in the configuration
pub struct ProberFactory;

impl ProberFactory {
    pub fn create(config: &Config) -> Result<Arc<dyn Prober>> {
        match config.backend {
            ProbeBackend::System => Ok(Arc::new(SystemPingProber::new(
                config.probe_timeout,
                config.probe_jitter_ms,
            ))),
            ProbeBackend::Icmp => Self::create_icmp(config),
        }
    }

    #[cfg(feature = "icmp")]
    fn create_icmp(config: &Config) -> Result<Arc<dyn Prober>> {
        let prober = crate::icmp::IcmpProber::new(config.probe_timeout, config.probe_jitter_ms)?;
        Ok(Arc::new(prober))
    }

    #[cfg(not(feature = "icmp"))]
    fn create_icmp(_config: &Config) -> Result<Arc<dyn Prober>> {
        Err(MonitorError::Probe(
            "this build has no ICMP backend; rebuild with --features icmp".to_string(),
        ))
    }
}

/// Sleep a random 0..=max_ms to spread probes issued in the same tick
pub(crate) async fn pre_probe_jitter(max_ms: u64) {
    if max_ms == 0 {
        return;
    }

    let delay = rand::rng().random_range(0..=max_ms);
    tokio::time::sleep(Duration::from_millis(delay)).await;
}

/// Extract the average round-trip time from a ping summary line
pub fn parse_average_latency(output: &str) -> Option<f64> {
    static SUMMARY: OnceLock<Regex> = OnceLock::new();
    let re = SUMMARY.get_or_init(|| {
        Regex::new(r"min/avg/max\S*\s*=\s*[\d.]+/([\d.]+)/").expect("valid summary regex")
    });

    output
        .lines()
        .find_map(|line| re.captures(line))
        .and_then(|caps| caps[1].parse().ok())
}

#[derive(Debug)]
pub(crate) enum CommandOutcome {
    Exited { success: bool, stdout: String },
    TimedOut { pgid: i32 },
}

/// Run `command` in its own process group with a hard deadline.
///
/// On timeout the whole group is terminated and the child reaped before
/// returning.
pub(crate) async fn run_bounded(
    mut command: Command,
    deadline: Duration,
) -> std::io::Result<CommandOutcome> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = command.spawn()?;
    let pgid = child.id().map(|id| id as i32);
    let mut stdout = child.stdout.take();

    let run = async {
        let mut output = String::new();
        if let Some(pipe) = stdout.as_mut() {
            pipe.read_to_string(&mut output).await?;
        }
        let status = child.wait().await?;
        Ok::<_, std::io::Error>((status, output))
    };

    let finished = timeout(deadline, run).await;
    match finished {
        Ok(Ok((status, stdout))) => Ok(CommandOutcome::Exited {
            success: status.success(),
            stdout,
        }),
        Ok(Err(e)) => Err(e),
        Err(_) => {
            let pgid = pgid.unwrap_or(0);
            terminate_group(pgid, &mut child).await;
            Ok(CommandOutcome::TimedOut { pgid })
        }
    }
}

async fn terminate_group(pgid: i32, child: &mut Child) {
    if pgid > 0 {
        unsafe {
            libc::killpg(pgid, libc::SIGTERM);
        }
    }

    if timeout(KILL_GRACE, child.wait()).await.is_err() {
        if pgid > 0 {
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
        let _ = child.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_parse_linux_summary() {
        let output = "PING 10.0.0.1 (10.0.0.1) 56(84) bytes of data.\n\n\
                      --- 10.0.0.1 ping statistics ---\n\
                      1 packets transmitted, 1 received, 0% packet loss, time 0ms\n\
                      rtt min/avg/max/mdev = 0.045/0.052/0.060/0.000 ms\n";
        assert_eq!(parse_average_latency(output), Some(0.052));
    }

    #[test]
    fn test_parse_macos_and_busybox_summary() {
        let mac = "round-trip min/avg/max/stddev = 12.100/12.345/12.500/0.000 ms";
        assert_eq!(parse_average_latency(mac), Some(12.345));

        let busybox = "round-trip min/avg/max = 1.2/3.4/5.6 ms";
        assert_eq!(parse_average_latency(busybox), Some(3.4));

        assert_eq!(parse_average_latency("100% packet loss"), None);
    }

    #[test]
    fn test_outcome_sentinels() {
        assert_eq!(ProbeOutcome::unreachable().latency_ms, 0.0);
        assert_eq!(ProbeOutcome::reachable(-1.0).latency_ms, 0.0);
        assert!(ProbeOutcome::reachable(3.2).success);
    }

    #[tokio::test]
    async fn test_command_success_parses_latency() {
        let prober = SystemPingProber::with_command(
            "sh",
            &["-c", "echo \"rtt min/avg/max/mdev = 1.0/2.5/3.0/0.1 ms\"", "sh"],
            Duration::from_secs(2),
        );

        let outcome = prober.probe("10.0.0.1").await;
        assert!(outcome.success);
        assert_eq!(outcome.latency_ms, 2.5);
    }

    #[tokio::test]
    async fn test_command_failure_or_missing_summary() {
        let deadline = Duration::from_secs(2);
        let failing = SystemPingProber::with_command("sh", &["-c", "exit 1", "sh"], deadline);
        assert!(!failing.probe("10.0.0.1").await.success);

        let silent = SystemPingProber::with_command("sh", &["-c", "exit 0", "sh"], deadline);
        assert!(!silent.probe("10.0.0.1").await.success);

        let missing = SystemPingProber::with_command(
            "/nonexistent/ping-binary",
            &[],
            Duration::from_secs(2),
        );
        assert_eq!(missing.probe("10.0.0.1").await, ProbeOutcome::unreachable());
    }

    #[tokio::test]
    async fn test_timeout_tears_down_process_group() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("exec sleep 30");

        let started = Instant::now();
        let outcome = run_bounded(command, Duration::from_millis(200)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));

        let CommandOutcome::TimedOut { pgid } = outcome else {
            panic!("expected a timeout, got {:?}", outcome);
        };
        assert!(pgid > 0);

        let group_alive = unsafe { libc::killpg(pgid, 0) } == 0;
        assert!(!group_alive);
    }

    #[tokio::test]
    async fn test_slow_probe_reports_failure_within_deadline() {
        let prober = SystemPingProber::with_command(
            "sh",
            &["-c", "exec sleep 5", "sh"],
            Duration::from_millis(150),
        );

        let started = Instant::now();
        let outcome = prober.probe("10.0.0.1").await;
        assert!(!outcome.success);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_factory_builds_system_backend() {
        let config = Config::default();
        let prober = ProberFactory::create(&config).unwrap();
        assert_eq!(prober.name(), "system");
    }

    #[cfg(not(feature = "icmp"))]
    #[test]
    fn test_factory_rejects_icmp_without_feature() {
        let config = Config {
            backend: ProbeBackend::Icmp,
            ..Config::default()
        };
        assert!(matches!(
            ProberFactory::create(&config),
            Err(MonitorError::Probe(_))
        ));
    }
}
