//! Ping Monitor Binary

use clap::Parser;
use dialoguer::Input;
use ping_monitor::config::{
    validate_interval, validate_threshold, DEFAULT_GROUP_FILE, INTERVAL_RANGE, THRESHOLD_RANGE,
};
use ping_monitor::{
    shutdown, Config, HostGroups, MonitorError, MonitorSettings, OutputTarget, PingMonitor,
    ProbeBackend, ProberFactory, Result, SinkFactory,
};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ping_monitor", version, about = "Debounced ping dashboard for large host lists")]
struct Cli {
    /// Host list with [group] headers
    #[arg(short = 'f', long, env = "PING_GROUP_FILE", default_value = DEFAULT_GROUP_FILE)]
    group_file: PathBuf,

    /// Seconds between sweeps (1-60); prompted for when absent
    #[arg(
        short,
        long,
        env = "PING_INTERVAL",
        value_parser = clap::value_parser!(u64).range(1..=60)
    )]
    interval: Option<u64>,

    /// Consecutive failures before a host is marked down (1-10)
    #[arg(
        long,
        env = "PING_FAILURE_THRESHOLD",
        value_parser = clap::value_parser!(u32).range(1..=10)
    )]
    failure_threshold: Option<u32>,

    /// Consecutive successes before a down host is marked up (1-10)
    #[arg(
        long,
        env = "PING_RECOVERY_THRESHOLD",
        value_parser = clap::value_parser!(u32).range(1..=10)
    )]
    recovery_threshold: Option<u32>,

    /// Down/up pairs shown per host (1-10)
    #[arg(
        long,
        env = "PING_HISTORY_SLOTS",
        default_value_t = 3,
        value_parser = clap::value_parser!(u64).range(1..=10)
    )]
    history_slots: u64,

    /// Probe implementation
    #[arg(long, env = "PING_BACKEND", value_enum, default_value_t = ProbeBackend::System)]
    backend: ProbeBackend,

    /// Write each frame to this file instead of the terminal
    #[arg(long, env = "PING_OUTPUT_FILE", conflicts_with = "push_url")]
    output_file: Option<PathBuf>,

    /// POST each frame as JSON to this URL instead of the terminal
    #[arg(long, env = "PING_PUSH_URL")]
    push_url: Option<String>,

    /// Append logs to this file instead of stderr
    #[arg(long, env = "PING_LOG_FILE")]
    log_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = initialize_tracing(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    info!("Starting ping monitor v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli).await {
        if e.is_fatal_at_startup() {
            error!("Startup failed: {}", e);
        } else {
            error!("Monitor failed: {}", e);
        }
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    info!("Ping monitor stopped");
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;

    info!(
        "Monitor configuration - Groups: {}, Backend: {}, In-flight: {}, Batch: {}, Timeout: {}ms",
        config.group_file.display(),
        config.backend,
        config.max_in_flight,
        config.settings.batch_size(),
        config.probe_timeout.as_millis()
    );

    let groups = HostGroups::load(&config.group_file).await?;
    let prober = ProberFactory::create(&config)?;
    let sink = SinkFactory::create(&config)?;
    let mut monitor = PingMonitor::new(config, groups, prober, sink)?;

    let (trigger, shutdown) = shutdown::channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                trigger.trigger();
            }
            Err(e) => error!("Failed to wait for shutdown signal: {}", e),
        }
    });

    monitor.run(shutdown).await
}

/// Merge environment tuning, flags and interactive answers into a validated config
fn build_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::from_env().map_err(MonitorError::Config)?;
    config.group_file = cli.group_file.clone();

    let interval = match cli.interval {
        Some(interval) => interval,
        None => prompt(
            &format!(
                "Ping interval in seconds ({}-{})",
                INTERVAL_RANGE.start(),
                INTERVAL_RANGE.end()
            ),
            validate_interval,
        )?,
    };

    let failure_threshold = match cli.failure_threshold {
        Some(threshold) => threshold,
        None => prompt(
            &format!(
                "Failures before a host is down ({}-{})",
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            ),
            |v| validate_threshold("failure threshold", v),
        )?,
    };

    let recovery_threshold = match cli.recovery_threshold {
        Some(threshold) => threshold,
        None => prompt(
            &format!(
                "Successes before a host is up again ({}-{})",
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            ),
            |v| validate_threshold("recovery threshold", v),
        )?,
    };

    config.settings = MonitorSettings::new(
        interval,
        failure_threshold,
        recovery_threshold,
        config.settings.batch_size(),
    )
    .map_err(MonitorError::Config)?;

    config.history_slots = cli.history_slots as usize;
    config.backend = cli.backend;
    config.output = match (&cli.output_file, &cli.push_url) {
        (Some(path), _) => OutputTarget::File(path.clone()),
        (None, Some(url)) => OutputTarget::Http(url.clone()),
        (None, None) => OutputTarget::Terminal,
    };

    config.validate().map_err(MonitorError::Config)?;
    Ok(config)
}

/// Ask until the answer parses and passes `check`
fn prompt<T, F>(question: &str, check: F) -> Result<T>
where
    T: Clone + FromStr + ToString,
    <T as FromStr>::Err: ToString,
    F: Fn(T) -> std::result::Result<T, String>,
{
    Input::<T>::new()
        .with_prompt(question)
        .validate_with(|value: &T| check(value.clone()).map(|_| ()))
        .interact_text()
        .map_err(|e| MonitorError::Config(format!("cannot read answer to '{}': {}", question, e)))
}

/// Initialize structured logging
fn initialize_tracing(cli: &Cli) -> std::io::Result<()> {
    let draws_terminal = cli.output_file.is_none() && cli.push_url.is_none();

    // Keep the dashboard readable unless logs go elsewhere
    let default_level = if draws_terminal && cli.log_file.is_none() {
        "warn"
    } else {
        "info"
    };
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());

    let writer = match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(writer)
        .json();

    let filter_layer = tracing_subscriber::EnvFilter::try_new(&log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    Ok(())
}
