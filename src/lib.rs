//! Ping Monitor Library
//!
//! This library probes large host lists on a fixed cadence, debounces raw
//! reachability into up/down events and renders a text dashboard per sweep.

pub mod config;
pub mod errors;
pub mod groups;
pub mod probe;
#[cfg(feature = "icmp")]
pub mod icmp;
pub mod resolver;
pub mod dispatch;
pub mod state;
pub mod aggregator;
pub mod render;
pub mod sink;
pub mod shutdown;
pub mod monitor;

pub use config::{Config, MonitorSettings, OutputTarget, ProbeBackend};
pub use errors::{MonitorError, Result};
pub use groups::HostGroups;
pub use monitor::PingMonitor;
pub use probe::{ProbeResult, Prober, ProberFactory};
pub use sink::{FrameSink, SinkFactory};
