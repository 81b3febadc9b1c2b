//! Error types for the ping monitor

use std::fmt;

pub type Result<T> = std::result::Result<T, MonitorError>;

#[derive(Debug)]
pub enum MonitorError {
    /// IO operation failed
    Io(std::io::Error),

    /// HTTP request failed
    Http(reqwest::Error),

    /// JSON serialization failed
    Json(serde_json::Error),

    /// Configuration error
    Config(String),

    /// Group file could not be loaded
    GroupFile(String),

    /// Probe backend could not be initialized
    Probe(String),

    /// Frame sink delivery error
    Sink(String),
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::Io(err) => write!(f, "IO error: {}", err),
            MonitorError::Http(err) => write!(f, "HTTP error: {}", err),
            MonitorError::Json(err) => write!(f, "JSON error: {}", err),
            MonitorError::Config(msg) => write!(f, "Configuration error: {}", msg),
            MonitorError::GroupFile(msg) => write!(f, "Group file error: {}", msg),
            MonitorError::Probe(msg) => write!(f, "Probe backend error: {}", msg),
            MonitorError::Sink(msg) => write!(f, "Sink error: {}", msg),
        }
    }
}

impl std::error::Error for MonitorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MonitorError::Io(err) => Some(err),
            MonitorError::Http(err) => Some(err),
            MonitorError::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err)
    }
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Http(err)
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Json(err)
    }
}

impl MonitorError {
    /// Whether this error should abort startup with a non-zero exit status
    pub fn is_fatal_at_startup(&self) -> bool {
        matches!(
            self,
            MonitorError::Config(_) | MonitorError::GroupFile(_) | MonitorError::Probe(_)
        )
    }
}
