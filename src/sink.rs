//! Frame sinks: where each rendered dashboard goes

use crate::config::{Config, OutputTarget};
use crate::errors::{MonitorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

/// Clear screen and move the cursor home
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

/// One rendered frame plus the counters sinks may want
#[derive(Debug, Clone, Serialize)]
pub struct Frame {
    pub monitor_id: String,
    pub cycle: u64,
    pub rendered_at: DateTime<Local>,
    pub hosts_total: usize,
    pub hosts_up: usize,
    pub text: String,
}

#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn emit(&self, frame: &Frame) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Redraws the terminal on every frame
#[derive(Debug, Default)]
pub struct TerminalSink;

#[async_trait]
impl FrameSink for TerminalSink {
    async fn emit(&self, frame: &Frame) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(CLEAR_SCREEN.as_bytes()).await?;
        stdout.write_all(frame.text.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "terminal"
    }
}

/// Keeps the latest frame in a file
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl FrameSink for FileSink {
    async fn emit(&self, frame: &Frame) -> Result<()> {
        let mut contents = frame.text.clone();
        contents.push('\n');
        tokio::fs::write(&self.path, contents).await.map_err(|e| {
            MonitorError::Sink(format!("cannot write {}: {}", self.path.display(), e))
        })
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// POSTs each frame as JSON, retrying with exponential backoff
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: Client,
    url: String,
    timeout: Duration,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl HttpSink {
    pub fn new(
        url: String,
        http_timeout: Duration,
        max_retries: u32,
        retry_backoff_ms: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(http_timeout)
            .user_agent(format!("ping_monitor/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(MonitorError::Http)?;

        Ok(Self {
            client,
            url,
            timeout: http_timeout,
            max_retries,
            retry_backoff_ms,
        })
    }

    async fn send_attempt(&self, body: &[u8], cycle: u64) -> Result<()> {
        let request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send();

        let response = timeout(self.timeout, request)
            .await
            .map_err(|_| MonitorError::Sink("Request timeout".to_string()))?
            .map_err(MonitorError::Http)?;

        self.handle_response(response, cycle).await
    }

    async fn handle_response(&self, response: Response, cycle: u64) -> Result<()> {
        let status = response.status();

        if status.is_success() {
            debug!("Frame {} accepted by {}", cycle, self.url);
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let message = match status.as_u16() {
            400 => format!("Bad request for frame {}: {}", cycle, body),
            401 | 403 => format!("Push rejected for frame {}: {}", cycle, body),
            404 => format!("Push endpoint not found for frame {}: {}", cycle, body),
            413 => format!("Frame {} too large: {}", cycle, body),
            429 => format!("Rate limited for frame {}: {}", cycle, body),
            500..=599 => format!("Server error for frame {}: {}", cycle, body),
            _ => format!("Unexpected response {} for frame {}: {}", status, cycle, body),
        };

        Err(MonitorError::Sink(message))
    }
}

#[async_trait]
impl FrameSink for HttpSink {
    async fn emit(&self, frame: &Frame) -> Result<()> {
        let body = serde_json::to_vec(frame)?;
        let mut attempt = 0;

        loop {
            match self.send_attempt(&body, frame.cycle).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.max_retries {
                        error!(
                            "Failed to push frame {} after {} attempts: {}",
                            frame.cycle, attempt, e
                        );
                        return Err(e);
                    }

                    let backoff_ms = backoff_delay_ms(self.retry_backoff_ms, attempt);
                    warn!(
                        "Failed to push frame {} (attempt {}), retrying in {}ms: {}",
                        frame.cycle, attempt, backoff_ms, e
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Exponential backoff before retry `attempt` (1-based), saturating at `u64::MAX`
fn backoff_delay_ms(base_ms: u64, attempt: u32) -> u64 {
    let factor = 2_u64.checked_pow(attempt.saturating_sub(1)).unwrap_or(u64::MAX);
    base_ms.saturating_mul(factor)
}

pub struct SinkFactory;

impl SinkFactory {
    pub fn create(config: &Config) -> Result<Box<dyn FrameSink>> {
        Ok(match &config.output {
            OutputTarget::Terminal => Box::new(TerminalSink),
            OutputTarget::File(path) => Box::new(FileSink::new(path.clone())),
            OutputTarget::Http(url) => Box::new(HttpSink::new(
                url.clone(),
                config.sink_timeout,
                config.sink_max_retries,
                config.sink_retry_backoff_ms,
            )?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn frame(cycle: u64) -> Frame {
        Frame {
            monitor_id: "monitor-1".to_string(),
            cycle,
            rendered_at: Local::now(),
            hosts_total: 3,
            hosts_up: 2,
            text: "=== 기본그룹 ===".to_string(),
        }
    }

    #[tokio::test]
    async fn test_file_sink_overwrites_with_latest_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dashboard.txt");
        let sink = FileSink::new(path.clone());

        assert_ok!(sink.emit(&frame(1)).await);
        let mut second = frame(2);
        second.text = "second".to_string();
        assert_ok!(sink.emit(&second).await);

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "second\n");
    }

    #[tokio::test]
    async fn test_file_sink_reports_unwritable_path() {
        let sink = FileSink::new(PathBuf::from("/nonexistent/dir/dashboard.txt"));
        let err = sink.emit(&frame(1)).await.unwrap_err();
        assert!(matches!(err, MonitorError::Sink(_)));
    }

    #[tokio::test]
    async fn test_http_sink_posts_frame_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/frames"))
            .and(body_partial_json(serde_json::json!({
                "monitor_id": "monitor-1",
                "cycle": 7,
                "hosts_up": 2,
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let url = format!("{}/frames", server.uri());
        let sink = HttpSink::new(url, Duration::from_secs(2), 0, 1).unwrap();
        assert_ok!(sink.emit(&frame(7)).await);
    }

    #[tokio::test]
    async fn test_http_sink_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let sink = HttpSink::new(server.uri(), Duration::from_secs(2), 2, 1).unwrap();
        let result = sink.emit(&frame(1)).await;
        assert_err!(&result);
        assert!(matches!(result, Err(MonitorError::Sink(msg)) if msg.contains("Server error")));
    }

    #[test]
    fn test_backoff_doubles_and_saturates() {
        assert_eq!(backoff_delay_ms(200, 1), 200);
        assert_eq!(backoff_delay_ms(200, 2), 400);
        assert_eq!(backoff_delay_ms(200, 4), 1600);
        assert_eq!(backoff_delay_ms(200, 64), u64::MAX);
        assert_eq!(backoff_delay_ms(200, 200), u64::MAX);
        assert_eq!(backoff_delay_ms(0, 200), 0);
    }

    #[test]
    fn test_factory_picks_sink_from_output() {
        let mut config = Config::default();
        assert_eq!(SinkFactory::create(&config).unwrap().name(), "terminal");

        config.output = OutputTarget::File(PathBuf::from("dashboard.txt"));
        assert_eq!(SinkFactory::create(&config).unwrap().name(), "file");

        config.output = OutputTarget::Http("http://localhost:9000".to_string());
        assert_eq!(SinkFactory::create(&config).unwrap().name(), "http");
    }
}
