//! Text dashboard rendering
//!
//! Columns are padded by display width, so Hangul and CJK text lines up
//! with ASCII in a monospaced terminal.

use crate::config::MonitorSettings;
use crate::groups::HostGroups;
use crate::probe::ProbeResult;
use crate::state::HostStateTable;
use chrono::{DateTime, Local};
use std::collections::HashMap;

const HOST_WIDTH: usize = 15;
const STATUS_WIDTH: usize = 7;
const LATENCY_WIDTH: usize = 10;
const TIME_WIDTH: usize = 10;
const COLUMN_GAP: &str = "  ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
    Center,
}

/// Terminal columns occupied by `text`
pub fn display_width(text: &str) -> usize {
    text.chars().map(char_width).sum()
}

fn char_width(c: char) -> usize {
    match c as u32 {
        0xAC00..=0xD7A3 | 0x4E00..=0x9FFF => 2,
        _ => 1,
    }
}

/// Pad `text` to `width` display columns; wider text is left as is
pub fn pad(text: &str, width: usize, align: Align) -> String {
    let padding = width.saturating_sub(display_width(text));

    match align {
        Align::Left => format!("{}{}", text, " ".repeat(padding)),
        Align::Right => format!("{}{}", " ".repeat(padding), text),
        Align::Center => {
            let left = padding / 2;
            format!("{}{}{}", " ".repeat(left), text, " ".repeat(padding - left))
        }
    }
}

pub fn format_time(at: Option<DateTime<Local>>) -> String {
    at.map_or_else(|| "-".to_string(), |t| t.format("%H:%M:%S").to_string())
}

/// Everything a frame is built from
pub struct FrameInput<'a> {
    pub now: DateTime<Local>,
    pub settings: &'a MonitorSettings,
    pub groups: &'a HostGroups,
    pub states: &'a HostStateTable,
    /// Results of the sweep being rendered
    pub results: &'a [ProbeResult],
}

#[derive(Debug, Clone)]
pub struct Renderer {
    history_slots: usize,
}

impl Renderer {
    pub fn new(history_slots: usize) -> Self {
        Self { history_slots }
    }

    fn headers(&self) -> Vec<(String, usize)> {
        let mut headers = vec![
            ("Host".to_string(), HOST_WIDTH),
            ("Status".to_string(), STATUS_WIDTH),
            ("Latency".to_string(), LATENCY_WIDTH),
        ];
        for i in 1..=self.history_slots {
            headers.push((format!("Down {}", i), TIME_WIDTH));
            headers.push((format!("Up {}", i), TIME_WIDTH));
        }
        headers
    }

    pub fn total_width(&self) -> usize {
        let headers = self.headers();
        headers.iter().map(|(_, w)| w).sum::<usize>() + COLUMN_GAP.len() * (headers.len() - 1)
    }

    pub fn render(&self, input: &FrameInput<'_>) -> String {
        let total_width = self.total_width();
        let by_host: HashMap<&str, &ProbeResult> = input
            .results
            .iter()
            .map(|r| (r.host.as_str(), r))
            .collect();

        let mut lines = vec![
            "=".repeat(total_width),
            format!(
                "Ping monitor status (last update: {})",
                input.now.format("%Y-%m-%d %H:%M:%S")
            ),
            format!(
                "Settings: interval {}s, failure threshold {}, recovery threshold {}",
                input.settings.interval_secs(),
                input.settings.failure_threshold(),
                input.settings.recovery_threshold()
            ),
            "=".repeat(total_width),
        ];

        for group in input.groups.iter() {
            let rows: Vec<&ProbeResult> = group
                .hosts
                .iter()
                .filter_map(|h| by_host.get(h.as_str()).copied())
                .collect();
            if rows.is_empty() {
                continue;
            }

            lines.push(String::new());
            lines.push(format!("=== {} ===", group.name));
            lines.push(
                self.headers()
                    .iter()
                    .map(|(label, width)| pad(label, *width, Align::Left))
                    .collect::<Vec<_>>()
                    .join(COLUMN_GAP),
            );
            lines.push("-".repeat(total_width));

            for result in &rows {
                lines.push(self.row(result, input.states));
            }

            let reachable = rows.iter().filter(|r| r.success).count();
            let ratio = reachable as f64 * 100.0 / rows.len() as f64;
            lines.push(String::new());
            lines.push(format!(
                "Group reachability: {}/{} ({:.1}%)",
                reachable,
                rows.len(),
                ratio
            ));
        }

        lines.join("\n")
    }

    fn row(&self, result: &ProbeResult, states: &HostStateTable) -> String {
        let status = if result.success { "O" } else { "X" };
        let latency = if result.success {
            format!("{:.1}ms", result.latency_ms)
        } else {
            "timeout".to_string()
        };

        let mut cells = vec![
            pad(&result.host, HOST_WIDTH, Align::Left),
            pad(status, STATUS_WIDTH, Align::Left),
            pad(&latency, LATENCY_WIDTH, Align::Left),
        ];

        let slots = states.get(&result.host).map(|s| s.history().slots());
        for i in 0..self.history_slots {
            let outage = slots.and_then(|s| s.get(i));
            cells.push(pad(&format_time(outage.and_then(|o| o.down_at)), TIME_WIDTH, Align::Left));
            cells.push(pad(&format_time(outage.and_then(|o| o.up_at)), TIME_WIDTH, Align::Left));
        }

        cells.join(COLUMN_GAP)
    }
}
