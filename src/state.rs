//! Per-host debounce state and the down/up history ring

use crate::config::MonitorSettings;
use crate::probe::ProbeResult;
use chrono::{DateTime, Local};
use std::collections::HashMap;

/// Debounced host status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HostStatus {
    /// No sweep has produced a decision yet
    #[default]
    Unknown,
    Up,
    Down,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Unknown => write!(f, "UNKNOWN"),
            HostStatus::Up => write!(f, "UP"),
            HostStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Status change produced by a single probe result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First success ever observed; not recorded in history
    FirstUp,
    Down { at: DateTime<Local> },
    Up { at: DateTime<Local> },
}

/// One outage record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Outage {
    pub down_at: Option<DateTime<Local>>,
    pub up_at: Option<DateTime<Local>>,
}

impl Outage {
    pub fn is_open(&self) -> bool {
        self.down_at.is_some() && self.up_at.is_none()
    }
}

/// Fixed ring of outage records with a cursor.
///
/// The cursor only moves once the slot under it has been closed, so an open
/// outage is never overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRing {
    slots: Vec<Outage>,
    cursor: usize,
}

impl HistoryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![Outage::default(); capacity.max(1)],
            cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Slots in storage order
    pub fn slots(&self) -> &[Outage] {
        &self.slots
    }

    pub fn open_slot(&self) -> Option<&Outage> {
        let slot = &self.slots[self.cursor];
        slot.is_open().then_some(slot)
    }

    fn open(&mut self, at: DateTime<Local>) {
        self.slots[self.cursor] = Outage {
            down_at: Some(at),
            up_at: None,
        };
    }

    fn close(&mut self, at: DateTime<Local>) -> bool {
        let slot = &mut self.slots[self.cursor];
        if slot.down_at.is_none() {
            return false;
        }

        slot.up_at = Some(at);
        self.cursor = (self.cursor + 1) % self.slots.len();
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostState {
    status: HostStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    history: HistoryRing,
}

impl HostState {
    pub fn new(history_slots: usize) -> Self {
        Self {
            status: HostStatus::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            history: HistoryRing::new(history_slots),
        }
    }

    pub fn status(&self) -> HostStatus {
        self.status
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn consecutive_successes(&self) -> u32 {
        self.consecutive_successes
    }

    pub fn history(&self) -> &HistoryRing {
        &self.history
    }

    /// Feed one raw outcome through the debounce rules
    pub fn observe(
        &mut self,
        success: bool,
        at: DateTime<Local>,
        settings: &MonitorSettings,
    ) -> Option<Transition> {
        if success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;

            match self.status {
                HostStatus::Unknown => {
                    self.status = HostStatus::Up;
                    Some(Transition::FirstUp)
                }
                HostStatus::Down
                    if self.consecutive_successes >= settings.recovery_threshold() =>
                {
                    self.history.close(at);
                    self.status = HostStatus::Up;
                    Some(Transition::Up { at })
                }
                _ => None,
            }
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;

            // Unknown may go straight to Down: the rule is "not already Down".
            if self.consecutive_failures >= settings.failure_threshold()
                && self.status != HostStatus::Down
            {
                self.history.open(at);
                self.status = HostStatus::Down;
                Some(Transition::Down { at })
            } else {
                None
            }
        }
    }
}

/// Owns every host's debounce state
#[derive(Debug, Clone, Default)]
pub struct HostStateTable {
    hosts: HashMap<String, HostState>,
    history_slots: usize,
}

impl HostStateTable {
    pub fn new<'a, I>(hosts: I, history_slots: usize) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            hosts: hosts
                .into_iter()
                .map(|h| (h.to_string(), HostState::new(history_slots)))
                .collect(),
            history_slots,
        }
    }

    /// Apply a probe result; unknown hosts get a fresh state
    pub fn apply(
        &mut self,
        result: &ProbeResult,
        settings: &MonitorSettings,
    ) -> Option<Transition> {
        let history_slots = self.history_slots;
        self.hosts
            .entry(result.host.clone())
            .or_insert_with(|| HostState::new(history_slots))
            .observe(result.success, result.timestamp, settings)
    }

    pub fn get(&self, host: &str) -> Option<&HostState> {
        self.hosts.get(host)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn count(&self, status: HostStatus) -> usize {
        self.hosts.values().filter(|s| s.status == status).count()
    }

    pub fn history_slots(&self) -> usize {
        self.history_slots
    }

    pub fn clear(&mut self) {
        self.hosts.clear();
    }
}
