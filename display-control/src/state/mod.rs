//! Last-known state of the display.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Observed power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    On,
    Off,
    /// No transport-level answer within the retry budget.
    Unreachable,
    /// Reachable, but a command or probe failed.
    Error,
    /// Before the first probe, or the display reported something unrecognized.
    #[default]
    Unknown,
}

impl PowerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
            Self::Unreachable => "unreachable",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State-changing command most recently issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandKind {
    PowerOn { force_wake: bool },
    PowerOff,
    SetInputSource { source: String },
    PowerCycle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastCommand {
    #[serde(flatten)]
    pub kind: CommandKind,
    pub issued_at: DateTime<Local>,
    pub succeeded: bool,
}

/// Snapshot of everything known about the display.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayState {
    pub power: PowerState,
    /// Raw reading when `power` is `Unknown` after a probe.
    pub power_detail: Option<String>,
    /// Last commanded or observed source, `None` when unknown.
    pub input_source: Option<String>,
    pub last_checked_at: Option<DateTime<Local>>,
    pub last_command: Option<LastCommand>,
    /// Lifetime count of failed operations. Never reset.
    pub error_count: u64,
    /// Watchdog streak counter.
    pub consecutive_failures: u32,
    pub last_power_on_attempt_at: Option<DateTime<Local>>,
}

/// Shared handle to the display state.
///
/// Every mutation runs under the write lock as one closure, so readers
/// never see a partially applied update.
#[derive(Clone, Default)]
pub struct SharedDisplayState {
    inner: Arc<RwLock<DisplayState>>,
}

impl SharedDisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DisplayState {
        self.inner.read().clone()
    }

    pub fn power(&self) -> PowerState {
        self.inner.read().power
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.read().consecutive_failures
    }

    /// Apply a mutation atomically and return its result.
    pub fn update<R>(&self, f: impl FnOnce(&mut DisplayState) -> R) -> R {
        f(&mut *self.inner.write())
    }

    /// Increment the streak counter, returning the new value.
    pub fn record_failure(&self) -> u32 {
        self.update(|s| {
            s.consecutive_failures += 1;
            s.consecutive_failures
        })
    }

    pub fn reset_failures(&self) {
        self.update(|s| s.consecutive_failures = 0);
    }
}
