//! Status publication to observers.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::state::{DisplayState, LastCommand, PowerState};

/// Schedule part of a status snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub enabled: bool,
    pub in_schedule: bool,
}

/// Serializable view of the display state for observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub power: PowerState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_detail: Option<String>,
    /// `"unknown"` until a source has been commanded.
    pub input_source: String,
    pub last_check: Option<DateTime<Local>>,
    pub last_command: Option<LastCommand>,
    pub error_count: u64,
    pub consecutive_failures: u32,
    pub schedule: ScheduleStatus,
}

impl StatusSnapshot {
    pub fn from_state(state: &DisplayState, schedule: ScheduleStatus) -> Self {
        Self {
            power: state.power,
            power_detail: state.power_detail.clone(),
            input_source: state
                .input_source
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            last_check: state.last_checked_at,
            last_command: state.last_command.clone(),
            error_count: state.error_count,
            consecutive_failures: state.consecutive_failures,
            schedule,
        }
    }
}

/// Receives a snapshot after every probe and state-changing operation.
///
/// Publishing is fire-and-forget and must not fail into the caller.
pub trait StatusPublisher: Send + Sync {
    fn publish(&self, snapshot: StatusSnapshot);
}

/// Default channel capacity for status snapshots.
const DEFAULT_CHANNEL_CAPACITY: usize = 16;

/// [`StatusPublisher`] over a broadcast channel.
///
/// Slow observers lag and skip snapshots; with no observers the
/// snapshot is dropped.
#[derive(Clone)]
pub struct StatusBroadcaster {
    sender: broadcast::Sender<StatusSnapshot>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusPublisher for StatusBroadcaster {
    fn publish(&self, snapshot: StatusSnapshot) {
        if self.sender.send(snapshot).is_err() {
            trace!("No status observers");
        }
    }
}
