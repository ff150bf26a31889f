//! Configuration update events.

use tokio::sync::broadcast;

use super::model::AppConfig;

/// Events broadcast when a section of the configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigUpdateEvent {
    /// Address, name or location of the display changed.
    DisplayUpdated,
    /// Schedule window, days or startup source changed.
    ScheduleUpdated,
    /// Watchdog enable flag, interval or retry threshold changed.
    WatchdogUpdated,
    /// Notification channel settings changed.
    NotificationsUpdated,
    /// Log filter directive changed.
    LoggingUpdated,
}

impl ConfigUpdateEvent {
    /// Get a description of the event for logging.
    pub fn description(&self) -> &'static str {
        match self {
            Self::DisplayUpdated => "Display settings updated",
            Self::ScheduleUpdated => "Schedule updated",
            Self::WatchdogUpdated => "Watchdog settings updated",
            Self::NotificationsUpdated => "Notification settings updated",
            Self::LoggingUpdated => "Logging settings updated",
        }
    }

    /// Compute the events describing the difference between two configs.
    pub fn diff(old: &AppConfig, new: &AppConfig) -> Vec<Self> {
        let mut events = Vec::new();
        if old.display != new.display {
            events.push(Self::DisplayUpdated);
        }
        if old.schedule != new.schedule {
            events.push(Self::ScheduleUpdated);
        }
        if old.watchdog != new.watchdog {
            events.push(Self::WatchdogUpdated);
        }
        if old.notifications != new.notifications {
            events.push(Self::NotificationsUpdated);
        }
        if old.logging != new.logging {
            events.push(Self::LoggingUpdated);
        }
        events
    }
}

/// Wait for the next config event.
///
/// Returns `None` when events were missed, in which case the caller should
/// treat every section as changed. Once the broadcaster is gone this never
/// resolves.
pub async fn next_config_event(
    rx: &mut broadcast::Receiver<ConfigUpdateEvent>,
) -> Option<ConfigUpdateEvent> {
    match rx.recv().await {
        Ok(event) => Some(event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            tracing::warn!("Missed {} config events", skipped);
            None
        }
        Err(broadcast::error::RecvError::Closed) => std::future::pending().await,
    }
}

/// Default channel capacity for config update events.
const DEFAULT_CHANNEL_CAPACITY: usize = 64;

/// Broadcaster for configuration update events.
#[derive(Clone)]
pub struct ConfigEventBroadcaster {
    sender: broadcast::Sender<ConfigUpdateEvent>,
}

impl ConfigEventBroadcaster {
    /// Create a new broadcaster with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new broadcaster with specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to configuration update events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of receivers reached.
    pub fn publish(&self, event: ConfigUpdateEvent) -> usize {
        tracing::debug!("Publishing config event: {}", event.description());
        // send() only fails when nobody is subscribed
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ConfigEventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
