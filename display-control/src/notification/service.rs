//! Notification service implementation.
//!
//! Alerts are queued on a bounded channel and delivered by a dispatcher
//! task, so callers never wait on network I/O. A full queue drops the
//! alert with a warning.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channels::{NotificationChannel, build_channels};
use super::{Notification, NotificationSink};
use crate::Result;
use crate::config::AppConfig;

/// Maximum number of alerts waiting for delivery.
const DEFAULT_QUEUE_SIZE: usize = 64;

pub struct NotificationService {
    channels: RwLock<Vec<Arc<dyn NotificationChannel>>>,
    /// Display name and location appended to every alert.
    label: RwLock<String>,
    sender: mpsc::Sender<Notification>,
    receiver: Mutex<Option<mpsc::Receiver<Notification>>>,
}

impl NotificationService {
    /// Create a service with the channels described by the configuration.
    pub fn new(config: &AppConfig) -> Self {
        Self::with_channels(config.display_label(), build_channels(&config.notifications))
    }

    pub fn with_channels(label: String, channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        let (sender, receiver) = mpsc::channel(DEFAULT_QUEUE_SIZE);
        Self {
            channels: RwLock::new(channels),
            label: RwLock::new(label),
            sender,
            receiver: Mutex::new(Some(receiver)),
        }
    }

    /// Rebuild channels and label after a configuration change.
    pub fn reload(&self, config: &AppConfig) {
        let channels = build_channels(&config.notifications);
        info!("Notification channels reloaded ({} active)", channels.len());
        *self.channels.write() = channels;
        *self.label.write() = config.display_label();
    }

    pub fn channel_count(&self) -> usize {
        self.channels.read().len()
    }

    /// Spawn the dispatcher. Returns `None` if it is already running.
    ///
    /// On cancellation the alerts still queued are delivered before the
    /// task exits.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        let mut receiver = self.receiver.lock().take()?;
        let service = Arc::clone(self);

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        while let Ok(notification) = receiver.try_recv() {
                            service.deliver(&notification).await;
                        }
                        debug!("Notification dispatcher stopped");
                        break;
                    }
                    next = receiver.recv() => {
                        match next {
                            Some(notification) => service.deliver(&notification).await,
                            None => break,
                        }
                    }
                }
            }
        }))
    }

    async fn deliver(&self, notification: &Notification) {
        let channels = self.channels.read().clone();
        if channels.is_empty() {
            debug!("No notification channels, dropping '{}'", notification.title);
            return;
        }

        for channel in channels.iter().filter(|c| c.is_enabled()) {
            match channel.send(notification).await {
                Ok(()) => info!(
                    channel = channel.channel_type(),
                    "Notification sent: {}", notification.title
                ),
                Err(e) => warn!(
                    channel = channel.channel_type(),
                    "Failed to send notification '{}': {}", notification.title, e
                ),
            }
        }
    }

    /// Send a test alert through every enabled channel, bypassing the queue.
    pub async fn send_test(&self) -> Vec<(&'static str, Result<()>)> {
        let channels = self.channels.read().clone();
        let mut results = Vec::with_capacity(channels.len());
        for channel in channels.iter().filter(|c| c.is_enabled()) {
            results.push((channel.channel_type(), channel.test().await));
        }
        results
    }
}

impl NotificationSink for NotificationService {
    fn notify(&self, title: &str, message: &str) {
        let label = self.label.read().clone();
        let notification = Notification::new(title, format!("{message}\n\nDisplay: {label}"));

        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(n)) => {
                warn!("Notification queue full, dropping '{}'", n.title);
            }
            Err(mpsc::error::TrySendError::Closed(n)) => {
                warn!("Notification dispatcher stopped, dropping '{}'", n.title);
            }
        }
    }
}
