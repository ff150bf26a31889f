//! Notification channels.
//!
//! Telegram is the only delivery transport. Email settings are accepted
//! in the configuration, but an enabled email channel is reported and
//! skipped.

mod telegram;

pub use telegram::{TelegramChannel, TelegramConfig};

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use super::Notification;
use crate::Result;
use crate::config::NotificationsConfig;

/// Trait for notification channels.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Get the channel type name.
    fn channel_type(&self) -> &'static str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Send a notification through this channel.
    async fn send(&self, notification: &Notification) -> Result<()>;

    /// Test the channel configuration.
    async fn test(&self) -> Result<()>;
}

/// Build the channels described by the configuration.
pub fn build_channels(config: &NotificationsConfig) -> Vec<Arc<dyn NotificationChannel>> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    if config.telegram.enabled {
        let channel = TelegramChannel::new(config.telegram.clone());
        if channel.is_enabled() {
            channels.push(Arc::new(channel));
        } else {
            warn!("Telegram notifications enabled but bot_token or chat_id is missing");
        }
    }

    if config.email.enabled {
        warn!(
            smtp_server = %config.email.smtp_server,
            "Email notifications are not supported, skipping channel"
        );
    }

    channels
}
