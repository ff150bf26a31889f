//! Human-facing alerts.
//!
//! The reconciliation loops report through the [`NotificationSink`] trait,
//! which never blocks and never fails into the caller. The
//! [`NotificationService`] queues alerts and delivers them to the
//! configured channels in the background.

pub mod channels;
pub mod service;

pub use channels::{NotificationChannel, TelegramChannel, TelegramConfig};
pub use service::NotificationService;

/// A single alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn test() -> Self {
        Self::new("Test notification", "This is a test of the notification system")
    }
}

/// Receiver of alerts. Delivery is best-effort.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}
