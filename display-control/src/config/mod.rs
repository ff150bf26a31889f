//! Configuration service module.
//!
//! The configuration lives in a single JSON file. [`ConfigService`] keeps the
//! current snapshot in memory, persists updates, and broadcasts a
//! [`ConfigUpdateEvent`] per changed section so the loops can re-derive
//! their timing without a restart.

pub mod events;
pub mod model;
pub mod service;

pub use events::{ConfigEventBroadcaster, ConfigUpdateEvent, next_config_event};
pub use model::{
    AppConfig, DisplaySettings, EmailSettings, LoggingSettings, NotificationsConfig,
    ScheduleConfig, WatchdogConfig,
};
pub use service::ConfigService;
