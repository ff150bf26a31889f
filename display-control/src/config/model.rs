//! Configuration model persisted as JSON.

use std::time::Duration;

use mdc_codec::InputSource;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::notification::channels::TelegramConfig;
use crate::schedule::{parse_clock_time, parse_weekday};
use crate::{Error, Result};

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub display: DisplaySettings,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    /// Credentials for the dashboard. Carried through untouched.
    #[serde(default = "default_security")]
    pub security: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSettings>,
}

fn default_security() -> Value {
    Value::Object(Default::default())
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            display: DisplaySettings::default(),
            schedule: ScheduleConfig::default(),
            watchdog: WatchdogConfig::default(),
            notifications: NotificationsConfig::default(),
            security: default_security(),
            logging: None,
        }
    }
}

impl AppConfig {
    /// Check every field the loops depend on.
    ///
    /// Collects all problems into one [`Error::Configuration`] so a bad
    /// update is reported in full.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.display.ip.trim().is_empty() {
            problems.push("display.ip must not be empty".to_string());
        }
        if self.display.port == 0 {
            problems.push("display.port must not be 0".to_string());
        }

        for (field, value) in [
            ("power_on", &self.schedule.power_on),
            ("power_off", &self.schedule.power_off),
        ] {
            if parse_clock_time(value).is_none() {
                problems.push(format!("schedule.{field} '{value}' is not a HH:MM time"));
            }
        }
        for day in &self.schedule.days {
            if parse_weekday(day).is_none() {
                problems.push(format!("schedule.days contains unknown day '{day}'"));
            }
        }
        if let Err(e) = self.schedule.startup_source() {
            problems.push(format!("schedule.source_on_startup: {e}"));
        }

        if self.watchdog.check_interval == 0 {
            problems.push("watchdog.check_interval must be at least 1 second".to_string());
        }
        if self.watchdog.max_retry == 0 {
            problems.push("watchdog.max_retry must be at least 1".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::config(problems.join("; ")))
        }
    }

    /// Human-readable label used in notifications.
    pub fn display_label(&self) -> String {
        if self.display.location.is_empty() {
            self.display.name.clone()
        } else {
            format!("{} ({})", self.display.name, self.display.location)
        }
    }
}

/// Network location and labels of the controlled display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(alias = "address")]
    pub ip: String,
    #[serde(default = "default_mdc_port")]
    pub port: u16,
    #[serde(default)]
    pub display_id: u8,
    #[serde(default = "default_display_name")]
    pub name: String,
    #[serde(default)]
    pub location: String,
}

fn default_mdc_port() -> u16 {
    1515
}

fn default_display_name() -> String {
    "Display".to_string()
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            ip: "192.168.1.100".to_string(),
            port: default_mdc_port(),
            display_id: 0,
            name: default_display_name(),
            location: String::new(),
        }
    }
}

/// Daily on/off window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Power-on time, `HH:MM` 24-hour.
    #[serde(default = "default_power_on")]
    pub power_on: String,
    /// Power-off time, `HH:MM` 24-hour.
    #[serde(default = "default_power_off")]
    pub power_off: String,
    /// Active weekday names, matched case-insensitively.
    #[serde(default = "default_days")]
    pub days: Vec<String>,
    #[serde(default = "default_startup_source")]
    pub source_on_startup: String,
}

fn default_true() -> bool {
    true
}

fn default_power_on() -> String {
    "08:00".to_string()
}

fn default_power_off() -> String {
    "20:00".to_string()
}

fn default_days() -> Vec<String> {
    ["monday", "tuesday", "wednesday", "thursday", "friday", "saturday"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_startup_source() -> String {
    "hdmi1".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            power_on: default_power_on(),
            power_off: default_power_off(),
            days: default_days(),
            source_on_startup: default_startup_source(),
        }
    }
}

impl ScheduleConfig {
    /// The input source selected after every power-on.
    pub fn startup_source(&self) -> Result<InputSource> {
        self.source_on_startup
            .parse::<InputSource>()
            .map_err(|e| Error::config(e.to_string()))
    }
}

/// Reconciliation loop settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between ticks.
    #[serde(default = "default_check_interval")]
    pub check_interval: u64,
    /// Consecutive failures before escalating.
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
}

fn default_check_interval() -> u64 {
    300
}

fn default_max_retry() -> u32 {
    3
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: default_check_interval(),
            max_retry: default_max_retry(),
        }
    }
}

impl WatchdogConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.check_interval.max(1))
    }
}

/// Per-channel notification settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub email: EmailSettings,
}

/// SMTP settings. Kept so existing files round-trip; there is no SMTP
/// transport, an enabled email channel is reported and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_smtp_server")]
    pub smtp_server: String,
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub to_email: String,
}

fn default_smtp_server() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            smtp_server: default_smtp_server(),
            smtp_port: default_smtp_port(),
            username: String::new(),
            password: String::new(),
            to_email: String::new(),
        }
    }
}

/// Optional logging overrides.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing` filter directive, e.g. `display_control=debug`.
    #[serde(default)]
    pub filter: Option<String>,
}
