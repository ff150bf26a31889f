//! Desired power state derived from the configured schedule.
//!
//! Everything here is a pure function of the schedule and a local
//! wall-clock time. Times are `HH:MM` on the same day; a window whose
//! off-time is earlier than its on-time is never active.

use std::fmt;

use chrono::{Datelike, Duration, NaiveDateTime, NaiveTime, Weekday};
use tracing::warn;

use crate::config::ScheduleConfig;
use crate::{Error, Result};

/// Parse an `HH:MM` 24-hour time.
pub fn parse_clock_time(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), "%H:%M").ok()
}

/// Parse a weekday name, ignoring case.
pub fn parse_weekday(value: &str) -> Option<Weekday> {
    value.trim().parse::<Weekday>().ok()
}

/// Lowercase English name of a weekday.
pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Transition fired by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledAction {
    PowerOn,
    PowerOff,
}

impl fmt::Display for ScheduledAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PowerOn => f.write_str("power-on"),
            Self::PowerOff => f.write_str("power-off"),
        }
    }
}

pub struct ScheduleEvaluator;

impl ScheduleEvaluator {
    /// Parse the on/off times of a schedule.
    pub fn window(config: &ScheduleConfig) -> Result<(NaiveTime, NaiveTime)> {
        let on = parse_clock_time(&config.power_on)
            .ok_or_else(|| Error::config(format!("invalid power_on time '{}'", config.power_on)))?;
        let off = parse_clock_time(&config.power_off).ok_or_else(|| {
            Error::config(format!("invalid power_off time '{}'", config.power_off))
        })?;
        Ok((on, off))
    }

    /// Whether `weekday` is one of the configured active days.
    pub fn is_active_day(config: &ScheduleConfig, weekday: Weekday) -> bool {
        config
            .days
            .iter()
            .filter_map(|d| parse_weekday(d))
            .any(|d| d == weekday)
    }

    /// Whether the display should be on at `now`.
    ///
    /// Fails closed: a disabled schedule or unparsable times yield `false`.
    pub fn desired_power(config: &ScheduleConfig, now: NaiveDateTime) -> bool {
        if !config.enabled {
            return false;
        }

        if !Self::is_active_day(config, now.weekday()) {
            return false;
        }

        let (on, off) = match Self::window(config) {
            Ok(window) => window,
            Err(e) => {
                warn!("Schedule cannot be evaluated: {}", e);
                return false;
            }
        };

        if off < on {
            warn!(
                power_on = %config.power_on,
                power_off = %config.power_off,
                "Schedule window crosses midnight and is never active"
            );
            return false;
        }

        let time = now.time();
        on <= time && time <= off
    }

    /// Next scheduled transition strictly after `now`.
    pub fn next_event(
        config: &ScheduleConfig,
        now: NaiveDateTime,
    ) -> Option<(ScheduledAction, NaiveDateTime)> {
        if !config.enabled {
            return None;
        }
        let (on, off) = Self::window(config).ok()?;

        // A week ahead covers every weekday, plus today again for events
        // that already passed.
        (0..=7)
            .map(|offset| now.date() + Duration::days(offset))
            .filter(|date| Self::is_active_day(config, date.weekday()))
            .flat_map(|date| {
                [
                    (ScheduledAction::PowerOn, date.and_time(on)),
                    (ScheduledAction::PowerOff, date.and_time(off)),
                ]
            })
            .filter(|(_, at)| *at > now)
            .min_by_key(|(_, at)| *at)
    }
}
