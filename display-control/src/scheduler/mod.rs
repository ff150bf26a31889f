//! Clock-driven power transitions.
//!
//! The scheduler sleeps until the next configured on/off time and fires
//! the matching event. Fire times are derived from the wall clock and
//! re-derived after every event and every schedule change.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigUpdateEvent, ScheduleConfig, next_config_event};
use crate::controller::DisplayController;
use crate::notification::NotificationSink;
use crate::schedule::{ScheduleEvaluator, ScheduledAction};
use crate::state::PowerState;

/// Longest single sleep. Long waits are split so wall-clock jumps are
/// noticed.
const MAX_NAP: Duration = Duration::from_secs(3600);

/// Result of a scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// Already in the target state; no command sent.
    Skipped,
    Succeeded,
    Failed,
}

/// What the loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wakeup {
    /// Nothing scheduled; wait for a config change.
    Idle,
    /// Sleep and re-derive.
    Nap(Duration),
    /// Sleep, then fire.
    Fire {
        action: ScheduledAction,
        at: NaiveDateTime,
        after: Duration,
    },
}

fn next_wakeup(
    schedule: &ScheduleConfig,
    now: NaiveDateTime,
    last_fired: Option<NaiveDateTime>,
) -> Wakeup {
    // An event fired a moment early would otherwise be found again
    let from = match last_fired {
        Some(fired) if fired > now => fired,
        _ => now,
    };
    let Some((action, at)) = ScheduleEvaluator::next_event(schedule, from) else {
        return Wakeup::Idle;
    };

    let after = (at - now).to_std().unwrap_or_default();
    if after > MAX_NAP {
        Wakeup::Nap(MAX_NAP)
    } else {
        Wakeup::Fire { action, at, after }
    }
}

/// Source of local wall-clock time.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

pub struct Scheduler {
    controller: Arc<DisplayController>,
    notifier: Arc<dyn NotificationSink>,
    clock: Clock,
}

impl Scheduler {
    pub fn new(controller: Arc<DisplayController>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            controller,
            notifier,
            clock: Arc::new(|| Local::now().naive_local()),
        }
    }

    /// Replace the wall clock fire times are derived from.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub async fn fire(&self, action: ScheduledAction) -> EventOutcome {
        match action {
            ScheduledAction::PowerOn => self.handle_power_on_event().await,
            ScheduledAction::PowerOff => self.handle_power_off_event().await,
        }
    }

    /// Scheduled power-on: wake the display, select the startup source and
    /// confirm with a probe.
    pub async fn handle_power_on_event(&self) -> EventOutcome {
        info!("Running scheduled power-on");
        if self.controller.state().power() == PowerState::On {
            info!("Display already on, skipping scheduled power-on");
            return EventOutcome::Skipped;
        }

        let source = self.controller.config().current().schedule.source_on_startup.clone();
        if self.controller.power_on(true).await {
            sleep(self.controller.timings().source_delay).await;
            self.controller.set_input_source(&source).await;
            self.controller.check_status().await;
        }

        let power = self.controller.state().power();
        if power == PowerState::On {
            self.notifier.notify(
                "Display on",
                &format!("Scheduled power-on completed, source {source}."),
            );
            EventOutcome::Succeeded
        } else {
            warn!(%power, "Scheduled power-on did not turn the display on");
            self.notifier.notify(
                "ALERT: scheduled power-on failed",
                &format!("The display is {power} after the scheduled power-on."),
            );
            EventOutcome::Failed
        }
    }

    pub async fn handle_power_off_event(&self) -> EventOutcome {
        info!("Running scheduled power-off");
        if self.controller.state().power() == PowerState::Off {
            info!("Display already off, skipping scheduled power-off");
            return EventOutcome::Skipped;
        }

        if self.controller.power_off().await {
            self.notifier
                .notify("Display off", "Scheduled power-off completed.");
            EventOutcome::Succeeded
        } else {
            self.notifier.notify(
                "ALERT: scheduled power-off failed",
                "The display could not be powered off at the scheduled time.",
            );
            EventOutcome::Failed
        }
    }

    /// Spawn the scheduling loop.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut events = self.controller.config().subscribe();
            let mut last_fired: Option<NaiveDateTime> = None;
            info!("Scheduler started");

            loop {
                let config = self.controller.config().current();
                let now = (self.clock)();
                let wakeup = next_wakeup(&config.schedule, now, last_fired);

                let (nap, fire) = match wakeup {
                    Wakeup::Idle => {
                        info!("No scheduled events, waiting for a schedule change");
                        (None, None)
                    }
                    Wakeup::Nap(nap) => (Some(nap), None),
                    Wakeup::Fire { action, at, after } => {
                        info!(%action, at = %at, "Next scheduled event");
                        (Some(after), Some((action, at)))
                    }
                };

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Scheduler shutting down");
                        break;
                    }
                    _ = sleep(nap.unwrap_or_default()), if nap.is_some() => {
                        if let Some((action, at)) = fire {
                            let outcome = self.fire(action).await;
                            debug!(%action, ?outcome, "Scheduled event finished");
                            last_fired = Some(at);
                        }
                    }
                    event = next_config_event(&mut events) => {
                        if matches!(event, Some(ConfigUpdateEvent::ScheduleUpdated) | None) {
                            info!("Schedule changed, re-deriving fire times");
                        }
                    }
                }
            }
        })
    }
}
