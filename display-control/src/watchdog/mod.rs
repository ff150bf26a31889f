//! Reconciliation loop.
//!
//! Every `watchdog.check_interval` seconds the watchdog probes the display
//! and compares the observed power state with what the schedule wants.
//! Drift towards "off" during an active window is corrected; a display
//! left on outside the window is tolerated until the scheduler's next
//! off-event. Unreachable and error outcomes build up a failure streak
//! that escalates once per episode when it reaches `watchdog.max_retry`.

use std::sync::Arc;

use chrono::{Datelike, Local, NaiveDateTime};
use mdc_codec::InputSource;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigUpdateEvent, next_config_event};
use crate::controller::DisplayController;
use crate::notification::NotificationSink;
use crate::schedule::{ScheduleEvaluator, weekday_name};
use crate::state::PowerState;

/// What a single watchdog tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Observed state matches the schedule; streak reset.
    InSync,
    /// On outside the schedule window. Left alone.
    Tolerated,
    /// Reading neither on nor off. Nothing done.
    Indeterminate,
    /// Unreachable, streak below the threshold.
    Unreachable { streak: u32 },
    /// Unreachable streak hit the threshold; alert sent and streak reset.
    Escalated,
    /// Probe or command failed, streak below the threshold.
    Failing { streak: u32 },
    /// Error streak hit the threshold and a power cycle ran.
    PowerCycled { recovered: bool },
    /// Off during the window, but a power-on was attempted too recently.
    CoolingDown,
    /// Off during the window and switched back on.
    PoweredOn,
    /// Off during the window and the power-on failed.
    PowerOnFailed { streak: u32 },
}

pub struct Watchdog {
    controller: Arc<DisplayController>,
    notifier: Arc<dyn NotificationSink>,
}

impl Watchdog {
    pub fn new(controller: Arc<DisplayController>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            controller,
            notifier,
        }
    }

    /// Run one reconciliation against the local wall clock.
    pub async fn tick(&self) -> WatchdogOutcome {
        self.tick_at(Local::now().naive_local()).await
    }

    /// Run one reconciliation as if the wall clock read `now`.
    pub async fn tick_at(&self, now: NaiveDateTime) -> WatchdogOutcome {
        let outcome = self.reconcile(now).await;
        // Streak changes are not covered by the controller's own publishing
        self.controller.publish();
        outcome
    }

    async fn reconcile(&self, now: NaiveDateTime) -> WatchdogOutcome {
        let config = self.controller.config().current();
        let should_be_on = ScheduleEvaluator::desired_power(&config.schedule, now);
        let max_retry = config.watchdog.max_retry.max(1);

        debug!(
            day = weekday_name(now.weekday()),
            should_be_on, "Watchdog check"
        );
        self.controller.check_status().await;

        let state = self.controller.state();
        match (state.power(), should_be_on) {
            (PowerState::Unreachable, _) => {
                let streak = state.record_failure();
                if streak < max_retry {
                    warn!(streak, max_retry, "Display unreachable");
                    return WatchdogOutcome::Unreachable { streak };
                }

                error!(max_retry, "Display unreachable, escalating");
                self.notifier.notify(
                    "ALERT: display unreachable",
                    &format!(
                        "The display did not respond after {max_retry} attempts. Intervention required."
                    ),
                );
                state.reset_failures();
                WatchdogOutcome::Escalated
            }
            (PowerState::Error, _) => {
                let streak = state.record_failure();
                if streak < max_retry {
                    warn!(streak, max_retry, "Display reported an error");
                    return WatchdogOutcome::Failing { streak };
                }

                error!(max_retry, "Display keeps failing, power cycling");
                let source = config.schedule.startup_source().unwrap_or_else(|e| {
                    warn!("Falling back to HDMI1 for recovery: {}", e);
                    InputSource::Hdmi1
                });
                let recovered = self.controller.power_cycle(source).await;
                if recovered {
                    self.notifier.notify(
                        "Display recovered",
                        &format!(
                            "The display failed {max_retry} consecutive checks and came back after a power cycle."
                        ),
                    );
                } else {
                    self.notifier.notify(
                        "ALERT: display recovery failed",
                        &format!(
                            "The display failed {max_retry} consecutive checks and a power cycle did not bring it back. Intervention required."
                        ),
                    );
                }
                state.reset_failures();
                WatchdogOutcome::PowerCycled { recovered }
            }
            (PowerState::Off, true) => {
                if self.controller.power_on_cooling_down() {
                    info!("Display off during schedule, power-on still pending");
                    return WatchdogOutcome::CoolingDown;
                }

                warn!("Display off during schedule, switching it back on");
                if self.controller.power_on(true).await {
                    sleep(self.controller.timings().source_delay).await;
                    self.controller
                        .set_input_source(&config.schedule.source_on_startup)
                        .await;
                    self.notifier.notify(
                        "Display switched back on",
                        "The display was off during scheduled hours and has been powered on.",
                    );
                    WatchdogOutcome::PoweredOn
                } else {
                    let streak = state.record_failure();
                    self.notifier.notify(
                        "ALERT: display power-on failed",
                        "The display is off during scheduled hours and could not be powered on.",
                    );
                    WatchdogOutcome::PowerOnFailed { streak }
                }
            }
            (PowerState::On, false) => {
                debug!("Display on outside schedule, leaving it on");
                WatchdogOutcome::Tolerated
            }
            (PowerState::On, true) | (PowerState::Off, false) => {
                state.reset_failures();
                WatchdogOutcome::InSync
            }
            (PowerState::Unknown, _) => {
                debug!("Power state indeterminate, no action");
                WatchdogOutcome::Indeterminate
            }
        }
    }

    /// Spawn the periodic loop.
    ///
    /// The interval and enable flag are re-read before every tick, so a
    /// config change takes effect without restarting the loop.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut events = self.controller.config().subscribe();
            let mut last_tick = Instant::now();
            info!(
                interval_secs = self.controller.config().current().watchdog.check_interval,
                "Watchdog started"
            );

            loop {
                let config = self.controller.config().current();
                let deadline = last_tick + config.watchdog.interval();

                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Watchdog shutting down");
                        break;
                    }
                    _ = sleep_until(deadline) => {
                        last_tick = Instant::now();
                        if config.watchdog.enabled {
                            let outcome = self.tick().await;
                            debug!(?outcome, "Watchdog tick finished");
                        } else {
                            debug!("Watchdog disabled, skipping check");
                        }
                    }
                    event = next_config_event(&mut events) => {
                        if matches!(event, Some(ConfigUpdateEvent::WatchdogUpdated) | None) {
                            let config = self.controller.config().current();
                            info!(
                                enabled = config.watchdog.enabled,
                                interval_secs = config.watchdog.check_interval,
                                "Watchdog settings reloaded"
                            );
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::NaiveDate;
    use serde_json::json;

    use super::*;
    use crate::config::{AppConfig, ScheduleConfig};
    use crate::controller::test_support::controller_with;
    use crate::device::test_support::{FakeCall, FakeDisplay};
    use crate::notification::test_support::RecordingSink;

    fn monday_config() -> AppConfig {
        AppConfig {
            schedule: ScheduleConfig {
                enabled: true,
                power_on: "08:00".to_string(),
                power_off: "20:00".to_string(),
                days: vec!["monday".to_string()],
                source_on_startup: "hdmi2".to_string(),
            },
            ..Default::default()
        }
    }

    // 2024-01-01 is a Monday.
    fn monday_at(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn setup(display: &FakeDisplay) -> (Watchdog, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let watchdog = Watchdog::new(controller_with(display, monday_config()), sink.clone());
        (watchdog, sink)
    }

    fn power_on_calls(display: &FakeDisplay) -> usize {
        display.count(|c| *c == FakeCall::SetPower(true))
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_during_schedule_is_powered_on() {
        let display = FakeDisplay::new();
        let (watchdog, sink) = setup(&display);

        assert_eq!(watchdog.tick_at(monday_at(10)).await, WatchdogOutcome::PoweredOn);
        assert_eq!(power_on_calls(&display), 1);
        assert_eq!(display.input(), Some(InputSource::Hdmi2));
        assert_eq!(watchdog.controller.state().power(), PowerState::On);
        assert_eq!(sink.titles(), vec!["Display switched back on"]);

        // The next tick finds everything in order
        assert_eq!(watchdog.tick_at(monday_at(10)).await, WatchdogOutcome::InSync);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_escalates_once_per_streak() {
        let display = FakeDisplay::new();
        display.set_reachable(false);
        let (watchdog, sink) = setup(&display);
        let state = watchdog.controller.state().clone();

        assert_eq!(
            watchdog.tick_at(monday_at(10)).await,
            WatchdogOutcome::Unreachable { streak: 1 }
        );
        assert_eq!(
            watchdog.tick_at(monday_at(10)).await,
            WatchdogOutcome::Unreachable { streak: 2 }
        );
        assert!(sink.sent().is_empty());

        assert_eq!(watchdog.tick_at(monday_at(10)).await, WatchdogOutcome::Escalated);
        assert_eq!(state.consecutive_failures(), 0);
        assert_eq!(sink.titles(), vec!["ALERT: display unreachable"]);
        assert!(sink.sent()[0].message.contains("3 attempts"));

        // A fresh streak is needed before the next alert
        watchdog.tick_at(monday_at(10)).await;
        watchdog.tick_at(monday_at(10)).await;
        assert_eq!(sink.sent().len(), 1);
        assert_eq!(power_on_calls(&display), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_limits_power_on_attempts() {
        let display = FakeDisplay::new();
        display.ignore_power_on(true);
        let (watchdog, _sink) = setup(&display);

        assert_eq!(watchdog.tick_at(monday_at(10)).await, WatchdogOutcome::PoweredOn);
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(watchdog.tick_at(monday_at(10)).await, WatchdogOutcome::CoolingDown);
        assert_eq!(power_on_calls(&display), 1);
        assert_eq!(watchdog.controller.state().consecutive_failures(), 0);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(watchdog.tick_at(monday_at(10)).await, WatchdogOutcome::PoweredOn);
        assert_eq!(power_on_calls(&display), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_powers_off_outside_schedule() {
        let display = FakeDisplay::new();
        display.set_power(json!("on"));
        let (watchdog, sink) = setup(&display);
        watchdog.controller.state().record_failure();

        assert_eq!(watchdog.tick_at(monday_at(22)).await, WatchdogOutcome::Tolerated);
        assert_eq!(display.count(|c| *c == FakeCall::SetPower(false)), 0);
        assert_eq!(watchdog.controller.state().consecutive_failures(), 1);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_state_resets_streak() {
        let display = FakeDisplay::new();
        let (watchdog, _sink) = setup(&display);
        watchdog.controller.state().record_failure();
        watchdog.controller.state().record_failure();

        assert_eq!(watchdog.tick_at(monday_at(22)).await, WatchdogOutcome::InSync);
        assert_eq!(watchdog.controller.state().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_streak_triggers_power_cycle() {
        let display = FakeDisplay::new();
        display.fail_next_probes(3);
        let (watchdog, sink) = setup(&display);

        assert_eq!(
            watchdog.tick_at(monday_at(10)).await,
            WatchdogOutcome::Failing { streak: 1 }
        );
        assert_eq!(
            watchdog.tick_at(monday_at(10)).await,
            WatchdogOutcome::Failing { streak: 2 }
        );
        assert_eq!(
            watchdog.tick_at(monday_at(10)).await,
            WatchdogOutcome::PowerCycled { recovered: true }
        );

        assert_eq!(display.count(|c| *c == FakeCall::SetPower(false)), 1);
        assert_eq!(power_on_calls(&display), 1);
        assert_eq!(display.input(), Some(InputSource::Hdmi2));
        assert_eq!(watchdog.controller.state().consecutive_failures(), 0);
        assert_eq!(sink.titles(), vec!["Display recovered"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_power_cycle_still_notifies() {
        let display = FakeDisplay::new();
        display.fail_probe(true);
        let (watchdog, sink) = setup(&display);

        for _ in 0..2 {
            watchdog.tick_at(monday_at(10)).await;
        }
        assert_eq!(
            watchdog.tick_at(monday_at(10)).await,
            WatchdogOutcome::PowerCycled { recovered: false }
        );
        assert_eq!(sink.titles(), vec!["ALERT: display recovery failed"]);
        assert_eq!(watchdog.controller.state().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_power_on_counts_and_notifies() {
        let display = FakeDisplay::new();
        display.fail_commands(true);
        let (watchdog, sink) = setup(&display);

        assert_eq!(
            watchdog.tick_at(monday_at(10)).await,
            WatchdogOutcome::PowerOnFailed { streak: 1 }
        );
        assert_eq!(sink.titles(), vec!["ALERT: display power-on failed"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_reading_takes_no_action() {
        let display = FakeDisplay::new();
        display.set_power(json!("standby"));
        let (watchdog, sink) = setup(&display);

        assert_eq!(watchdog.tick_at(monday_at(10)).await, WatchdogOutcome::Indeterminate);
        assert_eq!(power_on_calls(&display), 0);
        assert_eq!(watchdog.controller.state().consecutive_failures(), 0);
        assert!(sink.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ticks_on_interval_and_stops() {
        let display = FakeDisplay::new();
        let mut config = monday_config();
        config.schedule.enabled = false;
        config.watchdog.check_interval = 60;
        let sink = Arc::new(RecordingSink::default());
        let watchdog = Arc::new(Watchdog::new(controller_with(&display, config), sink));

        let cancel = CancellationToken::new();
        let handle = watchdog.start(cancel.clone());

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(display.count(|c| *c == FakeCall::GetPower), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_picks_up_new_interval() {
        let display = FakeDisplay::new();
        let mut config = monday_config();
        config.schedule.enabled = false;
        config.watchdog.check_interval = 600;
        let controller = controller_with(&display, config.clone());
        let watchdog = Arc::new(Watchdog::new(
            controller.clone(),
            Arc::new(RecordingSink::default()),
        ));

        let cancel = CancellationToken::new();
        let handle = watchdog.start(cancel.clone());
        tokio::task::yield_now().await;

        config.watchdog.check_interval = 10;
        controller.config().update(config).await.unwrap();
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(display.count(|c| *c == FakeCall::GetPower), 2);

        cancel.cancel();
        handle.await.unwrap();
    }
}
