//! Idempotent display operations.
//!
//! [`DisplayController`] is the single entry point for every action that
//! touches the display: the watchdog, the scheduler and manual control all
//! go through it. Operations are serialized per display and each one
//! updates the shared state and publishes a snapshot before returning.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use mdc_codec::InputSource;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::{Instant, sleep};
use tracing::{error, info, warn};

use crate::config::ConfigService;
use crate::device::{DeviceLink, MdcSession, PowerReading, REPLY_TIMEOUT};
use crate::schedule::ScheduleEvaluator;
use crate::state::{CommandKind, DisplayState, LastCommand, PowerState, SharedDisplayState};
use crate::status::{ScheduleStatus, StatusPublisher, StatusSnapshot};
use crate::{Error, Result};

/// Waits used by the multi-step sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timings {
    /// Minimum spacing between corrective power-on attempts.
    pub power_on_cooldown: Duration,
    /// Pause between power-on and selecting the input source.
    pub source_delay: Duration,
    /// Power cycle: time the display stays off.
    pub cycle_off_wait: Duration,
    /// Power cycle: boot time before selecting the source.
    pub cycle_boot_wait: Duration,
    /// Power cycle: settle time before the confirming probe.
    pub cycle_settle_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            power_on_cooldown: Duration::from_secs(60),
            source_delay: Duration::from_secs(3),
            cycle_off_wait: Duration::from_secs(10),
            cycle_boot_wait: Duration::from_secs(15),
            cycle_settle_wait: Duration::from_secs(3),
        }
    }
}

pub struct DisplayController {
    link: DeviceLink,
    state: SharedDisplayState,
    config: Arc<ConfigService>,
    publisher: Arc<dyn StatusPublisher>,
    timings: Timings,
    /// At most one device operation in flight.
    op_lock: AsyncMutex<()>,
    last_power_on_attempt: Mutex<Option<Instant>>,
}

impl DisplayController {
    pub fn new(
        link: DeviceLink,
        config: Arc<ConfigService>,
        publisher: Arc<dyn StatusPublisher>,
    ) -> Self {
        Self::with_timings(link, config, publisher, Timings::default())
    }

    pub fn with_timings(
        link: DeviceLink,
        config: Arc<ConfigService>,
        publisher: Arc<dyn StatusPublisher>,
        timings: Timings,
    ) -> Self {
        Self {
            link,
            state: SharedDisplayState::new(),
            config,
            publisher,
            timings,
            op_lock: AsyncMutex::new(()),
            last_power_on_attempt: Mutex::new(None),
        }
    }

    pub fn state(&self) -> &SharedDisplayState {
        &self.state
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    pub fn config(&self) -> &Arc<ConfigService> {
        &self.config
    }

    /// Whether a power-on was attempted within the cool-down window.
    pub fn power_on_cooling_down(&self) -> bool {
        self.last_power_on_attempt
            .lock()
            .is_some_and(|at| at.elapsed() < self.timings.power_on_cooldown)
    }

    /// Upper bound for [`power_cycle`](Self::power_cycle) against a display
    /// that never answers.
    pub fn max_power_cycle_time(&self) -> Duration {
        let policy = self.link.policy();
        let connect = policy.max_connect_time();
        let command = connect + REPLY_TIMEOUT;
        let force_wake = connect + policy.attempt_timeout() + policy.wake_wait() + command;

        command
            + self.timings.cycle_off_wait
            + force_wake
            + self.timings.cycle_boot_wait
            + REPLY_TIMEOUT
            + self.timings.cycle_settle_wait
            + command
    }

    /// Current status as published to observers.
    pub fn status(&self) -> StatusSnapshot {
        let config = self.config.current();
        let schedule = ScheduleStatus {
            enabled: config.schedule.enabled,
            in_schedule: ScheduleEvaluator::desired_power(
                &config.schedule,
                Local::now().naive_local(),
            ),
        };
        StatusSnapshot::from_state(&self.state.snapshot(), schedule)
    }

    /// Publish the current status to observers.
    pub fn publish(&self) {
        self.publisher.publish(self.status());
    }

    /// Turn the display on.
    ///
    /// With `force_wake`, a display that does not answer the handshake
    /// gets a blind power-on frame followed by a fresh connect sequence.
    pub async fn power_on(&self, force_wake: bool) -> bool {
        let _guard = self.op_lock.lock().await;
        let ok = self.do_power_on(force_wake).await;
        self.publish();
        ok
    }

    pub async fn power_off(&self) -> bool {
        let _guard = self.op_lock.lock().await;
        let ok = self.do_power_off().await;
        self.publish();
        ok
    }

    /// Select an input source by its configuration name.
    pub async fn set_input_source(&self, source: &str) -> bool {
        let _guard = self.op_lock.lock().await;
        let ok = match source.parse::<InputSource>() {
            Ok(source) => self.do_set_input_source(source).await,
            Err(e) => {
                error!("Cannot select input source: {}", e);
                self.state.update(|s| s.error_count += 1);
                false
            }
        };
        self.publish();
        ok
    }

    /// Probe the power state and record the result.
    ///
    /// Returns `false` when the display was unreachable or the probe failed.
    pub async fn check_status(&self) -> bool {
        let _guard = self.op_lock.lock().await;
        let ok = self.do_check_status().await;
        self.publish();
        ok
    }

    /// Full recovery sequence: off, wait, on, wait, select source, wait,
    /// probe. Ignores the power-on cool-down.
    ///
    /// Returns `true` if the display is confirmed on afterwards.
    pub async fn power_cycle(&self, source: InputSource) -> bool {
        let _guard = self.op_lock.lock().await;
        warn!(source = %source, "Starting power cycle recovery");

        if !self.do_power_off().await {
            warn!("Power off step of the power cycle failed, continuing");
        }
        sleep(self.timings.cycle_off_wait).await;

        let powered = self.do_power_on(true).await;
        sleep(self.timings.cycle_boot_wait).await;

        if powered {
            self.do_set_input_source(source).await;
            sleep(self.timings.cycle_settle_wait).await;
        }

        self.do_check_status().await;
        let recovered = self.state.power() == PowerState::On;
        self.state.update(|s| {
            s.last_command = Some(LastCommand {
                kind: CommandKind::PowerCycle,
                issued_at: Local::now(),
                succeeded: recovered,
            });
        });
        self.publish();

        if recovered {
            info!("Power cycle recovery succeeded");
        } else {
            error!(power = %self.state.power(), "Power cycle recovery failed");
        }
        recovered
    }

    async fn open(&self, force_wake: bool) -> Result<Box<dyn MdcSession>> {
        match self.link.connect().await {
            Ok(session) => Ok(session),
            Err(e) if force_wake && e.is_unreachable() => {
                warn!("Display not answering ({}), trying force wake", e);
                self.link.force_wake().await
            }
            Err(e) => Err(e),
        }
    }

    async fn do_power_on(&self, force_wake: bool) -> bool {
        *self.last_power_on_attempt.lock() = Some(Instant::now());
        self.state
            .update(|s| s.last_power_on_attempt_at = Some(Local::now()));

        let result: Result<()> = async {
            let mut session = self.open(force_wake).await?;
            session.set_power(true).await
        }
        .await;

        self.record_command(CommandKind::PowerOn { force_wake }, &result, |s| {
            s.power = PowerState::On;
            s.power_detail = None;
        });
        match result {
            Ok(()) => {
                info!(force_wake, "Display powered on");
                true
            }
            Err(e) => {
                error!(force_wake, "Failed to power on display: {}", e);
                false
            }
        }
    }

    async fn do_power_off(&self) -> bool {
        let result: Result<()> = async {
            let mut session = self.open(false).await?;
            session.set_power(false).await
        }
        .await;

        self.record_command(CommandKind::PowerOff, &result, |s| {
            s.power = PowerState::Off;
            s.power_detail = None;
        });
        match result {
            Ok(()) => {
                info!("Display powered off");
                true
            }
            Err(e) => {
                error!("Failed to power off display: {}", e);
                false
            }
        }
    }

    async fn do_set_input_source(&self, source: InputSource) -> bool {
        let result: Result<()> = async {
            let mut session = self.open(false).await?;
            session.set_input_source(source).await
        }
        .await;

        self.record_command(
            CommandKind::SetInputSource {
                source: source.name().to_string(),
            },
            &result,
            |s| s.input_source = Some(source.name().to_string()),
        );
        match result {
            Ok(()) => {
                info!(source = %source, "Input source selected");
                true
            }
            Err(e) => {
                error!(source = %source, "Failed to select input source: {}", e);
                false
            }
        }
    }

    async fn do_check_status(&self) -> bool {
        let result = match self.link.connect().await {
            Ok(mut session) => self.link.probe_power(session.as_mut()).await,
            Err(e) => Err(e),
        };
        let now = Local::now();

        match result {
            Ok(reading) => {
                self.state.update(|s| {
                    s.last_checked_at = Some(now);
                    match &reading {
                        PowerReading::On => {
                            s.power = PowerState::On;
                            s.power_detail = None;
                        }
                        PowerReading::Off => {
                            s.power = PowerState::Off;
                            s.power_detail = None;
                        }
                        PowerReading::Other(raw) => {
                            s.power = PowerState::Unknown;
                            s.power_detail = Some(raw.clone());
                        }
                    }
                });
                if let PowerReading::Other(raw) = &reading {
                    warn!(reading = %raw, "Display reported an unrecognized power state");
                }
                true
            }
            Err(Error::Unreachable(msg)) => {
                warn!("Display unreachable: {}", msg);
                self.state.update(|s| {
                    s.power = PowerState::Unreachable;
                    s.power_detail = None;
                    s.last_checked_at = Some(now);
                });
                false
            }
            Err(e) => {
                error!("Status probe failed: {}", e);
                self.state.update(|s| {
                    s.power = PowerState::Error;
                    s.power_detail = None;
                    s.last_checked_at = Some(now);
                    s.error_count += 1;
                });
                false
            }
        }
    }

    /// Record the outcome of a state-changing command in one update.
    fn record_command(
        &self,
        kind: CommandKind,
        result: &Result<()>,
        on_success: impl FnOnce(&mut DisplayState),
    ) {
        let now = Local::now();
        let succeeded = result.is_ok();
        self.state.update(|s| {
            if succeeded {
                on_success(s);
                s.last_checked_at = Some(now);
            } else {
                s.error_count += 1;
            }
            s.last_command = Some(LastCommand {
                kind,
                issued_at: now,
                succeeded,
            });
        });
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::test_support::controller_with;
    use super::*;
    use crate::config::AppConfig;
    use crate::device::test_support::{FakeCall, FakeDisplay};
    use crate::device::ConnectPolicy;
    use crate::status::StatusBroadcaster;

    #[tokio::test(start_paused = true)]
    async fn test_check_status_records_power() {
        let display = FakeDisplay::new();
        let controller = controller_with(&display, AppConfig::default());

        display.set_power(json!("ON"));
        assert!(controller.check_status().await);
        let state = controller.state().snapshot();
        assert_eq!(state.power, PowerState::On);
        assert!(state.last_checked_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_status_unreachable_and_error() {
        let display = FakeDisplay::new();
        let controller = controller_with(&display, AppConfig::default());

        display.set_reachable(false);
        assert!(!controller.check_status().await);
        assert_eq!(controller.state().power(), PowerState::Unreachable);
        assert_eq!(controller.state().snapshot().error_count, 0);

        display.set_reachable(true);
        display.fail_probe(true);
        assert!(!controller.check_status().await);
        assert_eq!(controller.state().power(), PowerState::Error);
        assert_eq!(controller.state().snapshot().error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_reading_is_unknown_with_detail() {
        let display = FakeDisplay::new();
        let controller = controller_with(&display, AppConfig::default());

        display.set_power(json!("Standby"));
        assert!(controller.check_status().await);
        let state = controller.state().snapshot();
        assert_eq!(state.power, PowerState::Unknown);
        assert_eq!(state.power_detail.as_deref(), Some("standby"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_on_without_force_wake_fails_when_unreachable() {
        let display = FakeDisplay::new();
        display.set_reachable(false);
        display.wake_on_blind_power_on(true);
        let controller = controller_with(&display, AppConfig::default());

        assert!(!controller.power_on(false).await);
        assert_eq!(display.count(|c| matches!(c, FakeCall::BlindPowerOn)), 0);
        let state = controller.state().snapshot();
        assert_eq!(state.error_count, 1);
        assert!(!state.last_command.unwrap().succeeded);
        assert!(controller.power_on_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_on_force_wake() {
        let display = FakeDisplay::new();
        display.set_reachable(false);
        display.wake_on_blind_power_on(true);
        let controller = controller_with(&display, AppConfig::default());

        assert!(controller.power_on(true).await);
        assert_eq!(display.count(|c| matches!(c, FakeCall::BlindPowerOn)), 1);
        assert_eq!(display.count(|c| *c == FakeCall::SetPower(true)), 1);
        assert_eq!(controller.state().power(), PowerState::On);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_expires() {
        let display = FakeDisplay::new();
        let controller = controller_with(&display, AppConfig::default());

        assert!(!controller.power_on_cooling_down());
        controller.power_on(false).await;
        assert!(controller.power_on_cooling_down());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(!controller.power_on_cooling_down());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_input_source() {
        let display = FakeDisplay::new();
        let controller = controller_with(&display, AppConfig::default());

        assert!(controller.set_input_source("HDMI2").await);
        assert_eq!(display.input(), Some(InputSource::Hdmi2));
        assert_eq!(controller.state().snapshot().input_source.as_deref(), Some("hdmi2"));

        assert!(!controller.set_input_source("scart").await);
        assert_eq!(controller.state().snapshot().error_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_cycle_sequence() {
        let display = FakeDisplay::new();
        display.set_power(json!(1));
        let controller = controller_with(&display, AppConfig::default());

        let started = Instant::now();
        assert!(controller.power_cycle(InputSource::Hdmi1).await);
        assert!(started.elapsed() >= Duration::from_secs(28));

        let commands: Vec<FakeCall> = display
            .calls()
            .into_iter()
            .filter(|c| !matches!(c, FakeCall::Open))
            .collect();
        assert_eq!(
            commands,
            vec![
                FakeCall::SetPower(false),
                FakeCall::SetPower(true),
                FakeCall::SetInput(InputSource::Hdmi1),
                FakeCall::GetPower,
            ]
        );
        let last = controller.state().snapshot().last_command.unwrap();
        assert_eq!(last.kind, CommandKind::PowerCycle);
        assert!(last.succeeded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_cycle_against_silent_display_stays_within_bound() {
        let display = FakeDisplay::new();
        display.stall_opens(true);
        let controller = controller_with(&display, AppConfig::default());

        let started = Instant::now();
        assert!(!controller.power_cycle(InputSource::Hdmi1).await);
        let elapsed = started.elapsed();

        // Every connect sequence ran into its attempt timeouts
        assert!(elapsed >= Duration::from_secs(100));
        assert!(elapsed <= controller.max_power_cycle_time());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_operation_publishes() {
        let display = FakeDisplay::new();
        let broadcaster = StatusBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        let controller = DisplayController::new(
            DeviceLink::new(display.transport(), ConnectPolicy::default()),
            Arc::new(ConfigService::in_memory(AppConfig::default())),
            Arc::new(broadcaster),
        );

        controller.check_status().await;
        controller.power_on(false).await;
        controller.power_off().await;

        assert_eq!(rx.recv().await.unwrap().power, PowerState::Off);
        assert_eq!(rx.recv().await.unwrap().power, PowerState::On);
        assert_eq!(rx.recv().await.unwrap().power, PowerState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn test_operations_are_serialized() {
        let display = FakeDisplay::new();
        let controller = controller_with(&display, AppConfig::default());

        let cycling = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.power_cycle(InputSource::Hdmi1).await })
        };
        tokio::task::yield_now().await;
        controller.check_status().await;
        cycling.await.unwrap();

        // The probe waits for the whole power cycle to finish
        let calls = display.calls();
        let first_probe = calls.iter().position(|c| *c == FakeCall::GetPower).unwrap();
        let input = calls
            .iter()
            .position(|c| matches!(c, FakeCall::SetInput(_)))
            .unwrap();
        assert!(first_probe > input);
        assert_eq!(display.count(|c| *c == FakeCall::GetPower), 2);
    }
}
