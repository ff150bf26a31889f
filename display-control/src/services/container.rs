//! Service container for dependency injection.
//!
//! The ServiceContainer owns every long-lived component of the process
//! and manages the lifecycle of the background loops.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::Result;
use crate::config::{ConfigService, ConfigUpdateEvent, next_config_event};
use crate::controller::DisplayController;
use crate::device::{ConnectPolicy, DeviceLink, MdcTransport, TcpMdcTransport};
use crate::logging::LoggingConfig;
use crate::notification::{NotificationService, NotificationSink};
use crate::scheduler::Scheduler;
use crate::status::StatusBroadcaster;
use crate::watchdog::Watchdog;

/// Lower bound for the shutdown timeout.
const MIN_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(45);

/// Headroom on top of the longest device operation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Service container holding all application services.
pub struct ServiceContainer {
    /// Configuration service.
    pub config_service: Arc<ConfigService>,
    /// Controller shared by the loops and manual control.
    pub controller: Arc<DisplayController>,
    /// Notification service.
    pub notifications: Arc<NotificationService>,
    /// Status snapshots for observers.
    pub status: StatusBroadcaster,
    transport: Arc<dyn MdcTransport>,
    logging: Option<Arc<LoggingConfig>>,
    watchdog: Arc<Watchdog>,
    scheduler: Arc<Scheduler>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ServiceContainer {
    /// Create a container talking MDC over TCP to the configured display.
    pub fn new(config_service: Arc<ConfigService>, logging: Option<Arc<LoggingConfig>>) -> Self {
        let transport = Arc::new(TcpMdcTransport::new(&config_service.current().display));
        Self::with_transport(config_service, transport, logging)
    }

    /// Create a container over an arbitrary transport.
    pub fn with_transport(
        config_service: Arc<ConfigService>,
        transport: Arc<dyn MdcTransport>,
        logging: Option<Arc<LoggingConfig>>,
    ) -> Self {
        info!("Initializing service container");

        let config = config_service.current();
        let status = StatusBroadcaster::new();
        let link = DeviceLink::new(transport.clone(), ConnectPolicy::default());
        let controller = Arc::new(DisplayController::new(
            link,
            config_service.clone(),
            Arc::new(status.clone()),
        ));

        let notifications = Arc::new(NotificationService::new(&config));
        let notifier: Arc<dyn NotificationSink> = notifications.clone();
        let watchdog = Arc::new(Watchdog::new(controller.clone(), notifier.clone()));
        let scheduler = Arc::new(Scheduler::new(controller.clone(), notifier));

        info!("Service container initialized");

        Self {
            config_service,
            controller,
            notifications,
            status,
            transport,
            logging,
            watchdog,
            scheduler,
            cancellation_token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Probe the display once and start the background loops.
    pub async fn start(&self) -> Result<()> {
        let config = self.config_service.current();
        info!(
            display = %config.display_label(),
            endpoint = %self.transport.endpoint(),
            "Starting services"
        );

        // Without a configured directive the filter from RUST_LOG stays
        let configured_filter = config.logging.as_ref().and_then(|l| l.filter.as_deref());
        if let (Some(logging), Some(filter)) = (&self.logging, configured_filter) {
            logging.apply_directive(Some(filter));
        }

        if self.controller.check_status().await {
            info!(power = %self.controller.state().power(), "Initial status check done");
        } else {
            warn!(power = %self.controller.state().power(), "Initial status check failed");
        }

        let token = self.cancellation_token.clone();
        let mut tasks = Vec::with_capacity(4);
        if let Some(handle) = self.notifications.start(token.clone()) {
            tasks.push(handle);
        }
        tasks.push(self.watchdog.clone().start(token.clone()));
        tasks.push(self.scheduler.clone().start(token.clone()));
        tasks.push(self.spawn_config_listener(token));

        self.tasks.lock().extend(tasks);
        info!("Services started");
        Ok(())
    }

    /// Apply config changes that are not re-read on every use.
    fn spawn_config_listener(&self, token: CancellationToken) -> JoinHandle<()> {
        let mut events = self.config_service.subscribe();
        let config_service = self.config_service.clone();
        let transport = self.transport.clone();
        let notifications = self.notifications.clone();
        let logging = self.logging.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = token.cancelled() => break,
                    event = next_config_event(&mut events) => event,
                };

                let config = config_service.current();
                if let Some(event) = event {
                    info!("{}", event.description());
                }
                let all = event.is_none();

                if all || event == Some(ConfigUpdateEvent::DisplayUpdated) {
                    transport.reconfigure(&config.display);
                    notifications.reload(&config);
                }
                if all || event == Some(ConfigUpdateEvent::NotificationsUpdated) {
                    notifications.reload(&config);
                }
                if all || event == Some(ConfigUpdateEvent::LoggingUpdated) {
                    if let Some(logging) = &logging {
                        logging.apply_directive(
                            config.logging.as_ref().and_then(|l| l.filter.as_deref()),
                        );
                    }
                }
            }
            debug!("Config listener stopped");
        })
    }

    /// Re-read the configuration file and apply what changed.
    ///
    /// An invalid file is rejected and the running configuration stays.
    pub async fn reload_config(&self) -> Result<Vec<ConfigUpdateEvent>> {
        match self.config_service.reload().await {
            Ok(events) => {
                info!(changes = events.len(), "Configuration reloaded");
                Ok(events)
            }
            Err(e) => {
                warn!("Configuration reload rejected: {}", e);
                Err(e)
            }
        }
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(self.shutdown_timeout()).await
    }

    /// Long enough for a power cycle in flight to finish.
    pub fn shutdown_timeout(&self) -> Duration {
        (self.controller.max_power_cycle_time() + SHUTDOWN_GRACE).max(MIN_SHUTDOWN_TIMEOUT)
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// Loops stop scheduling new work at once; an operation already in
    /// flight is allowed to finish within the timeout.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);
        self.cancellation_token.cancel();

        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let shutdown_result = tokio::time::timeout(timeout, async {
            for task in tasks {
                if let Err(e) = task.await {
                    warn!("Background task ended abnormally: {}", e);
                }
            }
        })
        .await;

        if shutdown_result.is_err() {
            warn!("Shutdown timeout reached, forcing shutdown");
        }

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
