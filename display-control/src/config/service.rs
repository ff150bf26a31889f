//! Configuration service implementation.
//!
//! The ConfigService owns the current configuration snapshot, persists
//! updates to disk and broadcasts events when sections change.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{ConfigEventBroadcaster, ConfigUpdateEvent};
use super::model::AppConfig;
use crate::{Error, Result};

/// Configuration service providing snapshot access to the settings.
///
/// Readers get an `Arc<AppConfig>` and never observe a half-applied update.
pub struct ConfigService {
    path: Option<PathBuf>,
    current: RwLock<Arc<AppConfig>>,
    broadcaster: ConfigEventBroadcaster,
}

impl ConfigService {
    /// Load the configuration file, writing the defaults first if it does
    /// not exist.
    ///
    /// A file that fails validation is still loaded: the problems are
    /// logged and individual consumers fail closed on the bad fields.
    pub async fn load_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let config = if tokio::fs::try_exists(&path).await? {
            read_config(&path).await?
        } else {
            info!("Configuration file {} not found, creating defaults", path.display());
            let config = AppConfig::default();
            write_config(&path, &config).await?;
            config
        };

        if let Err(e) = config.validate() {
            warn!("Loaded configuration has problems: {}", e);
        }

        Ok(Self {
            path: Some(path),
            current: RwLock::new(Arc::new(config)),
            broadcaster: ConfigEventBroadcaster::new(),
        })
    }

    /// Service with no backing file. Updates only live in memory.
    pub fn in_memory(config: AppConfig) -> Self {
        Self {
            path: None,
            current: RwLock::new(Arc::new(config)),
            broadcaster: ConfigEventBroadcaster::new(),
        }
    }

    /// Current configuration snapshot.
    pub fn current(&self) -> Arc<AppConfig> {
        self.current.read().clone()
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Validate, persist and apply a new configuration.
    ///
    /// Returns the events that were published.
    pub async fn update(&self, config: AppConfig) -> Result<Vec<ConfigUpdateEvent>> {
        config.validate()?;

        if let Some(path) = &self.path {
            write_config(path, &config).await?;
        }

        Ok(self.apply(config))
    }

    /// Re-read the backing file. An invalid file is rejected and the
    /// current snapshot is kept.
    pub async fn reload(&self) -> Result<Vec<ConfigUpdateEvent>> {
        let Some(path) = &self.path else {
            return Err(Error::config("no configuration file to reload"));
        };
        let config = read_config(path).await?;
        config.validate()?;
        Ok(self.apply(config))
    }

    fn apply(&self, config: AppConfig) -> Vec<ConfigUpdateEvent> {
        let new = Arc::new(config);
        let old = std::mem::replace(&mut *self.current.write(), new.clone());

        let events = ConfigUpdateEvent::diff(&old, &new);
        for event in &events {
            self.broadcaster.publish(*event);
        }
        debug!("Applied configuration, {} section(s) changed", events.len());
        events
    }

    /// Subscribe to configuration update events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigUpdateEvent> {
        self.broadcaster.subscribe()
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.broadcaster.subscriber_count()
    }
}

async fn read_config(path: &Path) -> Result<AppConfig> {
    let raw = tokio::fs::read_to_string(path).await?;
    serde_json::from_str(&raw)
        .map_err(|e| Error::config(format!("failed to parse {}: {}", path.display(), e)))
}

async fn write_config(path: &Path, config: &AppConfig) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(config)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let service = ConfigService::load_or_create(&path).await.unwrap();
        assert!(path.exists());
        assert_eq!(*service.current(), AppConfig::default());

        let reloaded = ConfigService::load_or_create(&path).await.unwrap();
        assert_eq!(*reloaded.current(), AppConfig::default());
    }

    #[tokio::test]
    async fn test_update_persists_and_broadcasts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let service = ConfigService::load_or_create(&path).await.unwrap();
        let mut rx = service.subscribe();

        let mut config = (*service.current()).clone();
        config.watchdog.check_interval = 30;
        let events = service.update(config).await.unwrap();

        assert_eq!(events, vec![ConfigUpdateEvent::WatchdogUpdated]);
        assert_eq!(rx.recv().await.unwrap(), ConfigUpdateEvent::WatchdogUpdated);
        assert_eq!(service.current().watchdog.check_interval, 30);

        let on_disk: AppConfig =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.watchdog.check_interval, 30);
    }

    #[tokio::test]
    async fn test_invalid_update_rejected() {
        let service = ConfigService::in_memory(AppConfig::default());
        let mut config = AppConfig::default();
        config.schedule.power_off = "25:00".to_string();

        assert!(service.update(config).await.is_err());
        assert_eq!(service.current().schedule.power_off, "20:00");
    }

    #[tokio::test]
    async fn test_reload_picks_up_external_edit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let service = ConfigService::load_or_create(&path).await.unwrap();

        let mut edited = AppConfig::default();
        edited.schedule.power_on = "07:15".to_string();
        std::fs::write(&path, serde_json::to_string(&edited).unwrap()).unwrap();

        let events = service.reload().await.unwrap();
        assert_eq!(events, vec![ConfigUpdateEvent::ScheduleUpdated]);
        assert_eq!(service.current().schedule.power_on, "07:15");
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(ConfigService::load_or_create(&path).await.is_err());
    }
}
