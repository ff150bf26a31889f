//! Logging setup with a reloadable filter.
//!
//! Console and daily-rolled file output, both stamped in the local timezone.
//! The filter directive can be swapped at runtime so a config reload can
//! change verbosity without restarting the service.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::Writer, time::FormatTime},
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
};

/// Default log filter directive.
pub const DEFAULT_LOG_FILTER: &str = "display_control=info,mdc_codec=info,reqwest=warn";

/// File name prefix for the rolling log appender.
const LOG_FILE_PREFIX: &str = "display-control.log";

/// Timer that formats timestamps in the server's local timezone.
#[derive(Debug, Clone, Copy)]
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> std::fmt::Result {
        let now = Local::now();
        write!(w, "{}", now.format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

/// Type alias for the reload handle.
pub type FilterHandle = Handle<EnvFilter, tracing_subscriber::Registry>;

/// Handle to the live logging configuration.
pub struct LoggingConfig {
    handle: FilterHandle,
    log_dir: PathBuf,
    /// Filter in effect at startup, from `RUST_LOG` or the default.
    initial_filter: String,
}

impl LoggingConfig {
    /// Get the current filter directive string.
    pub fn get_filter(&self) -> String {
        self.handle
            .with_current(|filter| filter.to_string())
            .unwrap_or_default()
    }

    /// Set a new filter directive, e.g. `display_control=debug`.
    pub fn set_filter(&self, directive: &str) -> crate::Result<()> {
        let new_filter = EnvFilter::try_new(directive)
            .map_err(|e| crate::Error::config(format!("Invalid filter directive: {}", e)))?;

        self.handle
            .reload(new_filter)
            .map_err(|e| crate::Error::Other(format!("Failed to reload filter: {}", e)))?;

        info!(directive = %directive, "Log filter updated");
        Ok(())
    }

    /// Apply the filter directive from the configuration, if any.
    ///
    /// Falls back to the startup filter when the directive is removed.
    /// Never fails: a bad directive is logged and the previous filter stays.
    pub fn apply_directive(&self, directive: Option<&str>) {
        let directive = match directive.map(str::trim) {
            Some(d) if !d.is_empty() => d,
            _ => self.initial_filter.as_str(),
        };
        if self.get_filter() == directive {
            return;
        }
        if let Err(e) = self.set_filter(directive) {
            warn!(error = %e, "Failed to apply configured log filter");
        }
    }

    /// Get the log directory path.
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}

/// Initialize logging.
///
/// Returns the logging handle and the appender guard; keep the guard alive
/// for the lifetime of the process or buffered file output is lost.
pub fn init_logging(log_dir: &str) -> crate::Result<(Arc<LoggingConfig>, WorkerGuard)> {
    let log_path = PathBuf::from(log_dir);
    std::fs::create_dir_all(&log_path)?;

    let file_appender = tracing_appender::rolling::daily(&log_path, LOG_FILE_PREFIX);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let initial_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let initial_directive = initial_filter.to_string();
    let (filter_layer, filter_handle) = reload::Layer::new(initial_filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_ansi(true).with_timer(LocalTimer))
        .with(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_timer(LocalTimer),
        )
        .try_init()
        .map_err(|e| {
            crate::Error::Other(format!("Failed to set global default subscriber: {}", e))
        })?;

    let config = Arc::new(LoggingConfig {
        handle: filter_handle,
        log_dir: log_path,
        initial_filter: initial_directive,
    });

    Ok((config, guard))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert!(DEFAULT_LOG_FILTER.contains("display_control=info"));
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }

    #[test]
    fn test_reload_handle_swaps_filter() {
        let (layer, handle) = reload::Layer::<EnvFilter, tracing_subscriber::Registry>::new(
            EnvFilter::new(DEFAULT_LOG_FILTER),
        );
        let _subscriber = tracing_subscriber::registry().with(layer);
        let config = LoggingConfig {
            handle,
            log_dir: PathBuf::from("logs"),
            initial_filter: EnvFilter::new(DEFAULT_LOG_FILTER).to_string(),
        };

        config.set_filter("display_control=debug").unwrap();
        assert_eq!(config.get_filter(), "display_control=debug");

        assert!(config.set_filter("display_control=notalevel").is_err());
        assert_eq!(config.get_filter(), "display_control=debug");

        config.apply_directive(None);
        assert_eq!(config.get_filter(), EnvFilter::new(DEFAULT_LOG_FILTER).to_string());
    }

    #[test]
    fn test_cleared_directive_restores_startup_filter() {
        let startup = EnvFilter::new("display_control=trace,mdc_codec=debug");
        let startup_directive = startup.to_string();
        let (layer, handle) =
            reload::Layer::<EnvFilter, tracing_subscriber::Registry>::new(startup);
        let _subscriber = tracing_subscriber::registry().with(layer);
        let config = LoggingConfig {
            handle,
            log_dir: PathBuf::from("logs"),
            initial_filter: startup_directive.clone(),
        };

        config.apply_directive(Some("display_control=warn"));
        assert_eq!(config.get_filter(), "display_control=warn");

        config.apply_directive(Some("  "));
        assert_eq!(config.get_filter(), startup_directive);
        assert_ne!(config.get_filter(), EnvFilter::new(DEFAULT_LOG_FILTER).to_string());
    }
}
