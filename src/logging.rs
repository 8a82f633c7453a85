//! Structured logging and tracing for pvwallbox
//!
//! Console output plus a daily rotated log file, both fed by `tracing`.
//! Components log through a [`StructuredLogger`] so every line carries the
//! component name and, where relevant, the wallbox slave id.

use crate::config::LoggingConfig;
use crate::error::{PvWallboxError, Result};
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Once;
use tracing::{Level, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod level;
mod structured;

pub use level::parse_log_level;
pub use structured::{
    LogContext, StructuredLogger, get_device_logger, get_logger, get_logger_with_context,
};

/// Setting this variable keeps all output on the console
pub const DISABLE_FILE_LOG_ENV: &str = "PVWALLBOX_DISABLE_FILE_LOG";

// Keep the non-blocking worker guard alive for the entire process lifetime
static LOG_GUARD: OnceCell<WorkerGuard> = OnceCell::new();
static INIT_ONCE: Once = Once::new();
static INIT_ERROR: OnceCell<String> = OnceCell::new();

/// Initialize logging system based on configuration
///
/// Safe to call more than once; only the first call installs the subscriber
/// and later calls report the outcome of that first attempt.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    INIT_ONCE.call_once(|| {
        let init_result = (|| -> Result<()> {
            let level = parse_log_level(&config.level)?;
            let filter = build_env_filter(level);

            if should_use_console_only() {
                init_console_only_logging(filter, config.json_format, level);
                return Ok(());
            }

            init_file_logging(config, filter, level)
        })();

        if let Err(e) = init_result {
            let _ = INIT_ERROR.set(e.to_string());
        }
    });

    if let Some(err) = INIT_ERROR.get() {
        return Err(PvWallboxError::config(err.clone()));
    }
    Ok(())
}

fn build_env_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "pvwallbox={},tokio_modbus=warn",
            level::directive_name(level)
        )
        .into()
    })
}

fn should_use_console_only() -> bool {
    cfg!(test) || std::env::var_os(DISABLE_FILE_LOG_ENV).is_some()
}

fn console_layer<S>(json_format: bool) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a> + 'static,
{
    let layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false);
    if json_format {
        layer.json().boxed()
    } else {
        layer.boxed()
    }
}

fn init_console_only_logging(filter: EnvFilter, json_format: bool, level: Level) {
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console_layer(json_format))
        .try_init();

    info!("Logging initialized - level: {:?}, console-only", level);
}

/// Directory that receives the rotated files: the parent of `file` when it
/// names a file, otherwise `file` itself
fn log_directory(file: &str) -> &Path {
    let p = Path::new(file);
    if p.extension().is_some() {
        match p.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    } else {
        p
    }
}

fn init_file_logging(config: &LoggingConfig, filter: EnvFilter, level: Level) -> Result<()> {
    let file_appender = rolling::Builder::new()
        .rotation(rolling::Rotation::DAILY)
        .filename_prefix("pvwallbox")
        .filename_suffix("log")
        .max_log_files(config.backup_count.max(1) as usize)
        .build(log_directory(&config.file))
        .map_err(|e| PvWallboxError::io(format!("Failed to create log file appender: {e}")))?;

    let (non_blocking_appender, guard) = non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    let file_layer = {
        let base = fmt::layer()
            .with_writer(non_blocking_appender)
            .with_ansi(false)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false);
        if config.json_format {
            base.json().boxed()
        } else {
            base.boxed()
        }
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);

    let init = if config.console_output {
        registry.with(console_layer(config.json_format)).try_init()
    } else {
        registry.try_init()
    };
    init.map_err(|e| PvWallboxError::config(format!("Failed to install subscriber: {e}")))?;

    info!(
        "Logging initialized - level: {:?}, file: {}",
        level, config.file
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn init_test_logging() {
        INIT.call_once(|| {
            let config = LoggingConfig::default();
            init_logging(&config).ok();
        });
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("info").unwrap(), Level::INFO);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("invalid").is_err());
    }

    #[test]
    fn test_log_context() {
        let context = LogContext::new("allocator")
            .with_device_id(2)
            .with_field("mode", "pv".to_string());

        assert_eq!(context.component, "allocator");
        assert_eq!(context.device_id, Some(2));
        assert_eq!(context.extra_fields.get("mode"), Some(&"pv".to_string()));
    }

    #[test]
    fn test_structured_logger() {
        init_test_logging();

        let logger = get_device_logger("test_component", 1);
        logger.info("Test info message");
        logger.debug("Test debug message");
        logger.warn("Test warning message");
        logger.error("Test error message");
    }

    #[test]
    fn test_for_device_keeps_component() {
        let logger = get_logger("driver").for_device(7);
        assert_eq!(logger.context.component, "driver");
        assert_eq!(logger.context.device_id, Some(7));
    }

    #[test]
    fn test_log_directory() {
        assert_eq!(log_directory("/var/log/pvwallbox.log"), Path::new("/var/log"));
        assert_eq!(log_directory("pvwallbox.log"), Path::new("."));
        assert_eq!(log_directory("/var/log/pvwallbox"), Path::new("/var/log/pvwallbox"));
    }
}
