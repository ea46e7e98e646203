//! Structured logging for the transform library and CLI
//!
//! Console and daily-rolled JSON file output through `tracing-subscriber`,
//! per-component levels, and per-thread correlation ids and tile context so
//! that parallel batch runs can be told apart.

pub mod config;
pub mod spans;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

pub use config::LoggingConfig;
pub use spans::{ChainSpan, EstimationSpan};

thread_local! {
    static CORRELATION_ID: std::cell::RefCell<Option<Uuid>> = const { std::cell::RefCell::new(None) };
}

/// Tile currently being processed by this thread
#[derive(Debug, Clone, PartialEq)]
pub struct TileContext {
    pub tile_id: String,
    pub z: Option<f64>,
}

thread_local! {
    static TILE_CONTEXT: std::cell::RefCell<Option<TileContext>> = const { std::cell::RefCell::new(None) };
}

/// Keeps the file writer flushing; drop it only at shutdown.
#[must_use]
pub struct LoggingGuard {
    _file: Option<WorkerGuard>,
}

fn crate_target() -> String {
    env!("CARGO_PKG_NAME").replace('-', "_")
}

/// Filter directives for the global level plus each component module.
pub fn filter_directives(config: &LoggingConfig) -> String {
    let target = crate_target();
    let mut directives = vec![format!("{}={}", target, config.global_level)];
    for component in config::COMPONENTS {
        directives.push(format!(
            "{}::{}={}",
            target,
            component,
            config.get_component_level(component)
        ));
    }
    directives.join(",")
}

/// Initialize the logging system with the provided configuration
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingGuard> {
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid logging configuration")?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(config)));

    let mut layers = Vec::new();
    let mut file_guard = None;

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(config.include_file_location)
            .with_file(config.include_file_location)
            .with_writer(std::io::stderr);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_dir) = config.log_directory {
        let file_appender = tracing_appender::rolling::daily(log_dir, &config.file_prefix);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .json();
        layers.push(file_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(layers)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    tracing::debug!(?config, "Logging system initialized");
    Ok(LoggingGuard { _file: file_guard })
}

/// Set a correlation ID for the current thread
pub fn set_correlation_id(id: Uuid) {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = Some(id);
    });
}

/// Get the current correlation ID for this thread
pub fn get_correlation_id() -> Option<Uuid> {
    CORRELATION_ID.with(|correlation_id| *correlation_id.borrow())
}

/// Generate a new correlation ID and set it for the current thread
pub fn new_correlation_id() -> Uuid {
    let id = Uuid::new_v4();
    set_correlation_id(id);
    id
}

pub fn clear_correlation_id() {
    CORRELATION_ID.with(|correlation_id| {
        *correlation_id.borrow_mut() = None;
    });
}

pub fn set_tile_context(context: TileContext) {
    TILE_CONTEXT.with(|tile_context| {
        *tile_context.borrow_mut() = Some(context);
    });
}

pub fn get_tile_context() -> Option<TileContext> {
    TILE_CONTEXT.with(|tile_context| tile_context.borrow().clone())
}

pub fn clear_tile_context() {
    TILE_CONTEXT.with(|tile_context| {
        *tile_context.borrow_mut() = None;
    });
}

/// Create a span with correlation ID automatically included
#[macro_export]
macro_rules! correlation_span {
    ($level:expr, $name:expr) => {
        if let Some(correlation_id) = $crate::logging::get_correlation_id() {
            tracing::span!($level, $name, correlation_id = %correlation_id)
        } else {
            tracing::span!($level, $name)
        }
    };
    ($level:expr, $name:expr, $($field:tt)*) => {
        if let Some(correlation_id) = $crate::logging::get_correlation_id() {
            tracing::span!($level, $name, correlation_id = %correlation_id, $($field)*)
        } else {
            tracing::span!($level, $name, $($field)*)
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_management() {
        assert!(get_correlation_id().is_none());

        let id = new_correlation_id();
        assert_eq!(get_correlation_id(), Some(id));

        clear_correlation_id();
        assert!(get_correlation_id().is_none());
    }

    #[tracing_test::traced_test]
    #[test]
    fn test_correlation_span_carries_the_id() {
        let id = new_correlation_id();
        let span = crate::correlation_span!(tracing::Level::INFO, "tile", tile_id = "t-1");
        span.in_scope(|| tracing::info!("inside tile"));
        clear_correlation_id();

        let span = crate::correlation_span!(tracing::Level::INFO, "tile");
        span.in_scope(|| tracing::info!("without correlation"));

        assert!(logs_contain(&id.to_string()));
        assert!(logs_contain("t-1"));
        assert!(logs_contain("without correlation"));
    }

    #[test]
    fn test_tile_context_is_per_thread() {
        set_tile_context(TileContext {
            tile_id: "151215054802004008.3020.0".to_string(),
            z: Some(3020.0),
        });
        let other = std::thread::spawn(get_tile_context).join().unwrap();
        assert!(other.is_none());
        assert_eq!(get_tile_context().map(|c| c.tile_id).as_deref(), Some("151215054802004008.3020.0"));
        clear_tile_context();
        assert!(get_tile_context().is_none());
    }

    #[test]
    fn test_filter_directives_cover_components() {
        let directives = filter_directives(&LoggingConfig::development());
        assert!(directives.starts_with("render_transform=debug"));
        assert!(directives.contains("render_transform::transform=trace"));
        assert!(directives.contains("render_transform::estimate=debug"));
    }

    #[test]
    fn test_invalid_config_is_rejected_before_install() {
        let config = LoggingConfig {
            global_level: "chatty".to_string(),
            ..LoggingConfig::default()
        };
        assert!(init_logging(&config).is_err());
    }
}
