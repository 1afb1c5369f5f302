//! Structured logging configuration.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG`, falling back to [`DEFAULT_FILTER`].
///
/// # Example
///
/// ```no_run
/// use token_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log a slow storage round trip
///
/// Anything over `threshold_ms` is a warning, the rest is debug noise.
pub fn log_slow_operation(operation: &str, duration_ms: u64, threshold_ms: u64) {
    if duration_ms > threshold_ms {
        tracing::warn!(operation, duration_ms, threshold_ms, "Slow operation");
    } else {
        tracing::debug!(operation, duration_ms, "Operation timing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_log_slow_operation() {
        log_slow_operation("migrate", 50, 1000);
        log_slow_operation("migrate", 2000, 1000);
    }
}
