//! Structured logging setup for Roomlink

use roomlink_config::SdkConfig;
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Initialize structured logging
///
/// This sets up:
/// - JSON formatted logs (for production)
/// - Environment-based log level filtering
/// - Component name tagging
pub fn init_logging(component: &str, default_level: &str) {
    tracing_subscriber::registry()
        .with(env_filter(default_level))
        .with(
            fmt::layer()
                .json()
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    tracing::info!(
        component = component,
        "Logging initialized"
    );
}

/// Initialize simple console logging (for development)
pub fn init_console_logging(component: &str, default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!(
        component = component,
        "Console logging initialized"
    );
}

/// Pick JSON or console output according to the SDK configuration
pub fn init_from_config(component: &str, config: &SdkConfig) {
    if config.json_logs {
        init_logging(component, config.log_level());
    } else {
        init_console_logging(component, config.log_level());
    }
}

/// Install a test subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs it.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_thread_names(true)
        .with_test_writer()
        .try_init();
}
