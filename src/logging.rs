//! Logging and tracing initialization.

use crate::config::LoggingConfig;

use tracing_subscriber::{EnvFilter, fmt};

/// Filter directives for a configured level. A bare level such as `"debug"`
/// applies to this crate only, dependencies stay at `warn`. Anything that
/// already names targets is used as given.
fn default_directives(level: &str) -> String {
    let level = level.trim();
    if level.contains('=') || level.contains(',') {
        level.to_string()
    } else {
        format!("warn,volume_sequence={level}")
    }
}

/// Installs the global subscriber, writing to stderr so that CSV output on
/// stdout stays clean. `RUST_LOG` takes precedence over the configured level.
pub fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(&config.level)));

    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    let installed = if config.json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.with_target(false).compact().finish())
    };
    if installed.is_err() {
        eprintln!("a tracing subscriber is already installed");
    }
}
