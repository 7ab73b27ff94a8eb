use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::{LogFormat, LoggingConfig};

/// Environment variable holding an `EnvFilter` directive that overrides the
/// configured level.
pub const LOG_ENV: &str = "CODERAG_LOG";

/// Install the global tracing subscriber.
///
/// `CODERAG_LOG` wins over `config.level`. Returns `false` when a subscriber
/// was already installed, which is not an error.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| default_filter(&config.level));

    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_ansi(false))
            .try_init()
            .is_ok(),
        LogFormat::Compact => registry.with(fmt::layer().compact()).try_init().is_ok(),
    }
}

fn default_filter(level: &str) -> EnvFilter {
    let directive = format!("coderag={level},warn");
    EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("coderag=info,warn"))
}
