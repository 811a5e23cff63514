use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::conf::{LoggingConfig, OutputFormat};

/// Install the global subscriber. RUST_LOG wins over the configured level.
/// Returns false when a subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.level));

    let installed = match config.format {
        OutputFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
        OutputFormat::Pretty => {
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).try_init()
        }
    };

    installed.is_ok()
}
