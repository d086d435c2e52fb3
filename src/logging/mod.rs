use slog::{o, Drain, Logger};
use slog_async::Async;
use slog_term::{FullFormat, TermDecorator};

/// Configuration for setting up the activity logger
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub async_buffer_size: usize,
    pub use_color: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            async_buffer_size: 1024,
            use_color: true,
        }
    }
}

/// Sets up a terminal logger backed by an async drain
pub fn setup_logger(config: LoggerConfig) -> Logger {
    let decorator = {
        let builder = TermDecorator::new();
        let builder = if config.use_color {
            builder.force_color()
        } else {
            builder.force_plain()
        };
        builder.build()
    };

    let drain = FullFormat::new(decorator).build().fuse();

    let drain = Async::new(drain)
        .chan_size(config.async_buffer_size)
        .build()
        .fuse();

    Logger::root(
        drain,
        o!("service" => "asset-tracker-api", "version" => env!("CARGO_PKG_VERSION")),
    )
}

/// Logger that drops every record. Used by tests and tools that do not care
/// about the activity trail.
pub fn discard_logger() -> Logger {
    Logger::root(slog::Discard, o!())
}
