use kiska_core::config::LoggingConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter directives: base level first, then per-crate overrides.
pub fn directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("warn")
    };
    std::iter::once(level.to_string())
        .chain(config.filters.iter().cloned())
        .collect::<Vec<_>>()
        .join(",")
}

/// Install the global subscriber. `RUST_LOG` wins over the config file.
pub fn init(config: &LoggingConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directives(config, verbose)));

    let json = config.format == "json";
    let layer = match (json, config.output.as_str()) {
        (true, "stdout") => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .boxed(),
        (true, _) => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed(),
        (false, "stdout") => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .boxed(),
        (false, _) => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).init();
}
