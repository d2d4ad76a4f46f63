use tracing_subscriber::{prelude::*, EnvFilter};

const DEFAULT_FILTER: &str = "warn";

/// Installs a stderr fmt subscriber. `RUST_LOG` overrides the default filter.
///
/// Stdout is left for the per-send report lines.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
