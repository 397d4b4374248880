//! Diagnostic tracing for srcpack.
//!
//! Output goes to stderr so stdout stays reserved for command results
//! (recipes, program lists, artifact paths).

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG` when set; otherwise logs at `info`, or `debug` when
/// `verbose` is true. Output: stderr, compact format.
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
