//! Diagnostic tracing for the CLI.
//!
//! Developer diagnostics go to stderr and are filtered by `RUST_LOG`. The
//! installation report is a separate product artifact and is always written,
//! whatever the filter says.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the global subscriber. Defaults to `warn` when `RUST_LOG` is unset.
///
/// ```bash
/// RUST_LOG=shellshift_engine=debug shellshift apply
/// ```
pub(crate) fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
