use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::prelude::*;

/// Start up logging for test mode. Safe to call from every test; only the
/// first call installs the subscriber.
pub fn test_init() {
    let filter = EnvFilter::from_default_env().add_directive(LevelFilter::TRACE.into());

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_test_writer().with_filter(filter))
        .try_init();
}
