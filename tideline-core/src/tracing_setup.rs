//! Tracing setup for Tideline
//!
//! The simulator logs through `tracing`; these helpers install a subscriber
//! for binaries and test suites that want to see the event stream.

use std::sync::Once;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

static TEST_TRACING: Once = Once::new();

/// Initialize console tracing at the given level.
///
/// `RUST_LOG` takes precedence over `console_level` when set.
///
/// # Errors
///
/// - `tracing_subscriber::util::TryInitError` - If a global subscriber is already installed
pub fn init_tracing(console_level: Level) -> Result<(), tracing_subscriber::util::TryInitError> {
    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(console_level.to_string()));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .with_filter(console_filter);

    tracing_subscriber::registry().with(console_layer).try_init()?;

    tracing::info!("Tracing initialized: console={}", console_level);

    Ok(())
}

/// Installs a test-writer subscriber once per process.
///
/// Output is captured by the test harness and only shown for failing tests.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tideline=debug"));

        let _ = tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_test_writer()
                    .with_target(true)
                    .with_filter(filter),
            )
            .try_init();
    });
}
