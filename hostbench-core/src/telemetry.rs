use once_cell::sync::OnceCell;
use tracing_subscriber::{
    EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

static TRACING: OnceCell<()> = OnceCell::new();

/// Installs a test-friendly subscriber once per process.
///
/// `RUST_LOG` overrides the default `hostbench=info` filter. Output goes
/// through the test writer so it is captured per test.
pub fn init_test_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("hostbench=info"));

        // Another subscriber may already be installed by the host crate.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
