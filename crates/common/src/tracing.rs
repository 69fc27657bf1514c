use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

const DEFAULT_DIRECTIVES: &str = "dapp_core=info,dapp_common=info";

/// Installs the global fmt subscriber. `RUST_LOG` overrides the default
/// directives. Calling this more than once is harmless; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .finish()
        .try_init();
}
