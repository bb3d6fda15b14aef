use tracing_subscriber::EnvFilter;

use crate::config::AppEnv;

/// Install the fmt subscriber. `RUST_LOG` wins over the profile default.
pub fn init_tracing(environment: AppEnv) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(environment.default_log_filter()));

    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
