//! Tracing bootstrap

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "kyc_dsl=info,kyc_dsl_core=info";

/// Install a fmt subscriber filtered by `RUST_LOG`. Calling it again after a
/// subscriber is installed does nothing.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
