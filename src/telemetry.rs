use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber. `RUST_LOG` overrides the default `info` filter.
///
/// Safe to call more than once; later calls leave the first subscriber in place.
pub fn init_tracing(service_name: &str) {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init()
        .is_ok();

    if installed {
        tracing::info!(service = service_name, "logging initialized");
    }
}
