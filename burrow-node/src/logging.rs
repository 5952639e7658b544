use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG` when set, else from `level`, else `info`.
pub fn build_filter(env: Option<&str>, level: &str) -> EnvFilter {
    env.and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Install the global fmt subscriber. Later calls are ignored.
pub fn init(level: &str) {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(env.as_deref(), level))
        .try_init();
}
