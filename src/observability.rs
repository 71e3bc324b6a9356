use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. Debug mode gets human-readable
/// output; otherwise logs are emitted as flattened JSON lines.
pub fn init_tracing(log_level: &str, debug: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if debug {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .json()
                    .flatten_event(true),
            )
            .init();
    }
}
