use tracing::level_filters::LevelFilter;
use tracing::warn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Install the global subscriber.
///
/// `log_level` is the default directive; `RUST_LOG` directives are layered on top.
/// Local environments get coloured human readable lines, everything else JSON.
pub fn init(log_level: &str, local: bool) {
    let parsed = parse_level(log_level);
    let filter = EnvFilter::builder()
        .with_default_directive(parsed.unwrap_or(LevelFilter::INFO).into())
        .from_env_lossy();

    let base_layer = fmt::layer().with_target(true).with_level(true);
    let layer = if local {
        base_layer.with_ansi(true).with_filter(filter).boxed()
    } else {
        base_layer
            .json()
            .with_current_span(true)
            .with_filter(filter)
            .boxed()
    };

    if let Err(e) = tracing_subscriber::registry().with(layer).try_init() {
        eprintln!("failed to install log subscriber: {e}");
        return;
    }

    if parsed.is_none() {
        warn!(log_level, "unknown log level, falling back to info");
    }
}

/// Accepts the usual tracing names plus `warning`, `fatal` and `panic`.
fn parse_level(raw: &str) -> Option<LevelFilter> {
    match raw.trim().to_lowercase().as_str() {
        "warning" => Some(LevelFilter::WARN),
        "fatal" | "panic" => Some(LevelFilter::ERROR),
        "disabled" => Some(LevelFilter::OFF),
        level => level.parse().ok(),
    }
}
