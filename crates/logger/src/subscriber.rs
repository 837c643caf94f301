use std::env::var;

use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{
    Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt,
    util::TryInitError,
};

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    /// Format selected by `RUST_LOG_FORMAT`.
    pub fn from_env() -> Self {
        let log_format = var("RUST_LOG_FORMAT")
            .inspect_err(|error| {
                warn!("Failed to read RUST_LOG_FORMAT, falling back to default: {error}")
            })
            .unwrap_or_default();
        Self::parse(&log_format)
    }

    fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

pub fn init() {
    init_with_level(LevelFilter::INFO);
}

/// Install the global subscriber with `level` as the default directive.
///
/// Panics if a global subscriber is already installed; see [`try_init`].
pub fn init_with_level(level: LevelFilter) {
    if let Err(error) = try_init(level) {
        panic!("tracing subscriber already initialised: {error}");
    }
}

/// Like [`init_with_level`], but reports an already installed subscriber
/// instead of panicking.
pub fn try_init(level: LevelFilter) -> Result<(), TryInitError> {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let log_layer = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .without_time()
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(log_layer).try_init()
}
