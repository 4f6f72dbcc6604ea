//! Tracing subscriber setup for services embedding the search subsystem.
//!
//! Filter directives come from `GOVSEARCH_LOG`, then `RUST_LOG`, then the
//! default `govcon_search=info,warn`. `GOVSEARCH_LOG_FORMAT=json` switches
//! to newline-delimited JSON output.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const DEFAULT_DIRECTIVES: &str = "govcon_search=info,warn";

/// Output format of the subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Parse a format name; anything other than `json` is [`LogFormat::Pretty`].
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("json") { Self::Json } else { Self::Pretty }
    }

    fn from_env() -> Self {
        std::env::var("GOVSEARCH_LOG_FORMAT").map(|v| Self::parse(&v)).unwrap_or(Self::Pretty)
    }
}

fn build_env_filter() -> EnvFilter {
    if let Ok(directives) = std::env::var("GOVSEARCH_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&directives) {
            return filter;
        }
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::new(DEFAULT_DIRECTIVES)
}

/// Install the global subscriber.
///
/// Returns `false` if a subscriber was already installed, which makes it
/// safe to call from tests and from services that configure tracing
/// themselves.
pub fn init_tracing() -> bool {
    let filter = build_env_filter();
    let result = match LogFormat::from_env() {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true).with_span_list(false))
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init(),
    };
    result.is_ok()
}
