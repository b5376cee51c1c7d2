//! Logging setup
//!
//! `RUST_LOG` wins when set; otherwise SwarmWiki crates log at `info` and
//! everything else at `warn`.

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use swarmwiki_core::{SwarmError, SwarmResult};

/// Filter used when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "warn,swarmwiki=info";

/// Selects the output format through `SWARMWIKI_LOG_FORMAT`
pub const ENV_LOG_FORMAT: &str = "SWARMWIKI_LOG_FORMAT";

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// `SWARMWIKI_LOG_FORMAT`, pretty when unset
    pub fn from_env() -> SwarmResult<Self> {
        match std::env::var(ENV_LOG_FORMAT) {
            Ok(value) => value.parse(),
            Err(_) => Ok(LogFormat::default()),
        }
    }
}

impl FromStr for LogFormat {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(SwarmError::Config(format!("unknown log format {other:?}"))),
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(format: LogFormat) -> SwarmResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.map_err(|e| SwarmError::Config(format!("logging: {e}")))
}
