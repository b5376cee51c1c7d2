//! Node configuration
//!
//! Both roles start from `Default` and may be overridden from the
//! environment:
//!
//! - `SWARMWIKI_QUORUM` - matching answers required to accept a response
//! - `SWARMWIKI_REQUEST_TIMEOUT` - humantime duration, or `none`
//! - `SWARMWIKI_BROADCAST_LINGER` - how long late answers are still counted
//! - `SWARMWIKI_SWEEP_INTERVAL` - how often a proxy retires seeds
//! - `SWARMWIKI_IDLE_TTL` - idle time after which a seed is retired
//! - `SWARMWIKI_MEDIA_CONCURRENCY` - parallel media downloads per build

use std::time::Duration;

use swarmwiki_core::{SwarmError, SwarmResult};

pub const ENV_QUORUM: &str = "SWARMWIKI_QUORUM";
pub const ENV_REQUEST_TIMEOUT: &str = "SWARMWIKI_REQUEST_TIMEOUT";
pub const ENV_BROADCAST_LINGER: &str = "SWARMWIKI_BROADCAST_LINGER";
pub const ENV_SWEEP_INTERVAL: &str = "SWARMWIKI_SWEEP_INTERVAL";
pub const ENV_IDLE_TTL: &str = "SWARMWIKI_IDLE_TTL";
pub const ENV_MEDIA_CONCURRENCY: &str = "SWARMWIKI_MEDIA_CONCURRENCY";

/// Client configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Matching answers needed before a response is accepted
    pub quorum: usize,
    /// Give up on a request after this long; `None` waits forever
    pub request_timeout: Option<Duration>,
    /// After delivery, a broadcast keeps counting late answers for this
    /// long before releasing its sends
    pub broadcast_linger: Duration,
    /// How long a freshly connected peer has to answer the probe
    pub handshake_timeout: Duration,
    /// Requests allowed to wait for the first proxy
    pub max_queued_requests: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            quorum: 1,
            request_timeout: Some(Duration::from_secs(60)),
            broadcast_linger: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(10),
            max_queued_requests: 1024,
        }
    }
}

impl ClientConfig {
    /// Defaults overridden by `SWARMWIKI_*` variables
    pub fn from_env() -> SwarmResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SwarmResult<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_QUORUM) {
            config.quorum = parse_count(ENV_QUORUM, &value)?;
        }
        if let Some(value) = lookup(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = parse_optional_duration(ENV_REQUEST_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_BROADCAST_LINGER) {
            config.broadcast_linger = parse_duration(ENV_BROADCAST_LINGER, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SwarmResult<()> {
        if self.quorum == 0 {
            return Err(SwarmError::Config("quorum must be at least 1".into()));
        }
        if self.max_queued_requests == 0 {
            return Err(SwarmError::Config("request queue cannot be empty".into()));
        }
        Ok(())
    }
}

/// Proxy configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProxyConfig {
    /// Seed sweep period
    pub sweep_interval: Duration,
    /// Seeds without upload activity for this long are retired
    pub idle_ttl: Duration,
    /// Media downloads in flight per build
    pub media_concurrency: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(10),
            idle_ttl: Duration::from_secs(120),
            media_concurrency: 8,
        }
    }
}

impl ProxyConfig {
    pub fn from_env() -> SwarmResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SwarmResult<Self> {
        let mut config = Self::default();
        if let Some(value) = lookup(ENV_SWEEP_INTERVAL) {
            config.sweep_interval = parse_duration(ENV_SWEEP_INTERVAL, &value)?;
        }
        if let Some(value) = lookup(ENV_IDLE_TTL) {
            config.idle_ttl = parse_duration(ENV_IDLE_TTL, &value)?;
        }
        if let Some(value) = lookup(ENV_MEDIA_CONCURRENCY) {
            config.media_concurrency = parse_count(ENV_MEDIA_CONCURRENCY, &value)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SwarmResult<()> {
        if self.sweep_interval.is_zero() {
            return Err(SwarmError::Config("sweep interval must be positive".into()));
        }
        if self.media_concurrency == 0 {
            return Err(SwarmError::Config("media concurrency must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_count(name: &str, value: &str) -> SwarmResult<usize> {
    value
        .trim()
        .parse()
        .map_err(|e| SwarmError::Config(format!("{name}={value:?}: {e}")))
}

fn parse_duration(name: &str, value: &str) -> SwarmResult<Duration> {
    humantime::parse_duration(value.trim())
        .map_err(|e| SwarmError::Config(format!("{name}={value:?}: {e}")))
}

fn parse_optional_duration(name: &str, value: &str) -> SwarmResult<Option<Duration>> {
    if value.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    parse_duration(name, value).map(Some)
}
