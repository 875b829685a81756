//! Hub configuration. Constructible directly or from `FLOOR_*` environment
//! variables, mirroring the `RateLimitConfig::from_env` convention: an unset
//! or unparsable value silently falls back to the documented default rather
//! than failing construction.

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::envelope::PROTOCOL_VERSION;

/// Configuration accepted at `FloorManager` construction.
pub struct FloorManagerConfig {
    /// URI placed in the `sender` field of every envelope the Hub synthesizes.
    pub hub_speaker_uri: String,
    /// Acceptable `schema.version` strings. Defaults to `{"1.1.0"}`.
    pub supported_schema_versions: HashSet<String>,
    /// Upper bound on a conversation's pending request queue. Defaults to 128.
    pub max_queue_depth: usize,
    /// Duration after which an un-yielded grant is revoked with `@timeout`.
    /// Unset means no timeout.
    pub default_grant_timeout: Option<Duration>,
    /// Cadence at which the embedding is expected to invoke `tick`. The core
    /// never self-schedules; this value is informational for the embedding.
    pub tick_interval: Option<Duration>,
}

impl Default for FloorManagerConfig {
    fn default() -> Self {
        Self {
            hub_speaker_uri: "urn:floor-manager:hub".to_string(),
            supported_schema_versions: [PROTOCOL_VERSION.to_string()].into_iter().collect(),
            max_queue_depth: 128,
            default_grant_timeout: None,
            tick_interval: None,
        }
    }
}

impl FloorManagerConfig {
    /// Build a config from environment variables, falling back to
    /// [`FloorManagerConfig::default`] field-by-field on anything unset or
    /// unparsable.
    ///
    /// Recognized variables:
    /// - `FLOOR_HUB_SPEAKER_URI`
    /// - `FLOOR_SUPPORTED_SCHEMA_VERSIONS` (comma-separated)
    /// - `FLOOR_MAX_QUEUE_DEPTH`
    /// - `FLOOR_DEFAULT_GRANT_TIMEOUT_SECS`
    /// - `FLOOR_TICK_INTERVAL_SECS`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("FLOOR_HUB_SPEAKER_URI")
            && !val.trim().is_empty()
        {
            config.hub_speaker_uri = val;
        }

        if let Ok(val) = env::var("FLOOR_SUPPORTED_SCHEMA_VERSIONS") {
            let versions: HashSet<String> =
                val.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect();
            if !versions.is_empty() {
                config.supported_schema_versions = versions;
            }
        }

        if let Ok(val) = env::var("FLOOR_MAX_QUEUE_DEPTH")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_queue_depth = n;
        }

        if let Ok(val) = env::var("FLOOR_DEFAULT_GRANT_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.default_grant_timeout = Some(Duration::from_secs(n));
        }

        if let Ok(val) = env::var("FLOOR_TICK_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.tick_interval = Some(Duration::from_secs(n));
        }

        config
    }
}
