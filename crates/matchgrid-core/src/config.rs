//! Store configuration parser.
//!
//! ```toml
//! [state]
//! pending_release_timeout = "60s"
//! backfill_ttl_ratio = 0.8
//!
//! [pool]
//! max_size = 10
//! connect_timeout = "5s"
//! idle_max = 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StoreConfig {
    pub state: StateSettings,
    pub pool: PoolSettings,
}

/// Expiry policy for acknowledged backfills.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateSettings {
    /// How long tickets stay pending before release (e.g., "60s").
    #[serde(with = "duration_str")]
    pub pending_release_timeout: Duration,
    /// Fraction of `pending_release_timeout` after which an unacknowledged
    /// backfill counts as expired.
    pub backfill_ttl_ratio: f64,
}

/// Connection pool bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    /// Maximum connections checked out at once.
    pub max_size: usize,
    /// Maximum time to wait for a connection when the pool is exhausted.
    #[serde(with = "duration_str")]
    pub connect_timeout: Duration,
    /// Maximum idle connections kept for reuse.
    pub idle_max: usize,
}

impl Default for StateSettings {
    fn default() -> Self {
        Self {
            pending_release_timeout: Duration::from_secs(60),
            backfill_ttl_ratio: 0.8,
        }
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            connect_timeout: Duration::from_secs(5),
            idle_max: 10,
        }
    }
}

impl StateSettings {
    /// Time after the last acknowledgement at which a backfill is expired.
    ///
    /// Saturates at `Duration::MAX` if the product does not fit.
    pub fn backfill_ttl(&self) -> Duration {
        if !self.backfill_ttl_ratio.is_finite() || self.backfill_ttl_ratio <= 0.0 {
            return Duration::ZERO;
        }
        self.checked_backfill_ttl().unwrap_or(Duration::MAX)
    }

    fn checked_backfill_ttl(&self) -> Option<Duration> {
        let secs = self.pending_release_timeout.as_secs_f64() * self.backfill_ttl_ratio;
        Duration::try_from_secs_f64(secs).ok()
    }
}

impl StoreConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: StoreConfig = toml::from_str(content)?;
        if config.pool.max_size == 0 {
            anyhow::bail!("pool.max_size must be at least 1");
        }
        if !config.state.backfill_ttl_ratio.is_finite() || config.state.backfill_ttl_ratio <= 0.0 {
            anyhow::bail!(
                "state.backfill_ttl_ratio must be a positive number, got {}",
                config.state.backfill_ttl_ratio
            );
        }
        if config.state.checked_backfill_ttl().is_none() {
            anyhow::bail!(
                "state.backfill_ttl_ratio {} overflows the backfill TTL",
                config.state.backfill_ttl_ratio
            );
        }
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Parse a duration such as "250ms", "5s", "2m", "1h", or bare seconds.
/// Nanoseconds ("1500000300ns") are accepted for exact values.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(ns) = s.strip_suffix("ns") {
        let ns = ns.trim().parse::<u128>().ok()?;
        let secs = u64::try_from(ns / 1_000_000_000).ok()?;
        Some(Duration::new(secs, (ns % 1_000_000_000) as u32))
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else if let Some(hours) = s.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .and_then(|h| h.checked_mul(3600))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let text = if value.subsec_nanos() == 0 {
            format!("{}s", value.as_secs())
        } else if value.subsec_nanos() % 1_000_000 == 0 {
            format!("{}ms", value.as_millis())
        } else {
            format!("{}ns", value.as_nanos())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_duration(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid duration: {raw:?}")))
    }
}
