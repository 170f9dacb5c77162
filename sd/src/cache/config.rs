//! Cache configuration

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kinds of domain data with their own staleness tolerance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataClass {
    Fleet,
    Quotes,
    Campaigns,
    Map,
    Analytics,
}

impl DataClass {
    pub const ALL: [DataClass; 5] = [
        DataClass::Fleet,
        DataClass::Quotes,
        DataClass::Campaigns,
        DataClass::Map,
        DataClass::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::Fleet => "fleet",
            DataClass::Quotes => "quotes",
            DataClass::Campaigns => "campaigns",
            DataClass::Map => "map",
            DataClass::Analytics => "analytics",
        }
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataClass::ALL
            .into_iter()
            .find(|class| class.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown data class '{}' (expected one of fleet, quotes, campaigns, map, analytics)", s))
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for keys without a data class, in milliseconds
    #[serde(rename = "default-ttl-ms", default = "default_ttl_ms")]
    pub default_ttl_ms: u64,

    /// Eager sweep period in milliseconds (0 disables the sweeper)
    #[serde(rename = "sweep-interval-ms", default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Per data class TTL in milliseconds; missing classes use `default-ttl-ms`
    #[serde(rename = "ttl-ms", default = "default_class_ttls")]
    pub ttl_ms: BTreeMap<DataClass, u64>,
}

fn default_ttl_ms() -> u64 {
    60_000
}

fn default_sweep_interval_ms() -> u64 {
    60_000
}

fn default_class_ttls() -> BTreeMap<DataClass, u64> {
    BTreeMap::from([
        (DataClass::Fleet, 30_000),
        (DataClass::Quotes, 30 * 60_000),
        (DataClass::Campaigns, 5 * 60_000),
        (DataClass::Map, 60 * 60_000),
        (DataClass::Analytics, 60_000),
    ])
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: default_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            ttl_ms: default_class_ttls(),
        }
    }
}

impl CacheConfig {
    /// TTL for classes missing from `ttl_ms`
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    /// TTL for a data class
    pub fn ttl_for(&self, class: DataClass) -> Duration {
        self.ttl_ms
            .get(&class)
            .map(|ms| Duration::from_millis(*ms))
            .unwrap_or_else(|| self.default_ttl())
    }

    /// Sweep period, `None` when eager sweeping is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_ms > 0).then(|| Duration::from_millis(self.sweep_interval_ms))
    }
}
