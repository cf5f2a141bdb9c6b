//! Query engine configuration.

use serde::Deserialize;

use crate::query::sort::InMemorySortKind;
use crate::types::{Result, SombraError};

/// Tunables of the query engine.
///
/// Every field has a default, so a TOML document only needs the values it changes:
///
/// ```
/// use sombra_entity_query::query::QueryEngineConfig;
///
/// let config = QueryEngineConfig::from_toml_str(
///     "cache_capacity = 128\n[sort]\nin_memory = \"heap\"\n",
/// )
/// .unwrap();
/// assert_eq!(config.cache_capacity, 128);
/// assert!(config.concurrent_cache);
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct QueryEngineConfig {
    /// Optimized trees kept in the cache; `0` disables caching.
    pub cache_capacity: usize,
    /// Shard the cache across several locks instead of one.
    pub concurrent_cache: bool,
    /// Shard count in concurrent mode.
    pub cache_shards: usize,
    /// Trees deeper than this trigger a warning; `0` disables the check.
    pub depth_warning_threshold: usize,
    /// Minimum delay between two deep-tree warnings.
    pub depth_warning_interval_ms: u64,
    /// Rewrites one optimization plan may perform on one tree.
    pub max_rewrites_per_plan: usize,
    /// Cross-check the backend's links shortcut against the direct computation.
    pub trace_find_links: bool,
    /// Sort engine thresholds.
    pub sort: SortConfig,
}

impl Default for QueryEngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 4096,
            concurrent_cache: true,
            cache_shards: 16,
            depth_warning_threshold: 200,
            depth_warning_interval_ms: 10_000,
            max_rewrites_per_plan: 100_000,
            trace_find_links: false,
            sort: SortConfig::default(),
        }
    }
}

/// Thresholds deciding which sort path runs.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SortConfig {
    /// Largest materialized sequence sorted in memory; bigger ones read the sorted extent.
    pub max_in_memory: usize,
    /// Largest number of distinct link targets the indirect link sort enumerates.
    pub max_enum_count_for_link_sort: u64,
    /// Smallest source the indirect link sort is worth starting for.
    pub min_entries_for_link_sort: u64,
    /// In-memory strategy.
    pub in_memory: InMemorySortKind,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            max_in_memory: 100_000,
            max_enum_count_for_link_sort: 2048,
            min_entries_for_link_sort: 256,
            in_memory: InMemorySortKind::Merge,
        }
    }
}

impl QueryEngineConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        toml::from_str(input).map_err(|err| SombraError::Config(err.to_string()))
    }

    /// Applies environment overrides: `SOMBRA_TRACE_FIND_LINKS` enables the links
    /// cross-check unless set to `0` or `false`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = std::env::var_os("SOMBRA_TRACE_FIND_LINKS") {
            let value = value.to_string_lossy().to_ascii_lowercase();
            self.trace_find_links = !matches!(value.as_str(), "0" | "false" | "");
        }
        self
    }
}
