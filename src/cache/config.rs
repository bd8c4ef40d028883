//! Query cache configuration.
//!
//! Controls staleness, garbage collection and search debouncing via the
//! `[cache]` section of `aequitas.toml`.

use std::num::NonZeroU32;
use std::time::Duration;

use serde::Deserialize;

const DEFAULT_STALE_TIME_MS: u64 = 30_000;
const DEFAULT_GC_TIME_MS: u64 = 300_000;
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 500;
const DEFAULT_PAGE_SIZE: u32 = 20;

/// Cache configuration from `aequitas.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long a successful result counts as fresh (ms).
    pub stale_time_ms: u64,
    /// How long an unobserved entry survives before collection (ms).
    pub gc_time_ms: u64,
    /// Trailing-edge debounce for free-text search (ms).
    pub search_debounce_ms: u64,
    /// Rows per page for paginated expense lists.
    pub default_page_size: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_time_ms: DEFAULT_STALE_TIME_MS,
            gc_time_ms: DEFAULT_GC_TIME_MS,
            search_debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            default_page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            stale_time_ms: settings.stale_time_ms,
            gc_time_ms: settings.gc_time_ms,
            search_debounce_ms: settings.search_debounce_ms,
            default_page_size: settings.default_page_size,
        }
    }
}

impl CacheConfig {
    pub fn stale_time(&self) -> Duration {
        Duration::from_millis(self.stale_time_ms)
    }

    pub fn gc_time(&self) -> Duration {
        Duration::from_millis(self.gc_time_ms)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    /// Returns the page size as NonZeroU32, clamping to 1 if zero.
    pub fn page_size_non_zero(&self) -> NonZeroU32 {
        NonZeroU32::new(self.default_page_size).unwrap_or(NonZeroU32::MIN)
    }
}
