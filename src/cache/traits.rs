//! Core types shared by the cache storage and the cache layer.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the answer was recorded (if from cache and known)
  pub cached_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data.
  pub fn from_cache(data: T, cached_at: Option<DateTime<Utc>>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source == CacheSource::Cache
  }
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the transport
  Network,
  /// Served from a live cached answer
  Cache,
}

/// What a repeated list query returns on a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHitPolicy {
  /// Everything currently cached, including entities from other queries
  All,
  /// Exactly the entities the original query returned
  PreviousQuery,
}

impl CacheHitPolicy {
  /// Pick the policy for a query. Without an explicit choice, unfiltered
  /// queries reflect the whole working set and filtered ones stay pinned.
  pub fn resolve(explicit: Option<CacheHitPolicy>, has_params: bool) -> CacheHitPolicy {
    match explicit {
      Some(policy) => policy,
      None if has_params => CacheHitPolicy::PreviousQuery,
      None => CacheHitPolicy::All,
    }
  }
}

/// How a get-by-id consults the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GetCacheBehaviour {
  /// Return the cached entity whenever its key is present
  #[default]
  CacheEntity,
  /// Return the cached answer to this exact get while it is live
  CacheQuery,
}
