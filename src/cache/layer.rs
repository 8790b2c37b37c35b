//! Cache layer that orchestrates caching logic with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::storage::EntityCache;
use super::traits::{CacheHitPolicy, CacheResult, GetCacheBehaviour};
use crate::entity::{Entity, Shared};

/// Cache layer that decides between a cached answer and a transport fetch.
///
/// This layer sits between the entity service and the transport. Failures
/// from the fetcher are returned as-is and leave the cache untouched.
pub struct CacheLayer<T> {
  cache: Arc<EntityCache<T>>,
}

impl<T: Entity> CacheLayer<T> {
  /// Create a new cache layer over the given cache.
  pub fn new(cache: Arc<EntityCache<T>>) -> Self {
    Self { cache }
  }

  pub fn cache(&self) -> &Arc<EntityCache<T>> {
    &self.cache
  }

  /// Fetch a list with cache-first strategy.
  ///
  /// 1. If `key` has a live answer, serve it according to `policy`
  /// 2. Otherwise fetch, commit the entities, and record the answer
  pub async fn fetch_list<F, Fut>(
    &self,
    key: &str,
    policy: CacheHitPolicy,
    fetcher: F,
  ) -> Result<CacheResult<Vec<Shared<T>>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Shared<T>>>>,
  {
    if self.cache.ran_query(key) {
      if let Some(entities) = self.cache.observer_for(key, policy) {
        debug!(query = key, count = entities.len(), "Query cache hit");
        let cached_at = self.cache.query_record(key).map(|r| r.created_at);
        return Ok(CacheResult::from_cache(entities, cached_at));
      }
    }

    debug!(query = key, "Query cache miss");
    self.refresh_list(key, fetcher).await
  }

  /// Fetch a list from the network regardless of the cache, then record it.
  pub async fn refresh_list<F, Fut>(&self, key: &str, fetcher: F) -> Result<CacheResult<Vec<Shared<T>>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Shared<T>>>>,
  {
    let data = self.cache.register_query(key, fetcher).await?;
    Ok(CacheResult::from_network(data))
  }

  /// Fetch a single entity with caching.
  ///
  /// `entity_key` is checked under [`GetCacheBehaviour::CacheEntity`];
  /// `query_key` is checked under [`GetCacheBehaviour::CacheQuery`].
  pub async fn fetch_one<F, Fut>(
    &self,
    entity_key: &str,
    query_key: &str,
    behaviour: GetCacheBehaviour,
    fetcher: F,
  ) -> Result<CacheResult<Shared<T>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Shared<T>>>,
  {
    let cached = match behaviour {
      GetCacheBehaviour::CacheEntity => self.cache.get(entity_key),
      GetCacheBehaviour::CacheQuery if self.cache.ran_query(query_key) => {
        self.cache.observer_for_get(query_key)
      }
      GetCacheBehaviour::CacheQuery => None,
    };

    if let Some(entity) = cached {
      debug!(key = entity_key, ?behaviour, "Entity cache hit");
      let cached_at = self.cache.query_record(query_key).map(|r| r.created_at);
      return Ok(CacheResult::from_cache(entity, cached_at));
    }

    debug!(key = entity_key, "Entity cache miss");
    self.refresh_one(query_key, fetcher).await
  }

  /// Fetch a single entity from the network and commit it.
  pub async fn refresh_one<F, Fut>(&self, query_key: &str, fetcher: F) -> Result<CacheResult<Shared<T>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Shared<T>>>,
  {
    let entity = fetcher().await?;
    let cached = self
      .cache
      .commit_query(query_key, vec![entity])
      .into_iter()
      .next()
      .ok_or_else(|| eyre!("Committing {} returned no entity", query_key))?;
    Ok(CacheResult::from_network(cached))
  }
}

impl<T> Clone for CacheLayer<T> {
  fn clone(&self) -> Self {
    Self {
      cache: Arc::clone(&self.cache),
    }
  }
}
