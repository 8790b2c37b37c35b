//! In-memory entity cache with memoized query results.

use chrono::{DateTime, Duration, Utc};
use color_eyre::Result;
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::traits::CacheHitPolicy;
use crate::entity::{Entity, Shared};

/// Default time-to-live for query results (24 hours).
pub const DEFAULT_TTL_MILLIS: i64 = 86_400_000;

/// A memoized query answer.
pub struct QueryRecord<T> {
  /// The query signature (path plus parameters)
  pub query_key: String,
  /// When the answer was recorded
  pub created_at: DateTime<Utc>,
  /// `created_at + ttl`
  pub expires_at: DateTime<Utc>,
  /// The entities the query returned, in order
  pub results: Vec<Shared<T>>,
}

impl<T> QueryRecord<T> {
  fn new(query_key: &str, now: DateTime<Utc>, ttl: Duration, results: Vec<Shared<T>>) -> Self {
    Self {
      query_key: query_key.to_string(),
      created_at: now,
      expires_at: now + ttl,
      results,
    }
  }

  pub fn is_live(&self, now: DateTime<Utc>) -> bool {
    now <= self.expires_at
  }
}

impl<T> Clone for QueryRecord<T> {
  fn clone(&self) -> Self {
    Self {
      query_key: self.query_key.clone(),
      created_at: self.created_at,
      expires_at: self.expires_at,
      results: self.results.clone(),
    }
  }
}

struct Stores<T> {
  entities: IndexMap<String, Shared<T>>,
  queries: HashMap<String, QueryRecord<T>>,
  ttl: Duration,
}

/// Keyed store of entities plus memoized query results.
///
/// An entity key maps to exactly one live handle. Committing a second
/// instance under an existing key merges its state into the cached handle,
/// so references held elsewhere stay valid. Every committed mutation
/// publishes the full current contents on [`subscribe`](Self::subscribe);
/// a query commit publishes once for the whole batch.
pub struct EntityCache<T> {
  stores: Mutex<Stores<T>>,
  clock: Arc<dyn Clock>,
  changes: watch::Sender<Vec<Shared<T>>>,
  revision: AtomicU64,
}

impl<T: Entity> Default for EntityCache<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Entity> EntityCache<T> {
  pub fn new() -> Self {
    let (changes, _) = watch::channel(Vec::new());
    Self {
      stores: Mutex::new(Stores {
        entities: IndexMap::new(),
        queries: HashMap::new(),
        ttl: Duration::milliseconds(DEFAULT_TTL_MILLIS),
      }),
      clock: Arc::new(SystemClock),
      changes,
      revision: AtomicU64::new(0),
    }
  }

  /// Set the time-to-live for recorded queries.
  pub fn with_ttl(self, ttl: Duration) -> Self {
    self.set_ttl(ttl);
    self
  }

  /// Use a different time source.
  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.stores.lock().ttl
  }

  /// Change the time-to-live for queries recorded from now on.
  pub fn set_ttl(&self, ttl: Duration) {
    self.stores.lock().ttl = ttl;
  }

  /// Fetch an entity by key.
  pub fn get(&self, key: &str) -> Option<Shared<T>> {
    self.stores.lock().entities.get(key).cloned()
  }

  pub fn has(&self, key: &str) -> bool {
    self.stores.lock().entities.contains_key(key)
  }

  /// Store an entity under `key`, merging into the cached handle if one
  /// exists. Returns the handle that is now cached.
  pub fn set(&self, key: &str, entity: Shared<T>) -> Shared<T> {
    let mut stores = self.stores.lock();
    let cached = Self::upsert(&mut stores, key, entity);
    self.announce(&stores);
    cached
  }

  /// Store an entity under its own key.
  ///
  /// An entity without a key is handed back untouched and not cached.
  pub fn add(&self, entity: Shared<T>) -> Shared<T> {
    let key = entity.read().key();
    match key {
      Some(key) => self.set(&key, entity),
      None => entity,
    }
  }

  /// Return the cached entity for `key`, or cache the one `build` creates.
  pub fn get_or_create<F>(&self, key: &str, build: F) -> Shared<T>
  where
    F: FnOnce() -> Shared<T>,
  {
    if let Some(cached) = self.get(key) {
      return cached;
    }
    self.set(key, build())
  }

  /// Remove an entity. Returns true if it was cached.
  pub fn delete(&self, key: &str) -> bool {
    let mut stores = self.stores.lock();
    let removed = stores.entities.shift_remove(key).is_some();
    if removed {
      self.announce(&stores);
    }
    removed
  }

  pub fn len(&self) -> usize {
    self.stores.lock().entities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.stores.lock().entities.is_empty()
  }

  /// All cached entities in insertion order.
  pub fn current_values(&self) -> Vec<Shared<T>> {
    self.stores.lock().entities.values().cloned().collect()
  }

  /// Stream of the full cache contents after each committed mutation.
  pub fn subscribe(&self) -> watch::Receiver<Vec<Shared<T>>> {
    self.changes.subscribe()
  }

  /// Number of announcements made so far.
  pub fn revision(&self) -> u64 {
    self.revision.load(Ordering::SeqCst)
  }

  /// Empty both stores.
  pub fn clear(&self) {
    let mut stores = self.stores.lock();
    stores.entities.clear();
    stores.queries.clear();
    self.announce(&stores);
  }

  /// Run a one-shot fetch and memoize its answer under `query_key`.
  ///
  /// Nothing is recorded if the producer fails.
  pub async fn register_query<F, Fut>(&self, query_key: &str, producer: F) -> Result<Vec<Shared<T>>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Vec<Shared<T>>>>,
  {
    let entities = producer().await?;
    Ok(self.commit_query(query_key, entities))
  }

  /// Record a query answer and commit its entities in one batch.
  ///
  /// Keyless entities appear in the recorded results but not in the store.
  pub fn commit_query(&self, query_key: &str, entities: Vec<Shared<T>>) -> Vec<Shared<T>> {
    let mut stores = self.stores.lock();

    let mut results = Vec::with_capacity(entities.len());
    for entity in entities {
      let key = entity.read().key();
      results.push(match key {
        Some(key) => Self::upsert(&mut stores, &key, entity),
        None => entity,
      });
    }

    let now = self.clock.now();
    let record = QueryRecord::new(query_key, now, stores.ttl, results.clone());
    debug!(
      query = query_key,
      count = results.len(),
      expires_at = %record.expires_at,
      "Registered query"
    );
    stores.queries.insert(query_key.to_string(), record);

    self.announce(&stores);
    results
  }

  /// Whether a live answer exists for `query_key`. An expired record is
  /// evicted here.
  pub fn ran_query(&self, query_key: &str) -> bool {
    let now = self.clock.now();
    let mut stores = self.stores.lock();
    match stores.queries.get(query_key) {
      Some(record) if record.is_live(now) => true,
      Some(_) => {
        debug!(query = query_key, "Query expired, evicting");
        stores.queries.remove(query_key);
        false
      }
      None => false,
    }
  }

  /// The recorded answer for `query_key`, live or not.
  pub fn query_record(&self, query_key: &str) -> Option<QueryRecord<T>> {
    self.stores.lock().queries.get(query_key).cloned()
  }

  /// Answer a repeated list query from the cache.
  ///
  /// `All` returns the whole current contents; `PreviousQuery` returns the
  /// recorded results, or `None` if nothing was recorded.
  pub fn observer_for(&self, query_key: &str, policy: CacheHitPolicy) -> Option<Vec<Shared<T>>> {
    trace!(query = query_key, ?policy, "Serving query from cache");
    match policy {
      CacheHitPolicy::All => Some(self.current_values()),
      CacheHitPolicy::PreviousQuery => self
        .stores
        .lock()
        .queries
        .get(query_key)
        .map(|record| record.results.clone()),
    }
  }

  /// Answer a repeated get query from the cache.
  pub fn observer_for_get(&self, query_key: &str) -> Option<Shared<T>> {
    self
      .stores
      .lock()
      .queries
      .get(query_key)
      .and_then(|record| record.results.first().cloned())
  }

  fn upsert(stores: &mut Stores<T>, key: &str, incoming: Shared<T>) -> Shared<T> {
    match stores.entities.get(key).cloned() {
      Some(cached) if Arc::ptr_eq(&cached, &incoming) => cached,
      Some(cached) => {
        let state = incoming.read().clone();
        cached.write().absorb(state);
        cached
      }
      None => {
        stores.entities.insert(key.to_string(), Arc::clone(&incoming));
        incoming
      }
    }
  }

  fn announce(&self, stores: &Stores<T>) {
    self.revision.fetch_add(1, Ordering::SeqCst);
    self
      .changes
      .send_replace(stores.entities.values().cloned().collect());
  }
}
