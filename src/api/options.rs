//! Per-request options.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::endpoint::EndpointFormat;
use super::transport::Headers;
use crate::cache::{CacheHitPolicy, EntityCache, GetCacheBehaviour};
use crate::entity::Payload;

pub struct RequestOptions<T> {
  /// Query parameters appended to the request path
  pub params: BTreeMap<String, String>,
  /// Headers added to the request
  pub headers: Headers,
  /// Endpoint template used instead of the service's own
  pub endpoint_format: Option<EndpointFormat>,
  /// Body sent instead of the entity's wire form
  pub body: Option<Payload>,
  /// Cache used instead of the service's own
  pub cache: Option<Arc<EntityCache<T>>>,
  /// Handed to every transform and operation while mapping the response
  pub mapping_params: Value,
  /// What a repeated list query returns on a cache hit
  pub on_cache_hit_return: Option<CacheHitPolicy>,
  /// How a get consults the cache
  pub cache_behaviour_on_get: Option<GetCacheBehaviour>,
}

impl<T> Default for RequestOptions<T> {
  fn default() -> Self {
    Self {
      params: BTreeMap::new(),
      headers: Headers::new(),
      endpoint_format: None,
      body: None,
      cache: None,
      mapping_params: Value::Null,
      on_cache_hit_return: None,
      cache_behaviour_on_get: None,
    }
  }
}

impl<T> Clone for RequestOptions<T> {
  fn clone(&self) -> Self {
    Self {
      params: self.params.clone(),
      headers: self.headers.clone(),
      endpoint_format: self.endpoint_format.clone(),
      body: self.body.clone(),
      cache: self.cache.clone(),
      mapping_params: self.mapping_params.clone(),
      on_cache_hit_return: self.on_cache_hit_return,
      cache_behaviour_on_get: self.cache_behaviour_on_get,
    }
  }
}

impl<T> RequestOptions<T> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.params.insert(key.into(), value.to_string());
    self
  }

  pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.insert(name.into(), value.into());
    self
  }

  pub fn endpoint(mut self, format: impl Into<EndpointFormat>) -> Self {
    self.endpoint_format = Some(format.into());
    self
  }

  pub fn body(mut self, body: Payload) -> Self {
    self.body = Some(body);
    self
  }

  /// Read from and commit to `cache` instead of the service's cache.
  pub fn cache(mut self, cache: Arc<EntityCache<T>>) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn mapping_params(mut self, params: Value) -> Self {
    self.mapping_params = params;
    self
  }

  pub fn on_cache_hit_return(mut self, policy: CacheHitPolicy) -> Self {
    self.on_cache_hit_return = Some(policy);
    self
  }

  pub fn cache_behaviour_on_get(mut self, behaviour: GetCacheBehaviour) -> Self {
    self.cache_behaviour_on_get = Some(behaviour);
    self
  }
}
