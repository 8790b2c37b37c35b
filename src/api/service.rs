//! Entity service: typed CRUD over a transport, committed through the cache.

use color_eyre::{eyre::bail, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::endpoint::{query_key, EndpointFormat, PathIds};
use super::options::RequestOptions;
use super::transport::Transport;
use crate::cache::{CacheHitPolicy, CacheLayer, CacheResult, EntityCache, GetCacheBehaviour};
use crate::entity::{merge_baseline, share, Entity, Payload, Shared};
use crate::mapping::MappingPlan;

/// Fetches, creates, updates and deletes one kind of entity.
///
/// Every response is mapped through the service's plan into the cached
/// instance for its key (when there is one), so callers holding a handle
/// see the update in place.
pub struct EntityService<T> {
  transport: Arc<dyn Transport>,
  endpoint: EndpointFormat,
  plan: Arc<MappingPlan<T>>,
  layer: CacheLayer<T>,
  key_name: String,
  on_cache_hit_return: Option<CacheHitPolicy>,
  on_get: GetCacheBehaviour,
}

impl<T: Entity> EntityService<T> {
  pub fn new(
    transport: Arc<dyn Transport>,
    endpoint: impl Into<EndpointFormat>,
    plan: MappingPlan<T>,
    cache: Arc<EntityCache<T>>,
  ) -> Self {
    Self {
      transport,
      endpoint: endpoint.into(),
      plan: Arc::new(plan),
      layer: CacheLayer::new(cache),
      key_name: "id".to_string(),
      on_cache_hit_return: None,
      on_get: GetCacheBehaviour::default(),
    }
  }

  /// Path id holding the entity key, used to find cached entities by id.
  pub fn with_key_name(mut self, key_name: impl Into<String>) -> Self {
    self.key_name = key_name.into();
    self
  }

  pub fn with_cache_hit_policy(mut self, policy: Option<CacheHitPolicy>) -> Self {
    self.on_cache_hit_return = policy;
    self
  }

  pub fn with_get_behaviour(mut self, behaviour: GetCacheBehaviour) -> Self {
    self.on_get = behaviour;
    self
  }

  pub fn cache(&self) -> &Arc<EntityCache<T>> {
    self.layer.cache()
  }

  pub fn plan(&self) -> &Arc<MappingPlan<T>> {
    &self.plan
  }

  pub fn endpoint(&self) -> &EndpointFormat {
    &self.endpoint
  }

  pub fn cache_hit_policy(&self) -> Option<CacheHitPolicy> {
    self.on_cache_hit_return
  }

  /// Get one entity, from the cache when allowed.
  pub async fn fetch_by_id(
    &self,
    ids: impl Into<PathIds>,
    options: &RequestOptions<T>,
  ) -> Result<CacheResult<Shared<T>>> {
    let ids = ids.into();
    let path = self.path_for(&ids, options);
    let entity_key = ids.get(&self.key_name).unwrap_or_default().to_string();
    let behaviour = options.cache_behaviour_on_get.unwrap_or(self.on_get);

    self
      .layer_for(options)
      .fetch_one(&entity_key, &path, behaviour, || self.get_one(&path, options))
      .await
  }

  /// Get one entity from the transport, ignoring the cache, and commit it.
  pub async fn refresh_by_id(
    &self,
    ids: impl Into<PathIds>,
    options: &RequestOptions<T>,
  ) -> Result<CacheResult<Shared<T>>> {
    let path = self.path_for(&ids.into(), options);
    self
      .layer_for(options)
      .refresh_one(&path, || self.get_one(&path, options))
      .await
  }

  /// Query a collection, answering from a live cached query when possible.
  pub async fn fetch_all(
    &self,
    ids: &PathIds,
    options: &RequestOptions<T>,
  ) -> Result<CacheResult<Vec<Shared<T>>>> {
    let path = self.path_for(ids, options);
    let policy = CacheHitPolicy::resolve(
      options.on_cache_hit_return.or(self.on_cache_hit_return),
      !options.params.is_empty(),
    );

    self
      .layer_for(options)
      .fetch_list(&path, policy, || self.query_many(&path, options))
      .await
  }

  /// Query a collection from the transport and record the answer.
  pub async fn refresh_all(
    &self,
    ids: &PathIds,
    options: &RequestOptions<T>,
  ) -> Result<CacheResult<Vec<Shared<T>>>> {
    let path = self.path_for(ids, options);
    self
      .layer_for(options)
      .refresh_list(&path, || self.query_many(&path, options))
      .await
  }

  /// Post `entity` and map the response back into it.
  ///
  /// Returns the cached handle for the created record, which is `entity`
  /// itself unless the key was already cached. If the record still has no
  /// key afterwards it is returned as-is and not cached.
  pub async fn create(&self, entity: &Shared<T>, options: &RequestOptions<T>) -> Result<Shared<T>> {
    let (path, body) = self.outbound(entity, options)?;
    info!(path = %path, "Creating entity");

    let response = self
      .transport
      .create(&path, Some(&body), &options.headers)
      .await?;
    self.absorb_response(entity, response, &body, options).await?;
    Ok(self.cache_for(options).add(Arc::clone(entity)))
  }

  /// Put the changed fields of `entity` and map the response back into it.
  pub async fn update(&self, entity: &Shared<T>, options: &RequestOptions<T>) -> Result<Shared<T>> {
    let (path, body) = self.outbound(entity, options)?;
    info!(path = %path, fields = body.len(), "Updating entity");

    let response = self
      .transport
      .update(&path, Some(&body), &options.headers)
      .await?;
    self.absorb_response(entity, response, &body, options).await?;
    Ok(self.cache_for(options).add(Arc::clone(entity)))
  }

  /// Delete `entity` on the server and drop it from the cache.
  pub async fn delete(&self, entity: &Shared<T>, options: &RequestOptions<T>) -> Result<()> {
    let (ids, key) = {
      let guard = entity.read();
      (
        PathIds::from_values(&self.plan.field_values(&guard)?),
        guard.key(),
      )
    };
    let path = self.path_for(&ids, options);
    info!(path = %path, "Deleting entity");

    self.transport.delete(&path, &options.headers).await?;
    if let Some(key) = key {
      self.cache_for(options).delete(&key);
    }
    Ok(())
  }

  /// Delete by path ids. The cached entry under the key path id is dropped.
  pub async fn delete_by_id(
    &self,
    ids: impl Into<PathIds>,
    options: &RequestOptions<T>,
  ) -> Result<()> {
    let ids = ids.into();
    let path = self.path_for(&ids, options);
    info!(path = %path, "Deleting entity");

    self.transport.delete(&path, &options.headers).await?;
    if let Some(key) = ids.get(&self.key_name) {
      self.cache_for(options).delete(key);
    }
    Ok(())
  }

  /// Map a payload into the cached instance for its key, or a new entity.
  pub async fn materialize(&self, payload: Payload) -> Result<Shared<T>> {
    self.map_into(self.cache(), payload, Value::Null).await
  }

  fn cache_for<'a>(&'a self, options: &'a RequestOptions<T>) -> &'a Arc<EntityCache<T>> {
    options.cache.as_ref().unwrap_or_else(|| self.cache())
  }

  fn layer_for(&self, options: &RequestOptions<T>) -> CacheLayer<T> {
    match &options.cache {
      Some(cache) => CacheLayer::new(Arc::clone(cache)),
      None => self.layer.clone(),
    }
  }

  fn path_for(&self, ids: &PathIds, options: &RequestOptions<T>) -> String {
    let format = options.endpoint_format.as_ref().unwrap_or(&self.endpoint);
    query_key(&format.build(ids), &options.params)
  }

  fn outbound(&self, entity: &Shared<T>, options: &RequestOptions<T>) -> Result<(String, Payload)> {
    let guard = entity.read();
    let ids = PathIds::from_values(&self.plan.field_values(&guard)?);
    let body = match &options.body {
      Some(body) => body.clone(),
      None => self.plan.to_wire(&guard, &[])?,
    };
    Ok((self.path_for(&ids, options), body))
  }

  async fn map_into(
    &self,
    cache: &EntityCache<T>,
    payload: Payload,
    params: Value,
  ) -> Result<Shared<T>> {
    let entity = T::key_for_payload(&payload)
      .and_then(|key| cache.get(&key))
      .unwrap_or_else(|| share(T::default()));

    self
      .plan
      .update_entity_from_wire(&entity, payload, params, None)?
      .run()
      .await
  }

  async fn absorb_response(
    &self,
    entity: &Shared<T>,
    response: Value,
    sent: &Payload,
    options: &RequestOptions<T>,
  ) -> Result<()> {
    match response {
      Value::Object(payload) => self
        .plan
        .update_entity_from_wire(entity, payload, options.mapping_params.clone(), None)?
        .run()
        .await
        .map(|_| ()),
      _ => {
        // No record came back; what was sent is now the server's state.
        merge_baseline(entity.write().original_payload_mut(), sent);
        Ok(())
      }
    }
  }

  async fn get_one(&self, path: &str, options: &RequestOptions<T>) -> Result<Shared<T>> {
    let payload = into_payload(self.transport.get(path, &options.headers).await?)?;
    self
      .map_into(self.cache_for(options), payload, options.mapping_params.clone())
      .await
  }

  async fn query_many(&self, path: &str, options: &RequestOptions<T>) -> Result<Vec<Shared<T>>> {
    let payloads = match self.transport.query(path, &options.headers).await? {
      Value::Array(items) => items
        .into_iter()
        .map(into_payload)
        .collect::<Result<Vec<_>>>()?,
      other => vec![into_payload(other)?],
    };
    debug!(path, count = payloads.len(), "Mapping query response");

    let cache = self.cache_for(options);
    let mut entities = Vec::with_capacity(payloads.len());
    for payload in payloads {
      entities.push(
        self
          .map_into(cache, payload, options.mapping_params.clone())
          .await?,
      );
    }
    Ok(entities)
  }
}

fn into_payload(value: Value) -> Result<Payload> {
  match value {
    Value::Object(payload) => Ok(payload),
    other => bail!("Expected a JSON object, got {}", other),
  }
}
