//! Chat users.

use serde::Serialize;
use std::sync::Arc;

use crate::api::{EntityService, Transport};
use crate::cache::{EntityCache, GetCacheBehaviour};
use crate::entity::{value_to_key, Entity, Payload};
use crate::field;
use crate::mapping::MappingPlan;

#[derive(Debug, Clone, Default, Serialize)]
pub struct User {
  pub id: i64,
  pub username: String,
  pub name: String,
  #[serde(skip)]
  pub password: String,
  #[serde(skip)]
  original: Option<Payload>,
}

impl Entity for User {
  fn key(&self) -> Option<String> {
    Some(self.username.clone()).filter(|name| !name.is_empty())
  }

  fn key_for_payload(payload: &Payload) -> Option<String> {
    payload.get("username").and_then(value_to_key)
  }

  fn original_payload(&self) -> Option<&Payload> {
    self.original.as_ref()
  }

  fn original_payload_mut(&mut self) -> &mut Option<Payload> {
    &mut self.original
  }
}

impl User {
  /// The backend never returns passwords, so `password` is mapped inbound
  /// but kept off the wire; a password change needs an explicit body.
  pub fn mapping() -> MappingPlan<User> {
    let mut plan = MappingPlan::new();
    plan
      .add_fields([
        field!(User, id),
        field!(User, username),
        field!(User, name),
        field!(User, password),
      ])
      .allow_all_for_wire_except(&["id", "password"]);
    plan
  }

  /// Users are cached by username but fetched by numeric id, so gets are
  /// answered from the recorded query rather than the entity store.
  pub fn service(
    transport: Arc<dyn Transport>,
    cache: Arc<EntityCache<User>>,
    plan: MappingPlan<User>,
  ) -> EntityService<User> {
    EntityService::new(transport, "users/:id:", plan, cache)
      .with_get_behaviour(GetCacheBehaviour::CacheQuery)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::RecordingTransport;
  use crate::api::RequestOptions;
  use crate::entity::share;
  use serde_json::json;

  fn payload(value: serde_json::Value) -> Payload {
    value.as_object().cloned().unwrap()
  }

  #[tokio::test]
  async fn test_user_is_keyed_by_username() {
    let plan = Arc::new(User::mapping());
    let user = share(User::default());
    plan
      .apply(&user, payload(json!({"id": 3, "username": "ann", "name": "Ann"})))
      .await
      .unwrap();

    assert_eq!(user.read().key().as_deref(), Some("ann"));
    assert_eq!(
      User::key_for_payload(&payload(json!({"id": 3, "username": "ann"}))),
      Some("ann".to_string())
    );
  }

  #[tokio::test]
  async fn test_rename_emits_name_only() {
    let plan = Arc::new(User::mapping());
    let user = share(User::default());
    plan
      .apply(
        &user,
        payload(json!({"id": 3, "username": "ann", "name": "Ann"})),
      )
      .await
      .unwrap();

    user.write().name = "Annie".into();
    let body = plan.to_wire(&user.read(), &[]).unwrap();

    assert_eq!(body, payload(json!({"name": "Annie"})));
  }

  #[tokio::test]
  async fn test_update_of_fetched_user_sends_no_password() {
    let transport = Arc::new(RecordingTransport::new());
    transport.respond("GET users/3", json!({"id": 3, "username": "ann", "name": "Ann"}));
    transport.respond("PUT users/3", json!({"id": 3, "username": "ann", "name": "Annie"}));
    let users = User::service(transport.clone(), Arc::new(EntityCache::new()), User::mapping());

    let user = users
      .fetch_by_id(3i64, &RequestOptions::new())
      .await
      .unwrap()
      .data;
    user.write().name = "Annie".into();
    users.update(&user, &RequestOptions::new()).await.unwrap();

    let body = transport.last_body().unwrap();
    assert!(!body.contains_key("password"));
    assert_eq!(body, payload(json!({"name": "Annie"})));
  }

  #[test]
  fn test_password_is_not_printed() {
    let user = User {
      id: 1,
      username: "ann".into(),
      password: "secret".into(),
      ..Default::default()
    };
    let printed = serde_json::to_string(&user).unwrap();

    assert!(!printed.contains("secret"));
    assert!(!printed.contains("original"));
  }

  #[tokio::test]
  async fn test_get_is_answered_from_recorded_query() {
    let transport = Arc::new(RecordingTransport::new());
    transport.respond("GET users/3", json!({"id": 3, "username": "ann", "name": "Ann"}));
    let users = User::service(transport.clone(), Arc::new(EntityCache::new()), User::mapping());

    let first = users.fetch_by_id(3i64, &RequestOptions::new()).await.unwrap();
    let second = users.fetch_by_id(3i64, &RequestOptions::new()).await.unwrap();

    assert!(second.is_cached());
    assert!(Arc::ptr_eq(&first.data, &second.data));
    assert!(users.cache().has("ann"));
    assert_eq!(transport.count("GET users/3"), 1);
  }
}
