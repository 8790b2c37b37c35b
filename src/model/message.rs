//! Chat messages.

use color_eyre::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::api::{EntityService, PathIds, RequestOptions, Transport};
use crate::cache::{CacheResult, EntityCache};
use crate::entity::{value_to_key, Entity, Payload, Shared};
use crate::field;
use crate::mapping::{FieldRule, MappingPlan};

/// Message category. Travels as a bare string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageKind {
  pub id: String,
}

impl MessageKind {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into() }
  }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Message {
  pub id: Option<i64>,
  pub content: String,
  pub kind: Option<MessageKind>,
  pub message_color: i64,
  pub user_id: Option<i64>,
  pub conversation_id: Option<i64>,
  #[serde(skip)]
  original: Option<Payload>,
}

impl Entity for Message {
  fn key(&self) -> Option<String> {
    self.id.map(|id| id.to_string())
  }

  fn key_for_payload(payload: &Payload) -> Option<String> {
    payload.get("id").and_then(value_to_key)
  }

  fn original_payload(&self) -> Option<&Payload> {
    self.original.as_ref()
  }

  fn original_payload_mut(&mut self) -> &mut Option<Payload> {
    &mut self.original
  }
}

impl Message {
  pub fn new(content: impl Into<String>) -> Self {
    Self {
      content: content.into(),
      ..Default::default()
    }
  }

  pub fn mapping() -> MappingPlan<Message> {
    let mut plan = MappingPlan::new();
    plan
      .add_fields([
        FieldRule::from(field!(Message, id)),
        FieldRule::from(field!(Message, content)),
        FieldRule::from(field!(Message, kind))
          .transform(|payload, field, _, _| {
            Ok(match payload.get(field) {
              Some(Value::String(kind)) => json!({ "id": kind }),
              _ => Value::Null,
            })
          })
          .to_wire(|message, _| {
            Ok(
              message
                .kind
                .as_ref()
                .map(|kind| Value::String(kind.id.clone()))
                .unwrap_or(Value::Null),
            )
          }),
        FieldRule::from(field!(Message, message_color)),
        FieldRule::from(field!(Message, user_id)),
        FieldRule::from(field!(Message, conversation_id)),
      ])
      .allow_all_for_wire_except(&["id"]);
    plan
  }

  pub fn service(
    transport: Arc<dyn Transport>,
    cache: Arc<EntityCache<Message>>,
    plan: MappingPlan<Message>,
  ) -> EntityService<Message> {
    EntityService::new(transport, "messages/:id:", plan, cache)
  }

  /// Messages posted to one conversation.
  pub async fn in_room(
    messages: &EntityService<Message>,
    room_id: i64,
  ) -> Result<CacheResult<Vec<Shared<Message>>>> {
    let ids = PathIds::new().with("conversation_id", room_id);
    let options = RequestOptions::new().endpoint("rooms/:conversation_id:/messages");
    messages.fetch_all(&ids, &options).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::RecordingTransport;
  use crate::entity::share;

  fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap()
  }

  #[tokio::test]
  async fn test_kind_is_mapped_from_string() {
    let plan = Arc::new(Message::mapping());
    let message = share(Message::default());
    plan
      .apply(
        &message,
        payload(json!({"id": 7, "content": "hi", "kind": "notice", "message_color": 2})),
      )
      .await
      .unwrap();

    let message = message.read();
    assert_eq!(message.kind, Some(MessageKind::new("notice")));
    assert_eq!(message.message_color, 2);
    assert_eq!(message.key().as_deref(), Some("7"));
  }

  #[test]
  fn test_new_message_wire_form() {
    let plan = Message::mapping();
    let mut message = Message::new("hello");
    message.kind = Some(MessageKind::new("chat"));
    message.message_color = 5;

    let body = plan.to_wire(&message, &["user_id", "conversation_id"]).unwrap();

    assert_eq!(
      body,
      payload(json!({"content": "hello", "kind": "chat", "message_color": 5}))
    );
  }

  #[tokio::test]
  async fn test_room_messages_use_nested_endpoint() {
    let transport = Arc::new(RecordingTransport::new());
    transport.respond(
      "GET rooms/4/messages",
      json!([{"id": 1, "content": "a"}, {"id": 2, "content": "b"}]),
    );
    let messages = Message::service(
      transport.clone(),
      Arc::new(EntityCache::new()),
      Message::mapping(),
    );

    let result = Message::in_room(&messages, 4).await.unwrap();

    assert_eq!(result.data.len(), 2);
    assert_eq!(transport.calls(), vec!["GET rooms/4/messages"]);
    assert!(messages.cache().has("2"));
  }
}
