//! Conversations between two users.

use color_eyre::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use super::user::User;
use crate::api::{EntityService, RequestOptions, Transport};
use crate::cache::EntityCache;
use crate::entity::{value_to_key, Entity, Payload, Shared};
use crate::field;
use crate::mapping::{FieldContext, FieldRule, MappingPlan};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
  pub id: Option<i64>,
  pub sender_id: i64,
  pub recipient_id: i64,
  /// Resolved through the user service while mapping.
  #[serde(skip)]
  pub sender: Option<Shared<User>>,
  #[serde(skip)]
  original: Option<Payload>,
}

impl Entity for Conversation {
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

impl Conversation {
  pub fn between(sender_id: i64, recipient_id: i64) -> Self {
    Self {
      sender_id,
      recipient_id,
      ..Default::default()
    }
  }

  pub fn mapping(users: Arc<EntityService<User>>) -> MappingPlan<Conversation> {
    let mut plan = MappingPlan::new();
    plan
      .add_fields([
        field!(Conversation, id),
        field!(Conversation, sender_id),
        field!(Conversation, recipient_id),
      ])
      .add_field(
        FieldRule::named("sender")
          .wire("sender_id")
          .async_operation(move |ctx: FieldContext<Conversation>| {
            resolve_sender(Arc::clone(&users), ctx)
          }),
      )
      .allow_field_for_wire(&["sender_id", "recipient_id"]);
    plan
  }

  pub fn service(
    transport: Arc<dyn Transport>,
    cache: Arc<EntityCache<Conversation>>,
    plan: MappingPlan<Conversation>,
  ) -> EntityService<Conversation> {
    EntityService::new(transport, "rooms/:id:", plan, cache)
  }
}

async fn resolve_sender(users: Arc<EntityService<User>>, ctx: FieldContext<Conversation>) -> Result<()> {
  let Some(sender_id) = ctx.value().and_then(Value::as_i64) else {
    return Ok(());
  };

  let sender = users
    .fetch_by_id(sender_id, &RequestOptions::new())
    .await?
    .data;
  ctx.entity().write().sender = Some(sender);
  Ok(())
}
