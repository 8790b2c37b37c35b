//! Identity-bearing domain records and their wire payloads.

use color_eyre::Result;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::mapping::MappingPlan;

/// Raw wire representation of a record (a JSON object).
pub type Payload = Map<String, Value>;

/// Shared handle to a cached entity.
///
/// Everything that holds an entity holds one of these. The cache mutates the
/// value behind the lock and never swaps the handle, so references held by
/// callers keep observing updates.
pub type Shared<T> = Arc<RwLock<T>>;

/// Wrap an entity in a shared handle.
pub fn share<T: Entity>(entity: T) -> Shared<T> {
  Arc::new(RwLock::new(entity))
}

/// Capability interface for records that can be mapped and cached.
///
/// Implementors supply a stable key and storage for the last payload merged
/// into them. Field mapping itself lives in a [`crate::mapping::MappingPlan`].
pub trait Entity: Clone + Default + Send + Sync + 'static {
  /// Unique identity for this record (e.g. numeric id or username).
  ///
  /// `None` until the record has one, typically before the server assigned
  /// an id. Keyless records are never stored in the cache.
  fn key(&self) -> Option<String>;

  /// Identity of the record described by a raw payload, if it carries one.
  fn key_for_payload(payload: &Payload) -> Option<String>;

  /// Last payload merged into this entity, used as the diff baseline.
  fn original_payload(&self) -> Option<&Payload>;

  fn original_payload_mut(&mut self) -> &mut Option<Payload>;

  /// Map `payload` into the entity behind `handle` using `plan`.
  fn apply<'a>(
    handle: &'a Shared<Self>,
    plan: &'a Arc<MappingPlan<Self>>,
    payload: Payload,
  ) -> BoxFuture<'a, Result<()>> {
    Box::pin(plan.apply(handle, payload))
  }

  /// Take over the state of another instance of the same record.
  ///
  /// The combined baseline keeps keys only this instance had seen and takes
  /// the incoming values for everything else.
  fn absorb(&mut self, incoming: Self) {
    let mut baseline = self.original_payload_mut().take();
    if let Some(theirs) = incoming.original_payload() {
      merge_baseline(&mut baseline, theirs);
    }
    *self = incoming;
    *self.original_payload_mut() = baseline;
  }
}

/// Merge `payload` into a baseline, creating it on first use.
pub fn merge_baseline(baseline: &mut Option<Payload>, payload: &Payload) {
  let target = baseline.get_or_insert_with(Payload::new);
  for (key, value) in payload {
    target.insert(key.clone(), value.clone());
  }
}

/// Render a JSON scalar the way it would appear in a path or cache key.
pub(crate) fn value_to_key(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[derive(Debug, Clone, Default)]
  struct Note {
    id: u64,
    text: String,
    original: Option<Payload>,
  }

  impl Entity for Note {
    fn key(&self) -> Option<String> {
      Some(self.id.to_string())
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

  fn payload(value: Value) -> Payload {
    value.as_object().cloned().unwrap()
  }

  #[test]
  fn test_merge_baseline_creates_then_overwrites() {
    let mut baseline = None;
    merge_baseline(&mut baseline, &payload(json!({"id": 1, "text": "a"})));
    merge_baseline(&mut baseline, &payload(json!({"text": "b", "extra": true})));

    let baseline = baseline.unwrap();
    assert_eq!(baseline["id"], json!(1));
    assert_eq!(baseline["text"], json!("b"));
    assert_eq!(baseline["extra"], json!(true));
  }

  #[test]
  fn test_absorb_keeps_combined_baseline() {
    let mut current = Note {
      id: 1,
      text: "old".into(),
      original: Some(payload(json!({"id": 1, "seen": "only here"}))),
    };
    let incoming = Note {
      id: 1,
      text: "new".into(),
      original: Some(payload(json!({"id": 1, "text": "new"}))),
    };

    current.absorb(incoming);

    assert_eq!(current.text, "new");
    let baseline = current.original.unwrap();
    assert_eq!(baseline["seen"], json!("only here"));
    assert_eq!(baseline["text"], json!("new"));
  }

  #[tokio::test]
  async fn test_apply_maps_through_plan() {
    let mut plan = MappingPlan::<Note>::new();
    plan
      .add_field(crate::field!(Note, id))
      .add_field(crate::field!(Note, text));
    let plan = Arc::new(plan);
    let note = share(Note::default());

    Note::apply(&note, &plan, payload(json!({"id": 4, "text": "hi"})))
      .await
      .unwrap();

    assert_eq!(note.read().key().as_deref(), Some("4"));
    assert_eq!(note.read().text, "hi");
    assert_eq!(note.read().original.as_ref().unwrap()["text"], json!("hi"));
  }

  #[test]
  fn test_key_for_payload_accepts_numbers_and_strings() {
    assert_eq!(
      Note::key_for_payload(&payload(json!({"id": 7}))),
      Some("7".to_string())
    );
    assert_eq!(
      Note::key_for_payload(&payload(json!({"id": "x"}))),
      Some("x".to_string())
    );
    assert_eq!(Note::key_for_payload(&payload(json!({"id": null}))), None);
  }
}
