//! Declarative mapping between wire payloads and entities.

use color_eyre::{eyre::bail, eyre::WrapErr, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use super::case::WireKeyCase;
use super::field::Field;
use super::process::{FieldContext, MappingProcess};
use crate::entity::{merge_baseline, Entity, Payload, Shared};

/// Transforms and operations receive the payload, the entity field name,
/// the entity and the mapping params the caller supplied (`Null` if none).
pub type TransformFn<T> = Arc<dyn Fn(&Payload, &str, &T, &Value) -> Result<Value> + Send + Sync>;
pub type OperationFn<T> = Arc<dyn Fn(&Payload, &str, &mut T, &Value) -> Result<()> + Send + Sync>;
pub type AsyncOperationFn<T> =
  Arc<dyn Fn(FieldContext<T>) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type ToWireFn<T> = Arc<dyn Fn(&T, &str) -> Result<Value> + Send + Sync>;
pub type CompletionFn<T> = Box<dyn FnOnce(&Shared<T>) + Send>;

/// How a payload value reaches the entity for one field.
pub enum ToEntity<T> {
  /// Compute a value from the payload; it is assigned through the field setter.
  Transform(TransformFn<T>),
  /// Mutate the entity directly.
  Operation(OperationFn<T>),
  /// Suspend the mapping process until the returned future resolves.
  AsyncOperation(AsyncOperationFn<T>),
}

impl<T> Clone for ToEntity<T> {
  fn clone(&self) -> Self {
    match self {
      ToEntity::Transform(f) => ToEntity::Transform(Arc::clone(f)),
      ToEntity::Operation(f) => ToEntity::Operation(Arc::clone(f)),
      ToEntity::AsyncOperation(f) => ToEntity::AsyncOperation(Arc::clone(f)),
    }
  }
}

/// One row of a mapping plan.
pub struct FieldRule<T> {
  entity_field: String,
  wire_field: Option<String>,
  accessor: Option<Field<T>>,
  to_entity: Option<ToEntity<T>>,
  to_wire: Option<ToWireFn<T>>,
}

impl<T> FieldRule<T> {
  /// A rule with no accessor. Only useful together with an operation or a
  /// `to_wire` function.
  pub fn named(entity_field: impl Into<String>) -> Self {
    Self {
      entity_field: entity_field.into(),
      wire_field: None,
      accessor: None,
      to_entity: None,
      to_wire: None,
    }
  }

  /// Use an explicit wire key instead of deriving one from the plan's case.
  pub fn wire(mut self, wire_field: impl Into<String>) -> Self {
    self.wire_field = Some(wire_field.into());
    self
  }

  pub fn transform<F>(mut self, f: F) -> Self
  where
    F: Fn(&Payload, &str, &T, &Value) -> Result<Value> + Send + Sync + 'static,
  {
    self.to_entity = Some(ToEntity::Transform(Arc::new(f)));
    self
  }

  pub fn operation<F>(mut self, f: F) -> Self
  where
    F: Fn(&Payload, &str, &mut T, &Value) -> Result<()> + Send + Sync + 'static,
  {
    self.to_entity = Some(ToEntity::Operation(Arc::new(f)));
    self
  }

  pub fn async_operation<F, Fut>(mut self, f: F) -> Self
  where
    F: Fn(FieldContext<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
  {
    self.to_entity = Some(ToEntity::AsyncOperation(Arc::new(move |ctx| {
      Box::pin(f(ctx)) as BoxFuture<'static, Result<()>>
    })));
    self
  }

  pub fn to_wire<F>(mut self, f: F) -> Self
  where
    F: Fn(&T, &str) -> Result<Value> + Send + Sync + 'static,
  {
    self.to_wire = Some(Arc::new(f));
    self
  }

  pub fn entity_field(&self) -> &str {
    &self.entity_field
  }

  pub fn wire_field(&self) -> &str {
    self.wire_field.as_deref().unwrap_or(&self.entity_field)
  }

  pub(crate) fn to_entity_rule(&self) -> Option<&ToEntity<T>> {
    self.to_entity.as_ref()
  }

  /// Assign a value through the field setter.
  pub(crate) fn assign(&self, entity: &mut T, value: Value) -> Result<()> {
    match &self.accessor {
      Some(field) => field
        .write(entity, value)
        .wrap_err_with(|| format!("Failed to assign field `{}`", self.entity_field)),
      None => bail!(
        "Field `{}` has no setter and no operation to apply it",
        self.entity_field
      ),
    }
  }

  fn read(&self, entity: &T) -> Result<Option<Value>> {
    match (&self.to_wire, &self.accessor) {
      (Some(f), _) => f(entity, &self.entity_field).map(Some),
      (None, Some(field)) => field.read(entity).map(Some),
      (None, None) => Ok(None),
    }
  }
}

impl<T> From<Field<T>> for FieldRule<T> {
  fn from(field: Field<T>) -> Self {
    Self {
      entity_field: field.name().to_string(),
      wire_field: None,
      accessor: Some(field),
      to_entity: None,
      to_wire: None,
    }
  }
}

/// Ordered field rules plus the outbound serialization policy.
pub struct MappingPlan<T> {
  wire_case: WireKeyCase,
  rules: Vec<FieldRule<T>>,
  index: HashMap<String, usize>,
  wire_allow_list: HashSet<String>,
  only_emit_changed: bool,
}

impl<T: Entity> Default for MappingPlan<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Entity> MappingPlan<T> {
  pub fn new() -> Self {
    Self::with_case(WireKeyCase::default())
  }

  pub fn with_case(wire_case: WireKeyCase) -> Self {
    Self {
      wire_case,
      rules: Vec::new(),
      index: HashMap::new(),
      wire_allow_list: HashSet::new(),
      only_emit_changed: true,
    }
  }

  pub fn wire_case(&self) -> WireKeyCase {
    self.wire_case
  }

  pub fn only_emit_changed(&self) -> bool {
    self.only_emit_changed
  }

  pub fn set_only_emit_changed(&mut self, only_changed: bool) -> &mut Self {
    self.only_emit_changed = only_changed;
    self
  }

  /// Register one field rule. The wire key is derived from the plan's case
  /// unless the rule names one. Re-adding an entity field replaces its rule.
  pub fn add_field(&mut self, rule: impl Into<FieldRule<T>>) -> &mut Self {
    let mut rule = rule.into();
    if rule.wire_field.is_none() {
      rule.wire_field = Some(self.wire_case.apply(&rule.entity_field));
    }

    match self.index.get(&rule.entity_field) {
      Some(&position) => {
        debug!(field = %rule.entity_field, "Replacing mapping rule");
        self.rules[position] = rule;
      }
      None => {
        self.index.insert(rule.entity_field.clone(), self.rules.len());
        self.rules.push(rule);
      }
    }
    self
  }

  pub fn add_fields<I, R>(&mut self, rules: I) -> &mut Self
  where
    I: IntoIterator<Item = R>,
    R: Into<FieldRule<T>>,
  {
    for rule in rules {
      self.add_field(rule);
    }
    self
  }

  pub fn allow_field_for_wire(&mut self, entity_fields: &[&str]) -> &mut Self {
    self
      .wire_allow_list
      .extend(entity_fields.iter().map(|f| f.to_string()));
    self
  }

  /// Allow every field registered so far.
  pub fn allow_all_for_wire(&mut self) -> &mut Self {
    self.allow_all_for_wire_except(&[])
  }

  /// Allow every field registered so far, except those listed.
  pub fn allow_all_for_wire_except(&mut self, entity_fields: &[&str]) -> &mut Self {
    let allowed: Vec<String> = self
      .rules
      .iter()
      .map(|r| r.entity_field.clone())
      .filter(|f| !entity_fields.contains(&f.as_str()))
      .collect();
    self.wire_allow_list.extend(allowed);
    self
  }

  pub fn is_wire_allowed(&self, entity_field: &str) -> bool {
    self.wire_allow_list.contains(entity_field)
  }

  pub fn rules(&self) -> &[FieldRule<T>] {
    &self.rules
  }

  pub fn rule(&self, entity_field: &str) -> Option<&FieldRule<T>> {
    self.index.get(entity_field).map(|&i| &self.rules[i])
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Map `payload` into `entity`.
  ///
  /// The payload is merged into the entity's baseline, then a fresh
  /// [`MappingProcess`] runs until it completes or suspends on an
  /// asynchronous field. A suspended process is returned to the caller, who
  /// drives it with [`MappingProcess::run`] or `take_pending`/`resume`.
  ///
  /// `params` is handed to every transform and operation of this run.
  pub fn update_entity_from_wire(
    self: &Arc<Self>,
    entity: &Shared<T>,
    payload: Payload,
    params: Value,
    on_complete: Option<CompletionFn<T>>,
  ) -> Result<MappingProcess<T>> {
    merge_baseline(entity.write().original_payload_mut(), &payload);

    let mut process = MappingProcess::new(
      Arc::clone(self),
      Arc::clone(entity),
      Arc::new(payload),
      Arc::new(params),
      on_complete,
    );
    process.execute()?;
    Ok(process)
  }

  /// Map `payload` into `entity` and wait for any asynchronous fields.
  pub async fn apply(self: &Arc<Self>, entity: &Shared<T>, payload: Payload) -> Result<()> {
    self.apply_with_params(entity, payload, Value::Null).await
  }

  pub async fn apply_with_params(
    self: &Arc<Self>,
    entity: &Shared<T>,
    payload: Payload,
    params: Value,
  ) -> Result<()> {
    self
      .update_entity_from_wire(entity, payload, params, None)?
      .run()
      .await
      .map(|_| ())
  }

  /// Build the outbound payload for `entity`.
  ///
  /// Only allowed fields are emitted, in declared order. With
  /// `only_emit_changed`, a field is left out when the baseline holds the
  /// same value under its wire key.
  pub fn to_wire(&self, entity: &T, ignore_keys: &[&str]) -> Result<Payload> {
    let baseline = entity.original_payload();
    let mut json = Payload::new();

    for rule in &self.rules {
      let entity_field = rule.entity_field.as_str();
      if !self.is_wire_allowed(entity_field) || ignore_keys.contains(&entity_field) {
        continue;
      }

      let value = match rule.read(entity)? {
        Some(value) => value,
        None => bail!(
          "Field `{}` is allowed on the wire but has no getter",
          entity_field
        ),
      };

      if self.only_emit_changed {
        let unchanged = baseline
          .and_then(|b| b.get(rule.wire_field()))
          .is_some_and(|previous| *previous == value);
        if unchanged {
          continue;
        }
      }

      json.insert(rule.wire_field().to_string(), value);
    }

    Ok(json)
  }

  /// Current value of every field with an accessor, keyed by entity field.
  pub fn field_values(&self, entity: &T) -> Result<BTreeMap<String, Value>> {
    let mut values = BTreeMap::new();
    for rule in &self.rules {
      if let Some(field) = &rule.accessor {
        values.insert(rule.entity_field.clone(), field.read(entity)?);
      }
    }
    Ok(values)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::entity::{share, value_to_key};
  use crate::field;
  use serde_json::json;

  #[derive(Debug, Clone, Default)]
  struct Profile {
    id: u64,
    display_name: String,
    message_color: i64,
    tags: Vec<String>,
    original: Option<Payload>,
  }

  impl Entity for Profile {
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

  fn profile_plan() -> MappingPlan<Profile> {
    let mut plan = MappingPlan::new();
    plan.add_fields([
      FieldRule::from(field!(Profile, id)),
      FieldRule::from(field!(Profile, display_name)).wire("name"),
      FieldRule::from(field!(Profile, message_color)),
    ]);
    plan
  }

  #[test]
  fn test_wire_keys_follow_case() {
    let mut plan = MappingPlan::<Profile>::with_case(WireKeyCase::Camel);
    plan
      .add_field(field!(Profile, message_color))
      .add_field(FieldRule::from(field!(Profile, display_name)).wire("name"));

    assert_eq!(plan.rules()[0].wire_field(), "messageColor");
    assert_eq!(plan.rules()[1].wire_field(), "name");
    assert_eq!(profile_plan().rules()[2].wire_field(), "message_color");
  }

  #[test]
  fn test_readding_field_replaces_rule() {
    let mut plan = profile_plan();
    plan.add_field(FieldRule::from(field!(Profile, display_name)).wire("title"));

    assert_eq!(plan.len(), 3);
    assert_eq!(plan.rule("display_name").unwrap().wire_field(), "title");
  }

  #[test]
  fn test_nothing_allowed_for_wire_by_default() {
    let plan = profile_plan();
    let entity = Profile {
      id: 3,
      ..Default::default()
    };
    assert!(plan.to_wire(&entity, &[]).unwrap().is_empty());
  }

  #[test]
  fn test_allow_all_except() {
    let mut plan = profile_plan();
    plan.allow_all_for_wire_except(&["id"]);

    assert!(!plan.is_wire_allowed("id"));
    assert!(plan.is_wire_allowed("display_name"));
    assert!(plan.is_wire_allowed("message_color"));
  }

  #[tokio::test]
  async fn test_to_wire_emits_only_changed_fields() {
    let mut plan = profile_plan();
    plan.allow_all_for_wire();
    let plan = Arc::new(plan);

    let entity = share(Profile::default());
    plan
      .apply(
        &entity,
        payload(json!({"id": 1, "name": "Ann", "message_color": 2})),
      )
      .await
      .unwrap();

    entity.write().display_name = "Anna".to_string();
    let wire = plan.to_wire(&entity.read(), &[]).unwrap();

    assert_eq!(wire, payload(json!({"name": "Anna"})));
  }

  #[tokio::test]
  async fn test_to_wire_includes_fields_missing_from_baseline() {
    let mut plan = profile_plan();
    plan.allow_all_for_wire();
    let plan = Arc::new(plan);

    let entity = share(Profile::default());
    plan
      .apply(&entity, payload(json!({"id": 1, "name": "Ann"})))
      .await
      .unwrap();

    let wire = plan.to_wire(&entity.read(), &[]).unwrap();
    assert_eq!(wire, payload(json!({"message_color": 0})));
  }

  #[tokio::test]
  async fn test_to_wire_without_diffing_emits_all_allowed() {
    let mut plan = profile_plan();
    plan.allow_field_for_wire(&["id", "display_name"]);
    plan.set_only_emit_changed(false);
    let plan = Arc::new(plan);

    let entity = share(Profile::default());
    plan
      .apply(&entity, payload(json!({"id": 1, "name": "Ann"})))
      .await
      .unwrap();

    let wire = plan.to_wire(&entity.read(), &[]).unwrap();
    assert_eq!(wire, payload(json!({"id": 1, "name": "Ann"})));

    let wire = plan.to_wire(&entity.read(), &["id"]).unwrap();
    assert_eq!(wire, payload(json!({"name": "Ann"})));
  }

  #[test]
  fn test_no_baseline_means_everything_allowed_is_sent() {
    let mut plan = profile_plan();
    plan.allow_field_for_wire(&["display_name", "message_color"]);

    let entity = Profile {
      display_name: "New".into(),
      message_color: 5,
      ..Default::default()
    };
    let wire = plan.to_wire(&entity, &[]).unwrap();
    assert_eq!(wire, payload(json!({"name": "New", "message_color": 5})));
  }

  #[tokio::test]
  async fn test_transform_and_to_wire_functions() {
    let mut plan = MappingPlan::<Profile>::new();
    plan
      .add_field(field!(Profile, id))
      .add_field(
        FieldRule::from(field!(Profile, tags))
          .transform(|payload, _key, _entity, _params| {
            let joined = payload["tags"].as_str().unwrap_or_default();
            Ok(json!(joined.split(',').collect::<Vec<_>>()))
          })
          .to_wire(|entity, _key| Ok(json!(entity.tags.join(",")))),
      )
      .allow_all_for_wire();
    let plan = Arc::new(plan);

    let entity = share(Profile::default());
    plan
      .apply(&entity, payload(json!({"id": 9, "tags": "a,b"})))
      .await
      .unwrap();
    assert_eq!(entity.read().tags, vec!["a", "b"]);

    entity.write().tags.push("c".into());
    let wire = plan.to_wire(&entity.read(), &[]).unwrap();
    assert_eq!(wire, payload(json!({"tags": "a,b,c"})));
  }

  #[tokio::test]
  async fn test_operation_only_rule() {
    let mut plan = MappingPlan::<Profile>::new();
    plan.add_field(FieldRule::named("tags").wire("labels").operation(
      |payload, _key, entity: &mut Profile, _params| {
        if let Some(items) = payload["labels"].as_array() {
          entity
            .tags
            .extend(items.iter().filter_map(|v| v.as_str().map(String::from)));
        }
        Ok(())
      },
    ));
    let plan = Arc::new(plan);

    let entity = share(Profile::default());
    plan
      .apply(&entity, payload(json!({"labels": ["x", "y"]})))
      .await
      .unwrap();

    assert_eq!(entity.read().tags, vec!["x", "y"]);
  }

  #[tokio::test]
  async fn test_params_reach_transforms_and_operations() {
    let mut plan = MappingPlan::<Profile>::new();
    plan
      .add_field(
        FieldRule::from(field!(Profile, display_name))
          .wire("name")
          .transform(|payload, _key, _entity, params| {
            let prefix = params["prefix"].as_str().unwrap_or_default();
            let name = payload["name"].as_str().unwrap_or_default();
            Ok(json!(format!("{prefix}{name}")))
          }),
      )
      .add_field(FieldRule::named("tags").operation(
        |_payload, _key, entity: &mut Profile, params| {
          if let Some(tag) = params["tag"].as_str() {
            entity.tags.push(tag.to_string());
          }
          Ok(())
        },
      ));
    let plan = Arc::new(plan);

    let entity = share(Profile::default());
    plan
      .apply_with_params(
        &entity,
        payload(json!({"name": "Ann", "tags": []})),
        json!({"prefix": "@", "tag": "staff"}),
      )
      .await
      .unwrap();

    assert_eq!(entity.read().display_name, "@Ann");
    assert_eq!(entity.read().tags, vec!["staff"]);

    plan
      .apply(&entity, payload(json!({"name": "Bo"})))
      .await
      .unwrap();
    assert_eq!(entity.read().display_name, "Bo");
  }

  #[tokio::test]
  async fn test_update_merges_baseline() {
    let plan = Arc::new(profile_plan());
    let entity = share(Profile::default());

    plan
      .apply(&entity, payload(json!({"id": 1, "name": "a"})))
      .await
      .unwrap();
    plan
      .apply(&entity, payload(json!({"message_color": 4})))
      .await
      .unwrap();

    let entity = entity.read();
    let baseline = entity.original.as_ref().unwrap();
    assert_eq!(baseline["name"], json!("a"));
    assert_eq!(baseline["message_color"], json!(4));
    assert_eq!(entity.display_name, "a");
  }

  #[test]
  fn test_field_values_reads_all_accessors() {
    let plan = profile_plan();
    let entity = Profile {
      id: 12,
      display_name: "Z".into(),
      ..Default::default()
    };
    let values = plan.field_values(&entity).unwrap();
    assert_eq!(values["id"], json!(12));
    assert_eq!(values["display_name"], json!("Z"));
  }
}
