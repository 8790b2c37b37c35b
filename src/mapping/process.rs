//! Resumable execution of a mapping plan against one entity and payload.
//!
//! The process walks the plan's rules in order. Synchronous rules run
//! inline. An asynchronous rule hands back a future and leaves the process
//! `Suspended` with the cursor still on that rule; once the future has been
//! awaited, [`MappingProcess::resume`] moves past it and continues. Only one
//! field is ever in flight, so the final entity state matches a fully
//! synchronous run in declared order.

use color_eyre::{eyre::bail, Result};
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::plan::{CompletionFn, MappingPlan, ToEntity};
use crate::entity::{Entity, Payload, Shared};

/// Lifecycle of a mapping process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
  /// Walking the rule list synchronously
  Running,
  /// Waiting on an asynchronous field operation
  Suspended,
  /// Every rule has been visited
  Complete,
  /// A rule failed; the entity is left partially mapped
  Aborted,
}

/// What an asynchronous field operation gets to work with.
pub struct FieldContext<T> {
  entity: Shared<T>,
  payload: Arc<Payload>,
  params: Arc<Value>,
  entity_field: String,
  wire_field: String,
}

impl<T> FieldContext<T> {
  pub fn entity(&self) -> &Shared<T> {
    &self.entity
  }

  pub fn payload(&self) -> &Payload {
    &self.payload
  }

  /// Mapping params of the run; `Null` when the caller gave none.
  pub fn params(&self) -> &Value {
    &self.params
  }

  pub fn entity_field(&self) -> &str {
    &self.entity_field
  }

  pub fn wire_field(&self) -> &str {
    &self.wire_field
  }

  /// The payload value for this field.
  pub fn value(&self) -> Option<&Value> {
    self.payload.get(&self.wire_field)
  }
}

pub struct MappingProcess<T> {
  plan: Arc<MappingPlan<T>>,
  entity: Shared<T>,
  payload: Arc<Payload>,
  params: Arc<Value>,
  cursor: usize,
  state: ProcessState,
  pending: Option<BoxFuture<'static, Result<()>>>,
  on_complete: Option<CompletionFn<T>>,
}

impl<T: Entity> MappingProcess<T> {
  /// Create a process positioned on the first rule. Nothing runs until
  /// [`execute`](Self::execute) is called.
  pub fn new(
    plan: Arc<MappingPlan<T>>,
    entity: Shared<T>,
    payload: Arc<Payload>,
    params: Arc<Value>,
    on_complete: Option<CompletionFn<T>>,
  ) -> Self {
    Self {
      plan,
      entity,
      payload,
      params,
      cursor: 0,
      state: ProcessState::Running,
      pending: None,
      on_complete,
    }
  }

  pub fn state(&self) -> ProcessState {
    self.state
  }

  pub fn cursor(&self) -> usize {
    self.cursor
  }

  pub fn entity(&self) -> &Shared<T> {
    &self.entity
  }

  /// Entity field of the rule under the cursor, if any.
  pub fn current_field(&self) -> Option<&str> {
    self.plan.rules().get(self.cursor).map(|r| r.entity_field())
  }

  /// Take the future of the asynchronous operation the process is waiting on.
  pub fn take_pending(&mut self) -> Option<BoxFuture<'static, Result<()>>> {
    self.pending.take()
  }

  /// Run rules until the list is exhausted or an asynchronous rule suspends.
  pub fn execute(&mut self) -> Result<ProcessState> {
    match self.state {
      ProcessState::Running => {}
      ProcessState::Complete => return Ok(ProcessState::Complete),
      ProcessState::Suspended => bail!(
        "Mapping process is suspended on `{}`; resume it instead",
        self.current_field().unwrap_or_default()
      ),
      ProcessState::Aborted => bail!("Mapping process was aborted"),
    }

    let plan = Arc::clone(&self.plan);
    while let Some(rule) = plan.rules().get(self.cursor) {
      if !self.payload.contains_key(rule.wire_field()) {
        self.cursor += 1;
        continue;
      }

      if let Some(ToEntity::AsyncOperation(op)) = rule.to_entity_rule() {
        trace!(field = rule.entity_field(), "Suspending mapping on async field");
        self.pending = Some(op(FieldContext {
          entity: Arc::clone(&self.entity),
          payload: Arc::clone(&self.payload),
          params: Arc::clone(&self.params),
          entity_field: rule.entity_field().to_string(),
          wire_field: rule.wire_field().to_string(),
        }));
        self.state = ProcessState::Suspended;
        return Ok(ProcessState::Suspended);
      }

      let applied = match rule.to_entity_rule() {
        Some(ToEntity::Operation(op)) => {
          let mut entity = self.entity.write();
          op(&self.payload, rule.entity_field(), &mut entity, &self.params)
        }
        Some(ToEntity::Transform(f)) => {
          let value = f(
            &self.payload,
            rule.entity_field(),
            &self.entity.read(),
            &self.params,
          );
          value.and_then(|value| rule.assign(&mut self.entity.write(), value))
        }
        _ => {
          let value = self.payload[rule.wire_field()].clone();
          rule.assign(&mut self.entity.write(), value)
        }
      };

      if let Err(e) = applied {
        return Err(self.abort(e, rule.entity_field()));
      }
      self.cursor += 1;
    }

    self.state = ProcessState::Complete;
    if let Some(on_complete) = self.on_complete.take() {
      on_complete(&self.entity);
    }
    Ok(ProcessState::Complete)
  }

  /// Continue after the suspending operation has finished.
  pub fn resume(&mut self) -> Result<ProcessState> {
    if self.state != ProcessState::Suspended {
      bail!("Cannot resume a mapping process in state {:?}", self.state);
    }
    trace!(field = self.current_field(), "Resuming mapping");
    self.pending = None;
    self.cursor += 1;
    self.state = ProcessState::Running;
    self.execute()
  }

  /// Drive the process to completion, awaiting each asynchronous field in turn.
  pub async fn run(mut self) -> Result<Shared<T>> {
    let mut state = match self.state {
      ProcessState::Running => self.execute()?,
      state => state,
    };

    while state == ProcessState::Suspended {
      if let Some(pending) = self.pending.take() {
        if let Err(e) = pending.await {
          let field = self.current_field().unwrap_or_default().to_string();
          return Err(self.abort(e, &field));
        }
      }
      state = self.resume()?;
    }

    if state == ProcessState::Aborted {
      bail!("Mapping process was aborted");
    }
    Ok(self.entity)
  }

  fn abort(&mut self, error: color_eyre::Report, field: &str) -> color_eyre::Report {
    warn!(field, cursor = self.cursor, "Mapping aborted: {:#}", error);
    self.state = ProcessState::Aborted;
    self.pending = None;
    debug!(key = ?self.entity.read().key(), "Entity left partially mapped");
    error.wrap_err(format!("Failed to map field `{}`", field))
  }
}
