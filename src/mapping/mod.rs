//! Declarative mapping between wire payloads and in-memory entities.
//!
//! - A [`MappingPlan`] is an ordered table of [`FieldRule`]s plus the policy
//!   for outbound serialization (allow-list and changed-only diffing)
//! - A [`MappingProcess`] executes a plan against one entity and payload,
//!   suspending on asynchronous field operations

mod case;
mod field;
mod plan;
mod process;

pub use case::WireKeyCase;
pub use field::{Field, Getter, Setter};
pub use plan::{
  AsyncOperationFn, CompletionFn, FieldRule, MappingPlan, OperationFn, ToEntity, ToWireFn,
  TransformFn,
};
pub use process::{FieldContext, MappingProcess, ProcessState};
