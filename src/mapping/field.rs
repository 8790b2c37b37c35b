//! Per-field accessor table.
//!
//! A [`Field`] pairs an entity field name with plain getter/setter functions
//! so a mapping plan can read and assign fields by index without reflection.
//! The [`field!`](crate::field) macro builds one from a struct field whose
//! type is serde-serializable.

use color_eyre::Result;
use serde_json::Value;

pub type Getter<T> = fn(&T) -> Result<Value>;
pub type Setter<T> = fn(&mut T, Value) -> Result<()>;

/// Named getter/setter pair for one entity field.
pub struct Field<T> {
  name: &'static str,
  get: Getter<T>,
  set: Setter<T>,
}

impl<T> Field<T> {
  pub const fn new(name: &'static str, get: Getter<T>, set: Setter<T>) -> Self {
    Self { name, get, set }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  /// Read the field as a wire value.
  pub fn read(&self, entity: &T) -> Result<Value> {
    (self.get)(entity)
  }

  /// Assign a wire value to the field.
  pub fn write(&self, entity: &mut T, value: Value) -> Result<()> {
    (self.set)(entity, value)
  }
}

impl<T> Clone for Field<T> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<T> Copy for Field<T> {}

impl<T> std::fmt::Debug for Field<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Field").field("name", &self.name).finish()
  }
}

/// Build a [`Field`] for `Type::field`, converting through `serde_json`.
///
/// ```ignore
/// let username = field!(User, username);
/// ```
#[macro_export]
macro_rules! field {
  ($ty:ty, $name:ident) => {
    $crate::mapping::Field::<$ty>::new(
      stringify!($name),
      |entity: &$ty| Ok(::serde_json::to_value(&entity.$name)?),
      |entity: &mut $ty, value: ::serde_json::Value| {
        entity.$name = ::serde_json::from_value(value)?;
        Ok(())
      },
    )
  };
}
