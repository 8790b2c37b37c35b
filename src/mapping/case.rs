//! Naming conventions used to derive wire keys from entity field names.

use heck::{ToLowerCamelCase, ToSnakeCase};
use serde::Deserialize;

/// Case used for keys on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKeyCase {
  /// `message_color`
  #[default]
  Snake,
  /// `messageColor`
  Camel,
  /// Use the entity field name unchanged
  Verbatim,
}

impl WireKeyCase {
  /// Derive the wire key for an entity field name.
  pub fn apply(self, entity_field: &str) -> String {
    match self {
      WireKeyCase::Snake => entity_field.to_snake_case(),
      WireKeyCase::Camel => entity_field.to_lower_camel_case(),
      WireKeyCase::Verbatim => entity_field.to_string(),
    }
  }
}
