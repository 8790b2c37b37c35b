//! Endpoint templates, path ids, and query keys.

use serde_json::Value;
use std::collections::BTreeMap;
use url::form_urlencoded;

use crate::entity::value_to_key;

/// Values substituted into an endpoint template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIds(BTreeMap<String, String>);

impl PathIds {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
    self.0.insert(key.into(), value.to_string());
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.0.get(key).map(String::as_str)
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Path ids from entity field values. Non-scalar values are skipped.
  pub fn from_values(values: &BTreeMap<String, Value>) -> Self {
    Self(
      values
        .iter()
        .filter_map(|(k, v)| value_to_key(v).map(|v| (k.clone(), v)))
        .collect(),
    )
  }
}

impl From<u64> for PathIds {
  fn from(id: u64) -> Self {
    PathIds::new().with("id", id)
  }
}

impl From<i64> for PathIds {
  fn from(id: i64) -> Self {
    PathIds::new().with("id", id)
  }
}

impl From<&str> for PathIds {
  fn from(id: &str) -> Self {
    PathIds::new().with("id", id)
  }
}

impl From<String> for PathIds {
  fn from(id: String) -> Self {
    PathIds::new().with("id", id)
  }
}

/// An endpoint template such as `users/:id:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointFormat(String);

impl EndpointFormat {
  pub fn new(format: impl Into<String>) -> Self {
    Self(format.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// Fill `:name:` placeholders from `ids`; placeholders without a value
  /// are removed.
  pub fn build(&self, ids: &PathIds) -> String {
    let mut path = String::with_capacity(self.0.len());
    let mut rest = self.0.as_str();

    while let Some(start) = rest.find(':') {
      path.push_str(&rest[..start]);
      let after = &rest[start + 1..];
      let name_len = after
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
        .unwrap_or(after.len());

      if after[name_len..].starts_with(':') {
        if let Some(value) = ids.get(&after[..name_len]) {
          path.push_str(value);
        }
        rest = &after[name_len + 1..];
      } else {
        path.push(':');
        rest = after;
      }
    }

    path.push_str(rest);
    path
  }
}

impl From<&str> for EndpointFormat {
  fn from(format: &str) -> Self {
    Self::new(format)
  }
}

/// Cache key for a request: the path plus its encoded parameters.
pub fn query_key(path: &str, params: &BTreeMap<String, String>) -> String {
  if params.is_empty() {
    return path.to_string();
  }
  let query = form_urlencoded::Serializer::new(String::new())
    .extend_pairs(params)
    .finish();
  format!("{}?{}", path, query)
}
