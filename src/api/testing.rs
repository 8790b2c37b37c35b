//! In-memory transport that replays canned responses and records requests.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use super::transport::{Headers, Transport};
use crate::entity::Payload;

#[derive(Default)]
pub(crate) struct RecordingTransport {
  responses: Mutex<HashMap<String, VecDeque<Result<Value, String>>>>,
  calls: Mutex<Vec<(String, Option<Payload>)>>,
  headers: Mutex<Vec<Headers>>,
}

impl RecordingTransport {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  /// Queue a response for a request such as `GET users/1`. The last queued
  /// response is repeated once the queue is down to one.
  pub(crate) fn respond(&self, request: &str, value: Value) {
    self.push(request, Ok(value));
  }

  pub(crate) fn fail(&self, request: &str, message: &str) {
    self.push(request, Err(message.to_string()));
  }

  fn push(&self, request: &str, response: Result<Value, String>) {
    self
      .responses
      .lock()
      .entry(request.to_string())
      .or_default()
      .push_back(response);
  }

  pub(crate) fn calls(&self) -> Vec<String> {
    self.calls.lock().iter().map(|(r, _)| r.clone()).collect()
  }

  pub(crate) fn count(&self, request: &str) -> usize {
    self.calls.lock().iter().filter(|(r, _)| r == request).count()
  }

  pub(crate) fn last_body(&self) -> Option<Payload> {
    self.calls.lock().last().and_then(|(_, body)| body.clone())
  }

  pub(crate) fn last_headers(&self) -> Option<Headers> {
    self.headers.lock().last().cloned()
  }

  fn answer(
    &self,
    method: &str,
    endpoint: &str,
    body: Option<&Payload>,
    headers: &Headers,
  ) -> Result<Value> {
    let request = format!("{} {}", method, endpoint);
    self.calls.lock().push((request.clone(), body.cloned()));
    self.headers.lock().push(headers.clone());

    let mut responses = self.responses.lock();
    let queue = responses
      .get_mut(&request)
      .ok_or_else(|| eyre!("No response for {}", request))?;
    let response = if queue.len() > 1 {
      queue.pop_front()
    } else {
      queue.front().cloned()
    };

    match response {
      Some(Ok(value)) => Ok(value),
      Some(Err(message)) => Err(eyre!(message)),
      None => Err(eyre!("No response for {}", request)),
    }
  }
}

#[async_trait]
impl Transport for RecordingTransport {
  async fn get(&self, endpoint: &str, headers: &Headers) -> Result<Value> {
    self.answer("GET", endpoint, None, headers)
  }

  async fn query(&self, endpoint: &str, headers: &Headers) -> Result<Value> {
    self.answer("GET", endpoint, None, headers)
  }

  async fn create(&self, endpoint: &str, body: Option<&Payload>, headers: &Headers) -> Result<Value> {
    self.answer("POST", endpoint, body, headers)
  }

  async fn update(&self, endpoint: &str, body: Option<&Payload>, headers: &Headers) -> Result<Value> {
    self.answer("PUT", endpoint, body, headers)
  }

  async fn delete(&self, endpoint: &str, headers: &Headers) -> Result<Value> {
    self.answer("DELETE", endpoint, None, headers)
  }
}
