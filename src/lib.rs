//! Client-side entity cache and mapping engine for REST backends.
//!
//! Responses are mapped into typed entities through declarative
//! [`mapping::MappingPlan`]s and committed to an [`cache::EntityCache`] that
//! keeps exactly one live handle per record. Outbound payloads carry only
//! the fields that changed since the last sync.

pub mod api;
pub mod cache;
pub mod config;
pub mod entity;
pub mod mapping;
pub mod model;
