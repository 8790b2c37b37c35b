//! Entity services over a request transport.

pub mod endpoint;
pub mod options;
pub mod service;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;

pub use endpoint::{query_key, EndpointFormat, PathIds};
pub use options::RequestOptions;
pub use service::EntityService;
pub use transport::{Headers, HttpTransport, Transport};
