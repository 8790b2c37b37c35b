//! Client-side entity cache.
//!
//! This module provides a transport-agnostic caching mechanism that:
//! - Keeps one live handle per entity key and merges updates into it
//! - Memoizes query answers with a time-to-live and lazy expiry
//! - Publishes the full cache contents on every committed mutation

mod clock;
mod layer;
mod storage;
mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use layer::CacheLayer;
pub use storage::{EntityCache, QueryRecord, DEFAULT_TTL_MILLIS};
pub use traits::{CacheHitPolicy, CacheResult, CacheSource, GetCacheBehaviour};
