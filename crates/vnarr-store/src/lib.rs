//! Persistence for the narration pipeline.
//!
//! Three repositories back the workflow executor:
//! - [`StepHistoryStore`]: append-only log of step attempts
//! - [`JobStateStore`]: the single mutable checkpoint per job
//! - [`JobStore`]: job records
//!
//! [`InMemoryStore`] implements all three for tests and single-process runs;
//! [`RedisStore`] is the durable implementation.

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};
pub use traits::{running_attempt, JobStateStore, JobStore, StepHistoryStore};
