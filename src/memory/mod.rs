//! In-process collaborators
//!
//! Queue and registry store implementations for single-process deployments
//! (`translink standalone`) and tests, plus the moka-backed job cache.

mod cache;
mod queue;
mod store;

pub use cache::FinishedJobCache;
pub use queue::{MemoryQueue, QueueStats};
pub use store::MemoryStore;
