//! Database module - PostgreSQL collaborators
//!
//! Provides durable implementations of the broker's external collaborators:
//! - `PgQueue`: leased, at-least-once work queue
//! - `PgStore`: versioned key/value registry store with TTL

mod postgres;
mod queue;
mod registry;

pub use postgres::{init_pool, migrations, PostgresPool};
pub use queue::PgQueue;
pub use registry::PgStore;
