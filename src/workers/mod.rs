//! Worker pools
//!
//! - `request`: consumes jobs, calls translators, publishes results
//! - `result`: routes results to live connections, forwards or holds them
//! - `holding`: short-lived buffer for results without a live owner
//! - `ledger`: duplicate-result suppression
//! - `retry`: backoff delays for transient backend failures

mod holding;
mod ledger;
mod request;
mod result;
mod retry;

pub use holding::{Held, HoldingArea};
pub use ledger::DeliveryLedger;
pub use request::{JobOutcome, RequestHandler, RequestHandlerPool};
pub use result::{ResultHandler, ResultHandlerPool, ResultOutcome, MAX_FORWARD_HOPS};
pub use retry::RetryPolicy;
