//! # Translink
//!
//! An asynchronous text-translation broker built with Rust.
//!
//! ## Features
//!
//! - **Session Routing:** Results find the live connection that submitted the
//!   job, on whichever gateway node holds it
//! - **Durable Queues:** Jobs and results move over an at-least-once work
//!   queue (in-process or PostgreSQL)
//! - **Bounded Retries:** Transient backend failures are retried with
//!   exponential backoff, with the retry counter carried in the job
//! - **Reconnect Grace:** Results for a briefly disconnected client are held
//!   until it resumes its session
//! - **Pluggable Backends:** HTTP JSON translator endpoints per selector

pub mod config;
pub mod core;
pub mod database;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod translators;
pub mod workers;

pub use config::Config;
pub use error::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
