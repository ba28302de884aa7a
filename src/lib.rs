//! # Crucible
//!
//! An in-memory key/value store with sorted sets and optional on-disk
//! durability, built from scratch in Rust. Clients speak a small
//! line-based request/reply protocol rather than RESP; every state
//! change is appended to a per-dataset command log, and datasets are
//! periodically cut over to a point-in-time snapshot so recovery after a
//! crash only has to replay the tail of the log.

pub mod command;
pub mod config;
pub mod durability;
pub mod error;
pub mod server;
pub mod session;
pub mod store;
pub mod types;
