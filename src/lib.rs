//! This crate contains the runtime core of the orbsix object request broker.
//!
//! It covers sticky endpoint selection with failover, portable interceptor
//! chains for client and server requests, a dynamically sized worker pool and
//! the container tying them together.

pub mod config;
pub mod core;
pub mod interceptor;
pub mod logging;
pub mod orchestration;
pub mod pool;
pub mod selector;
