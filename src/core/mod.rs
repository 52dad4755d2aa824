//! Core abstractions and interfaces for orbsix
//!
//! This module provides the foundational traits, types, and utilities
//! that form the backbone of the ORB runtime.

pub mod container;
pub mod context;
pub mod error;
pub mod traits;


// Re-export commonly used types
pub use container::{Orb, OrbBuilder};
pub use context::{ReplyStatus, RequestContext};
pub use error::{CompletionStatus, ExceptionKind, OrbError, OrbResult, SystemException};
pub use traits::*;
