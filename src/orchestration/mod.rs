//! Request orchestration layer
//!
//! Coordinates the selector, the interceptor pipelines, the transport and the
//! servants for client and server requests.

pub mod dispatcher;
pub mod server;

pub use dispatcher::RequestDispatcher;
pub use server::{ServantRegistry, ServerRequestHandler};
