//! Core traits for orbsix components
//!
//! This module defines the interfaces at the seams between the runtime and
//! the code that plugs into it: interceptors, transports, servants and
//! endpoint resolution.

use std::sync::Arc;

use super::{
    context::{ReplyStatus, RequestContext},
    error::{OrbResult, SystemException},
};
use crate::selector::{Endpoint, ObjectRef};

/// Non-normal result of an interceptor point.
#[derive(Clone, Debug, PartialEq)]
pub enum InterceptSignal {
    /// Abort the request with a system exception
    Fatal(SystemException),
    /// Retarget the request and restart interception
    Forward(ObjectRef),
}

impl From<SystemException> for InterceptSignal {
    fn from(ex: SystemException) -> Self {
        InterceptSignal::Fatal(ex)
    }
}

/// Result of one interceptor point.
pub type InterceptResult = Result<(), InterceptSignal>;

/// Request interceptor.
///
/// Start points run in registration order, end points in reverse order and
/// only on interceptors whose start point completed. An interceptor that is
/// registered on the client chain only sees client points, and likewise for
/// the server chain.
pub trait Interceptor: Send + Sync {
    /// Name of this interceptor, unique within a chain unless empty
    fn name(&self) -> &str;

    /// Client start point, before the request is handed to the transport.
    fn send_request(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Client end point for a normal reply.
    fn receive_reply(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Client end point for an exception.
    fn receive_exception(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Client end point for a forward.
    fn receive_other(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Server start point, before the servant is located.
    fn receive_request_service_contexts(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Server intermediate point, after the servant is located.
    fn receive_request(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Server end point for a normal reply.
    fn send_reply(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Server end point for an exception.
    fn send_exception(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Server end point for a forward.
    fn send_other(&self, _ctx: &mut RequestContext) -> InterceptResult {
        Ok(())
    }

    /// Called once when the ORB shuts down.
    fn destroy(&self) {}
}

/// Performs the network call between the client start and end points.
pub trait Transport: Send + Sync {
    fn send(&self, endpoint: &Endpoint, ctx: &RequestContext) -> ReplyStatus;
}

/// Server-side object implementation.
pub trait Servant: Send + Sync {
    fn invoke(&self, ctx: &mut RequestContext) -> ReplyStatus;
}

/// Server-side lookup of the servant for an incoming request.
pub trait ServantLocator: Send + Sync {
    /// Locate the servant, or ask for the request to be forwarded or failed.
    fn preinvoke(&self, ctx: &mut RequestContext) -> Result<Arc<dyn Servant>, InterceptSignal>;

    /// Called after the servant ran, whatever its outcome.
    fn postinvoke(&self, _ctx: &mut RequestContext, _servant: &Arc<dyn Servant>) {}
}

/// Produces the ordered candidate list for a target on every dispatch attempt.
pub trait EndpointResolver: Send + Sync {
    fn resolve(&self, target: &ObjectRef) -> OrbResult<Vec<Endpoint>>;
}

/// Factory that builds an interceptor from its JSON configuration.
pub type InterceptorCreateFn = fn(serde_json::Value) -> OrbResult<Arc<dyn Interceptor>>;
