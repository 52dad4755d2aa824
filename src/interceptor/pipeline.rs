//! Request interception state machine
//!
//! Start points run in registration order and push the interceptor on the
//! request's flow stack. End points pop the flow stack, so they run in reverse
//! order and only for interceptors whose start point completed. A signal from
//! any point replaces the request's disposition for the remaining end points:
//! `Fatal` switches them to the exception variant, `Forward` to the "other"
//! variant.

use std::sync::{
    atomic::{AtomicIsize, Ordering},
    Arc,
};

use bytes::Bytes;
use log::{debug, warn};

use crate::core::{
    context::{ReplyStatus, RequestContext},
    error::{OrbError, OrbResult, SystemException},
    traits::{InterceptSignal, ServantLocator},
};
use crate::selector::ObjectRef;

use super::chain::{InterceptorChain, InterceptorList};

/// Which side of a request a pipeline intercepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Client => "client",
            Side::Server => "server",
        }
    }
}

/// Final disposition of one pass through the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Completed(Bytes),
    Failed(SystemException),
    Forwarded(ObjectRef),
}

impl From<ReplyStatus> for Outcome {
    fn from(status: ReplyStatus) -> Self {
        match status {
            ReplyStatus::Reply(body) => Outcome::Completed(body),
            ReplyStatus::Exception(ex) => Outcome::Failed(ex),
            ReplyStatus::LocationForward(target) => Outcome::Forwarded(target),
        }
    }
}

impl From<InterceptSignal> for ReplyStatus {
    fn from(signal: InterceptSignal) -> Self {
        match signal {
            InterceptSignal::Fatal(ex) => ReplyStatus::Exception(ex),
            InterceptSignal::Forward(target) => ReplyStatus::LocationForward(target),
        }
    }
}

/// Runs requests through an interceptor chain.
pub struct InterceptorPipeline {
    chain: Arc<InterceptorChain>,
    side: Side,
    /// Completed start points minus end points delivered, across all requests
    balance: AtomicIsize,
}

impl InterceptorPipeline {
    pub fn new(chain: Arc<InterceptorChain>, side: Side) -> Self {
        Self {
            chain,
            side,
            balance: AtomicIsize::new(0),
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn chain(&self) -> &Arc<InterceptorChain> {
        &self.chain
    }

    /// Outstanding start points. Zero whenever no request is in flight.
    pub fn balance(&self) -> isize {
        self.balance.load(Ordering::SeqCst)
    }

    /// Single client pass: `send_request` on every interceptor, the transport
    /// call, then the matching end point in reverse order.
    pub fn invoke_client<F>(&self, ctx: &mut RequestContext, mut transport: F) -> Outcome
    where
        F: FnMut(&mut RequestContext) -> ReplyStatus,
    {
        let interceptors = self.begin(ctx);

        for interceptor in interceptors.iter() {
            if let Err(signal) = interceptor.send_request(ctx) {
                debug!(
                    "send_request of '{}' raised {signal:?} for request {}",
                    interceptor.name(),
                    ctx.request_id()
                );
                ctx.set_reply_status(signal.into());
                return self.unwind(ctx, &interceptors);
            }
            self.push(ctx);
        }

        let status = transport(ctx);
        ctx.set_reply_status(status);
        self.unwind(ctx, &interceptors)
    }

    /// Single server pass: `receive_request_service_contexts`, servant
    /// location, `receive_request`, the servant, then the matching end point in
    /// reverse order.
    pub fn invoke_server(&self, ctx: &mut RequestContext, locator: &dyn ServantLocator) -> Outcome {
        let interceptors = self.begin(ctx);

        for interceptor in interceptors.iter() {
            if let Err(signal) = interceptor.receive_request_service_contexts(ctx) {
                debug!(
                    "receive_request_service_contexts of '{}' raised {signal:?} for request {}",
                    interceptor.name(),
                    ctx.request_id()
                );
                ctx.set_reply_status(signal.into());
                return self.unwind(ctx, &interceptors);
            }
            self.push(ctx);
        }

        let servant = match locator.preinvoke(ctx) {
            Ok(servant) => servant,
            Err(signal) => {
                debug!(
                    "Servant location raised {signal:?} for request {}",
                    ctx.request_id()
                );
                ctx.set_reply_status(signal.into());
                return self.unwind(ctx, &interceptors);
            }
        };

        // Every interceptor is already on the flow stack here, so a signal
        // from receive_request is delivered to all of them.
        for interceptor in interceptors.iter() {
            if let Err(signal) = interceptor.receive_request(ctx) {
                debug!(
                    "receive_request of '{}' raised {signal:?} for request {}",
                    interceptor.name(),
                    ctx.request_id()
                );
                ctx.set_reply_status(signal.into());
                locator.postinvoke(ctx, &servant);
                return self.unwind(ctx, &interceptors);
            }
        }

        let status = servant.invoke(ctx);
        locator.postinvoke(ctx, &servant);
        ctx.set_reply_status(status);
        self.unwind(ctx, &interceptors)
    }

    /// Client passes until the request completes or fails, restarting from the
    /// first interceptor against every forward target.
    pub fn invoke_client_with_forwarding<F>(
        &self,
        ctx: &mut RequestContext,
        max_forwards: usize,
        mut transport: F,
    ) -> OrbResult<Bytes>
    where
        F: FnMut(&mut RequestContext) -> ReplyStatus,
    {
        loop {
            match self.invoke_client(ctx, &mut transport) {
                Outcome::Completed(body) => return Ok(body),
                Outcome::Failed(ex) => return Err(OrbError::InterceptorFatal(ex)),
                Outcome::Forwarded(target) => {
                    if ctx.forwards >= max_forwards {
                        warn!(
                            "Request {} exceeded {max_forwards} forwards at {target}",
                            ctx.request_id()
                        );
                        return Err(OrbError::TooManyForwards(max_forwards));
                    }
                    ctx.forwards += 1;
                    debug!("Request {} forwarded to {target}", ctx.request_id());
                    ctx.set_effective_target(target);
                }
            }
        }
    }

    fn begin(&self, ctx: &mut RequestContext) -> InterceptorList {
        let interceptors = self.chain.snapshot();
        ctx.interceptors = interceptors.clone();
        ctx.flow_depth = 0;
        ctx.take_reply_status();
        interceptors
    }

    fn push(&self, ctx: &mut RequestContext) {
        ctx.flow_depth += 1;
        self.balance.fetch_add(1, Ordering::SeqCst);
    }

    fn unwind(&self, ctx: &mut RequestContext, interceptors: &InterceptorList) -> Outcome {
        while ctx.flow_depth > 0 {
            ctx.flow_depth -= 1;
            self.balance.fetch_sub(1, Ordering::SeqCst);

            let interceptor = &interceptors[ctx.flow_depth];
            let result = match (self.side, ctx.reply_status()) {
                (Side::Client, Some(ReplyStatus::Reply(_))) => interceptor.receive_reply(ctx),
                (Side::Client, Some(ReplyStatus::LocationForward(_))) => {
                    interceptor.receive_other(ctx)
                }
                (Side::Client, Some(ReplyStatus::Exception(_)) | None) => {
                    interceptor.receive_exception(ctx)
                }
                (Side::Server, Some(ReplyStatus::Reply(_))) => interceptor.send_reply(ctx),
                (Side::Server, Some(ReplyStatus::LocationForward(_))) => {
                    interceptor.send_other(ctx)
                }
                (Side::Server, Some(ReplyStatus::Exception(_)) | None) => {
                    interceptor.send_exception(ctx)
                }
            };

            if let Err(signal) = result {
                debug!(
                    "End point of '{}' raised {signal:?} for request {}",
                    interceptor.name(),
                    ctx.request_id()
                );
                ctx.set_reply_status(signal.into());
            }
        }

        match ctx.reply_status() {
            Some(status) => status.clone().into(),
            None => Outcome::Failed(SystemException::internal("no reply status")),
        }
    }
}
