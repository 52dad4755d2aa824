//! Client request dispatch
//!
//! Ties endpoint resolution, sticky selection, the client interceptor pipeline
//! and the transport together. A transport failure fails over to the next
//! candidate; every attempt is a complete interceptor cycle.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, warn};

use crate::{
    core::{
        context::{ReplyStatus, RequestContext},
        error::{OrbError, OrbResult},
        traits::{EndpointResolver, Transport},
    },
    interceptor::{InterceptorPipeline, Outcome},
    pool::WorkerPool,
    selector::{Endpoint, EndpointSelector, ObjectRef},
};

/// Client side entry point of the ORB.
#[derive(Clone)]
pub struct RequestDispatcher {
    pipeline: Arc<InterceptorPipeline>,
    selector: Arc<EndpointSelector>,
    resolver: Arc<dyn EndpointResolver>,
    transport: Arc<dyn Transport>,
    pool: Arc<WorkerPool>,
    max_forwards: usize,
}

impl RequestDispatcher {
    pub fn new(
        pipeline: Arc<InterceptorPipeline>,
        selector: Arc<EndpointSelector>,
        resolver: Arc<dyn EndpointResolver>,
        transport: Arc<dyn Transport>,
        pool: Arc<WorkerPool>,
        max_forwards: usize,
    ) -> Self {
        Self {
            pipeline,
            selector,
            resolver,
            transport,
            pool,
            max_forwards,
        }
    }

    pub fn selector(&self) -> &Arc<EndpointSelector> {
        &self.selector
    }

    pub fn pipeline(&self) -> &Arc<InterceptorPipeline> {
        &self.pipeline
    }

    /// Invoke `operation` on `target` and wait for the reply.
    pub fn dispatch(&self, operation: &str, target: ObjectRef, body: Bytes) -> OrbResult<Bytes> {
        let mut ctx = RequestContext::new(operation, target, body);
        self.dispatch_with_context(&mut ctx)
    }

    /// Invoke the request described by `ctx`, following forwards and failing
    /// over between candidates.
    ///
    /// # Errors
    /// - `InterceptorFatal` when the request ends with a system exception
    /// - `TooManyForwards` when the forward bound is exceeded
    /// - `StaleCandidateList` when the failed endpoint vanished from the
    ///   freshly resolved candidates; such requests are never retried
    pub fn dispatch_with_context(&self, ctx: &mut RequestContext) -> OrbResult<Bytes> {
        let mut previous: Option<Endpoint> = None;

        loop {
            let target = ctx.effective_target().clone();
            let primary = target.primary();
            let candidates = self.resolver.resolve(&target)?;
            let last = previous.as_ref();
            let endpoint = self.selector.next(primary, last, &candidates)?;

            ctx.selected = Some(endpoint.clone());
            ctx.attempts += 1;
            debug!(
                "Request {} attempt {} for {} on {endpoint}",
                ctx.request_id(),
                ctx.attempts,
                ctx.operation()
            );

            let mut transport_failed = false;
            let outcome = self.pipeline.invoke_client(ctx, |ctx| {
                let status = self.transport.send(&endpoint, ctx);
                transport_failed = matches!(
                    &status,
                    ReplyStatus::Exception(ex) if ex.kind.is_transport_failure()
                );
                status
            });

            match outcome {
                Outcome::Completed(body) => return Ok(body),
                Outcome::Forwarded(next) => {
                    if ctx.forwards >= self.max_forwards {
                        warn!(
                            "Request {} exceeded {} forwards at {next}",
                            ctx.request_id(),
                            self.max_forwards
                        );
                        return Err(OrbError::TooManyForwards(self.max_forwards));
                    }
                    ctx.forwards += 1;
                    debug!("Request {} forwarded to {next}", ctx.request_id());
                    ctx.set_effective_target(next);
                    previous = None;
                }
                Outcome::Failed(ex) => {
                    // Only failures reported by the transport itself fail
                    // over, not exceptions raised by interceptors
                    if transport_failed && ex.kind.is_transport_failure() {
                        let failed = Some(&endpoint);
                        if self.selector.has_next(primary, failed, &candidates)? {
                            warn!(
                                "Request {} failed on {endpoint} ({}), failing over",
                                ctx.request_id(),
                                ex.kind
                            );
                            previous = Some(endpoint);
                            continue;
                        }
                        warn!(
                            "Request {} exhausted {} candidates of {primary}",
                            ctx.request_id(),
                            candidates.len()
                        );
                        self.selector.reset(primary);
                    }
                    return Err(OrbError::InterceptorFatal(ex));
                }
            }
        }
    }

    /// Run `dispatch` on the worker pool and hand the result to `callback`.
    pub fn dispatch_async<F>(
        &self,
        operation: &str,
        target: ObjectRef,
        body: Bytes,
        callback: F,
    ) -> OrbResult<()>
    where
        F: FnOnce(OrbResult<Bytes>) + Send + 'static,
    {
        let dispatcher = self.clone();
        let mut ctx = RequestContext::new(operation, target, body);
        let name = format!("dispatch {operation}");

        self.pool.execute(name, move || {
            callback(dispatcher.dispatch_with_context(&mut ctx));
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::mpsc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;
    use crate::{
        config::PoolConfig,
        core::error::{ExceptionKind, SystemException},
        interceptor::{
            recorder::{Behavior, Recorder, RecordingInterceptor},
            InterceptorChain, Side,
        },
        selector::{StaticResolver, TargetIdentity},
    };

    /// Transport scripted per port: down ports fail with COMM_FAILURE,
    /// forwarding ports answer with a location forward.
    #[derive(Default)]
    struct ScriptedTransport {
        down: Mutex<Vec<u16>>,
        forwards: HashMap<u16, ObjectRef>,
        calls: Mutex<Vec<u16>>,
    }

    impl Transport for ScriptedTransport {
        fn send(&self, endpoint: &Endpoint, _ctx: &RequestContext) -> ReplyStatus {
            self.calls.lock().push(endpoint.port());
            if self.down.lock().contains(&endpoint.port()) {
                return ReplyStatus::Exception(SystemException::comm_failure("connection refused"));
            }
            if let Some(target) = self.forwards.get(&endpoint.port()) {
                return ReplyStatus::LocationForward(target.clone());
            }
            ReplyStatus::Reply(Bytes::from(format!("reply from {}", endpoint.port())))
        }
    }

    fn target(id: &str, port: u16) -> ObjectRef {
        let identity = TargetIdentity::new(id);
        ObjectRef::new(identity, "Hello", "clear", "127.0.0.1", port)
    }

    fn endpoint(id: &str, port: u16) -> Endpoint {
        Endpoint::new("clear", "127.0.0.1", port, TargetIdentity::new(id))
    }

    fn endpoints(id: &str, ports: &[u16]) -> Vec<Endpoint> {
        ports.iter().map(|&port| endpoint(id, port)).collect()
    }

    fn dispatcher(
        transport: Arc<ScriptedTransport>,
        resolver: Arc<StaticResolver>,
        interceptors: Vec<RecordingInterceptor>,
    ) -> RequestDispatcher {
        let chain = Arc::new(InterceptorChain::new("client"));
        for interceptor in interceptors {
            chain.add(Arc::new(interceptor)).unwrap();
        }
        chain.seal();

        let pool = WorkerPool::new(&PoolConfig {
            name: "dispatch-test".to_string(),
            min_threads: 0,
            max_threads: 2,
            idle_timeout_ms: 100,
        })
        .unwrap();

        RequestDispatcher::new(
            Arc::new(InterceptorPipeline::new(chain, Side::Client)),
            Arc::new(EndpointSelector::new()),
            resolver,
            transport,
            Arc::new(pool),
            3,
        )
    }

    fn resolver_with(id: &str, ports: &[u16]) -> Arc<StaticResolver> {
        let resolver = Arc::new(StaticResolver::new());
        resolver.insert(TargetIdentity::new(id), endpoints(id, ports));
        resolver
    }

    #[test]
    fn test_dispatch_sticks_to_first_candidate() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = dispatcher(transport.clone(), resolver_with("a", &[1, 2]), vec![]);

        for _ in 0..3 {
            let reply = dispatcher
                .dispatch("sayHello", target("a", 9000), Bytes::new())
                .unwrap();
            assert_eq!(reply, Bytes::from_static(b"reply from 1"));
        }
        assert_eq!(*transport.calls.lock(), vec![1, 1, 1]);
    }

    #[test]
    fn test_failover_moves_to_next_candidate_and_sticks() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.down.lock().push(1);
        let recorder = Recorder::default();
        let dispatcher = dispatcher(
            transport.clone(),
            resolver_with("a", &[1, 2, 3]),
            vec![RecordingInterceptor::new("1", recorder.clone())],
        );

        let mut ctx = RequestContext::new("sayHello", target("a", 9000), Bytes::new());
        let reply = dispatcher.dispatch_with_context(&mut ctx).unwrap();

        assert_eq!(reply, Bytes::from_static(b"reply from 2"));
        assert_eq!(ctx.attempts, 2);
        assert_eq!(recorder.joined(), "sr1,re1,sr1,rr1");

        // the next request starts on the endpoint that worked
        dispatcher
            .dispatch("sayHello", target("a", 9000), Bytes::new())
            .unwrap();
        assert_eq!(*transport.calls.lock(), vec![1, 2, 2]);
    }

    #[test]
    fn test_exhausted_candidates_reset_stickiness() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.down.lock().extend([1, 2]);
        let dispatcher = dispatcher(transport.clone(), resolver_with("a", &[1, 2]), vec![]);
        let primary = target("a", 9000).primary().clone();

        let err = dispatcher
            .dispatch("sayHello", target("a", 9000), Bytes::new())
            .unwrap_err();
        let OrbError::InterceptorFatal(ex) = err else {
            panic!("expected an interceptor failure");
        };
        assert_eq!(ex.kind, ExceptionKind::CommFailure);
        assert!(dispatcher.selector().sticky(&primary).is_none());

        // once the first endpoint is back the next request starts there again
        transport.down.lock().clear();
        dispatcher
            .dispatch("sayHello", target("a", 9000), Bytes::new())
            .unwrap();
        assert_eq!(*transport.calls.lock(), vec![1, 2, 1]);
    }

    #[test]
    fn test_interceptor_exception_does_not_fail_over() {
        let transport = Arc::new(ScriptedTransport::default());
        let recorder = Recorder::default();
        let dispatcher = dispatcher(
            transport.clone(),
            resolver_with("a", &[1, 2]),
            vec![RecordingInterceptor::new("1", recorder.clone())
                .on("sr", Behavior::Fatal(ExceptionKind::Transient))],
        );

        let err = dispatcher
            .dispatch("sayHello", target("a", 9000), Bytes::new())
            .unwrap_err();
        assert!(matches!(err, OrbError::InterceptorFatal(_)));
        assert!(transport.calls.lock().is_empty());
    }

    #[test]
    fn test_stale_candidate_list_is_fatal() {
        struct ShrinkingResolver {
            lists: Mutex<Vec<Vec<Endpoint>>>,
        }

        impl EndpointResolver for ShrinkingResolver {
            fn resolve(&self, _target: &ObjectRef) -> OrbResult<Vec<Endpoint>> {
                let mut lists = self.lists.lock();
                Ok(if lists.len() > 1 {
                    lists.remove(0)
                } else {
                    lists[0].clone()
                })
            }
        }

        let transport = Arc::new(ScriptedTransport::default());
        transport.down.lock().push(1);
        let resolver = Arc::new(ShrinkingResolver {
            lists: Mutex::new(vec![endpoints("a", &[1, 2]), endpoints("a", &[2, 3])]),
        });

        let chain = Arc::new(InterceptorChain::new("client"));
        chain.seal();
        let dispatcher = RequestDispatcher::new(
            Arc::new(InterceptorPipeline::new(chain, Side::Client)),
            Arc::new(EndpointSelector::new()),
            resolver,
            transport.clone(),
            Arc::new(WorkerPool::new(&PoolConfig::default()).unwrap()),
            3,
        );

        let err = dispatcher
            .dispatch("sayHello", target("a", 9000), Bytes::new())
            .unwrap_err();
        assert!(matches!(err, OrbError::StaleCandidateList(_)));
        assert_eq!(*transport.calls.lock(), vec![1]);
    }

    #[test]
    fn test_forward_reselects_for_new_target() {
        let mut transport = ScriptedTransport::default();
        transport.forwards.insert(1, target("b", 9100));
        let transport = Arc::new(transport);

        let resolver = resolver_with("a", &[1]);
        resolver.insert(TargetIdentity::new("b"), endpoints("b", &[5]));
        let dispatcher = dispatcher(transport.clone(), resolver, vec![]);

        let mut ctx = RequestContext::new("sayHello", target("a", 9000), Bytes::new());
        let reply = dispatcher.dispatch_with_context(&mut ctx).unwrap();

        assert_eq!(reply, Bytes::from_static(b"reply from 5"));
        assert_eq!(ctx.forwards, 1);
        assert_eq!(ctx.effective_target().identity().as_str(), "b");
        assert_eq!(*transport.calls.lock(), vec![1, 5]);
    }

    #[test]
    fn test_forward_loop_is_bounded() {
        let mut transport = ScriptedTransport::default();
        transport.forwards.insert(1, target("a", 9000));
        let transport = Arc::new(transport);
        let dispatcher = dispatcher(transport.clone(), resolver_with("a", &[1]), vec![]);

        let err = dispatcher
            .dispatch("sayHello", target("a", 9000), Bytes::new())
            .unwrap_err();
        assert!(matches!(err, OrbError::TooManyForwards(3)));
        assert_eq!(transport.calls.lock().len(), 4);
    }

    #[test]
    fn test_dispatch_async_runs_on_pool() {
        let transport = Arc::new(ScriptedTransport::default());
        let dispatcher = dispatcher(transport, resolver_with("a", &[7]), vec![]);
        let (tx, rx) = mpsc::channel();

        dispatcher
            .dispatch_async("sayHello", target("a", 9000), Bytes::new(), move |result| {
                tx.send(result.map_err(|e| e.to_string())).ok();
            })
            .unwrap();

        let reply = rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();
        assert_eq!(reply, Bytes::from_static(b"reply from 7"));
    }
}
