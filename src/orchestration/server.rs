//! Server request handling

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info};

use crate::{
    core::{
        context::RequestContext,
        error::{ExceptionKind, OrbResult, SystemException},
        traits::{InterceptSignal, Servant, ServantLocator},
    },
    interceptor::{InterceptorPipeline, Outcome},
    pool::WorkerPool,
    selector::ObjectRef,
};

/// Servant locator backed by a concurrent map keyed by object key.
#[derive(Default)]
pub struct ServantRegistry {
    servants: DashMap<String, Arc<dyn Servant>>,
}

impl ServantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, object_key: impl Into<String>, servant: Arc<dyn Servant>) {
        let object_key = object_key.into();
        info!("Registering servant for object key '{object_key}'");
        self.servants.insert(object_key, servant);
    }

    pub fn unregister(&self, object_key: &str) -> Option<Arc<dyn Servant>> {
        self.servants.remove(object_key).map(|(_, servant)| servant)
    }

    pub fn len(&self) -> usize {
        self.servants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servants.is_empty()
    }
}

impl ServantLocator for ServantRegistry {
    fn preinvoke(&self, ctx: &mut RequestContext) -> Result<Arc<dyn Servant>, InterceptSignal> {
        let object_key = ctx.effective_target().object_key();
        match self.servants.get(object_key) {
            Some(servant) => Ok(servant.value().clone()),
            None => {
                debug!("No servant for object key '{object_key}'");
                Err(InterceptSignal::Fatal(SystemException::new(
                    ExceptionKind::ObjectNotExist,
                    format!("no servant for object key '{object_key}'"),
                )))
            }
        }
    }
}

/// Server side entry point of the ORB.
#[derive(Clone)]
pub struct ServerRequestHandler {
    pipeline: Arc<InterceptorPipeline>,
    locator: Arc<dyn ServantLocator>,
    pool: Arc<WorkerPool>,
}

impl ServerRequestHandler {
    pub fn new(
        pipeline: Arc<InterceptorPipeline>,
        locator: Arc<dyn ServantLocator>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            pipeline,
            locator,
            pool,
        }
    }

    pub fn pipeline(&self) -> &Arc<InterceptorPipeline> {
        &self.pipeline
    }

    /// Run an incoming request through the server interceptors and its servant.
    pub fn handle(&self, ctx: &mut RequestContext) -> Outcome {
        let outcome = self.pipeline.invoke_server(ctx, self.locator.as_ref());
        debug!(
            "Handled {} of request {}: {}",
            ctx.operation(),
            ctx.request_id(),
            ctx.reply_status().map_or("none", |status| status.label())
        );
        outcome
    }

    /// Build the request context from what the transport received and handle it.
    pub fn handle_request(
        &self,
        operation: &str,
        target: ObjectRef,
        body: Bytes,
        service_contexts: HashMap<u32, Bytes>,
    ) -> Outcome {
        let mut ctx = RequestContext::new(operation, target, body);
        for (id, data) in service_contexts {
            ctx.add_request_service_context(id, data);
        }
        self.handle(&mut ctx)
    }

    /// Handle the request on the worker pool and pass the finished context to
    /// `callback`.
    pub fn handle_async<F>(&self, mut ctx: RequestContext, callback: F) -> OrbResult<()>
    where
        F: FnOnce(Outcome, RequestContext) + Send + 'static,
    {
        let handler = self.clone();
        let name = format!("handle {}", ctx.operation());

        self.pool.execute(name, move || {
            let outcome = handler.handle(&mut ctx);
            callback(outcome, ctx);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::time::Duration;

    use super::*;
    use crate::{
        config::PoolConfig,
        core::context::ReplyStatus,
        interceptor::{
            recorder::{Recorder, RecordingInterceptor},
            InterceptorChain, Side,
        },
        selector::TargetIdentity,
    };

    struct Upper;

    impl Servant for Upper {
        fn invoke(&self, ctx: &mut RequestContext) -> ReplyStatus {
            ReplyStatus::Reply(Bytes::from(ctx.request_body().to_ascii_uppercase()))
        }
    }

    fn target(key: &str) -> ObjectRef {
        let identity = TargetIdentity::new("server");
        ObjectRef::new(identity, key, "clear", "127.0.0.1", 3700)
    }

    fn handler(recorder: &Recorder) -> ServerRequestHandler {
        let chain = Arc::new(InterceptorChain::new("server"));
        chain
            .add(Arc::new(RecordingInterceptor::new("1", recorder.clone())))
            .unwrap();
        chain.seal();

        let registry = Arc::new(ServantRegistry::new());
        registry.register("Upper", Arc::new(Upper));

        let pool = WorkerPool::new(&PoolConfig {
            name: "server-test".to_string(),
            min_threads: 0,
            max_threads: 2,
            idle_timeout_ms: 100,
        })
        .unwrap();

        ServerRequestHandler::new(
            Arc::new(InterceptorPipeline::new(chain, Side::Server)),
            registry,
            Arc::new(pool),
        )
    }

    #[test]
    fn test_handle_invokes_registered_servant() {
        let recorder = Recorder::default();
        let handler = handler(&recorder);

        let outcome = handler.handle_request(
            "upper",
            target("Upper"),
            Bytes::from_static(b"hello"),
            HashMap::new(),
        );

        assert_eq!(outcome, Outcome::Completed(Bytes::from_static(b"HELLO")));
        assert_eq!(recorder.joined(), "rs1,rq1,sp1");
    }

    #[test]
    fn test_unknown_object_key() {
        let recorder = Recorder::default();
        let handler = handler(&recorder);

        let outcome = handler.handle_request("upper", target("Nope"), Bytes::new(), HashMap::new());

        let Outcome::Failed(ex) = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(ex.kind, ExceptionKind::ObjectNotExist);
        assert_eq!(recorder.joined(), "rs1,se1");
    }

    #[test]
    fn test_handle_async() {
        let recorder = Recorder::default();
        let handler = handler(&recorder);
        let (tx, rx) = mpsc::channel();

        let ctx = RequestContext::new("upper", target("Upper"), Bytes::from_static(b"abc"));
        handler
            .handle_async(ctx, move |outcome, ctx| {
                tx.send((outcome, ctx.operation().to_string())).ok();
            })
            .unwrap();

        let (outcome, operation) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, Outcome::Completed(Bytes::from_static(b"ABC")));
        assert_eq!(operation, "upper");
    }

    #[test]
    fn test_unregister() {
        let registry = ServantRegistry::new();
        registry.register("Upper", Arc::new(Upper));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister("Upper").is_some());
        assert!(registry.is_empty());
    }
}
