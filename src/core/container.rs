//! ORB container
//!
//! Owns every runtime component and wires them together: interceptor chains,
//! the endpoint selector, the worker pool, the client dispatcher and the server
//! request handler. Registration happens on the builder; `build` closes the
//! registration window.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::info;

use super::{
    error::OrbResult,
    traits::{EndpointResolver, Interceptor, ServantLocator, Transport},
};
use crate::{
    config::{Config, InterceptorEntry},
    config_error,
    interceptor::{build_interceptor, InterceptorChain, InterceptorPipeline, Side},
    orchestration::{RequestDispatcher, ServantRegistry, ServerRequestHandler},
    pool::WorkerPool,
    selector::{EndpointSelector, StaticResolver},
};

/// Collects interceptors and collaborators before the ORB starts.
pub struct OrbBuilder {
    config: Config,
    client_chain: Arc<InterceptorChain>,
    server_chain: Arc<InterceptorChain>,
    resolver: Option<Arc<dyn EndpointResolver>>,
    transport: Option<Arc<dyn Transport>>,
    locator: Option<Arc<dyn ServantLocator>>,
}

impl OrbBuilder {
    fn new(config: Config) -> OrbResult<Self> {
        let builder = Self {
            client_chain: Arc::new(InterceptorChain::new(Side::Client.as_str())),
            server_chain: Arc::new(InterceptorChain::new(Side::Server.as_str())),
            resolver: None,
            transport: None,
            locator: None,
            config,
        };

        Self::register_configured(&builder.client_chain, &builder.config.interceptors.client)?;
        Self::register_configured(&builder.server_chain, &builder.config.interceptors.server)?;
        Ok(builder)
    }

    fn register_configured(
        chain: &InterceptorChain,
        entries: &[InterceptorEntry],
    ) -> OrbResult<()> {
        for entry in entries {
            chain.add(build_interceptor(&entry.name, entry.config.clone())?)?;
        }
        Ok(())
    }

    /// Append a client interceptor after those declared in the configuration.
    pub fn client_interceptor(self, interceptor: Arc<dyn Interceptor>) -> OrbResult<Self> {
        self.client_chain.add(interceptor)?;
        Ok(self)
    }

    /// Append a server interceptor after those declared in the configuration.
    pub fn server_interceptor(self, interceptor: Arc<dyn Interceptor>) -> OrbResult<Self> {
        self.server_chain.add(interceptor)?;
        Ok(self)
    }

    /// Replace the static resolver built from the `targets` section.
    pub fn resolver(mut self, resolver: Arc<dyn EndpointResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Replace the default object-key servant registry.
    pub fn servant_locator(mut self, locator: Arc<dyn ServantLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn build(self) -> OrbResult<Orb> {
        let transport = self
            .transport
            .ok_or_else(|| config_error!("no transport configured"))?;

        let static_resolver = Arc::new(StaticResolver::new());
        static_resolver.reload(
            self.config
                .targets
                .iter()
                .map(|target| (target.identity(), target.to_endpoints()))
                .collect(),
        );
        let resolver = self
            .resolver
            .unwrap_or_else(|| static_resolver.clone() as Arc<dyn EndpointResolver>);

        let servants = Arc::new(ServantRegistry::new());
        let locator = self
            .locator
            .unwrap_or_else(|| servants.clone() as Arc<dyn ServantLocator>);

        self.client_chain.seal();
        self.server_chain.seal();

        let pool = Arc::new(WorkerPool::new(&self.config.pool)?);
        let selector = Arc::new(EndpointSelector::new());

        let client = RequestDispatcher::new(
            Arc::new(InterceptorPipeline::new(self.client_chain.clone(), Side::Client)),
            selector.clone(),
            resolver,
            transport,
            pool.clone(),
            self.config.dispatch.max_forwards,
        );

        let server = ServerRequestHandler::new(
            Arc::new(InterceptorPipeline::new(self.server_chain.clone(), Side::Server)),
            locator,
            pool.clone(),
        );

        info!(
            "ORB initialized with {} client and {} server interceptors",
            self.client_chain.len(),
            self.server_chain.len()
        );

        Ok(Orb {
            config: self.config,
            client_chain: self.client_chain,
            server_chain: self.server_chain,
            static_resolver,
            servants,
            selector,
            pool,
            client,
            server,
            shut_down: AtomicBool::new(false),
        })
    }
}

/// Running ORB instance.
pub struct Orb {
    config: Config,
    client_chain: Arc<InterceptorChain>,
    server_chain: Arc<InterceptorChain>,
    static_resolver: Arc<StaticResolver>,
    servants: Arc<ServantRegistry>,
    selector: Arc<EndpointSelector>,
    pool: Arc<WorkerPool>,
    client: RequestDispatcher,
    server: ServerRequestHandler,
    shut_down: AtomicBool,
}

impl Orb {
    pub fn builder(config: Config) -> OrbResult<OrbBuilder> {
        OrbBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn client(&self) -> &RequestDispatcher {
        &self.client
    }

    pub fn server(&self) -> &ServerRequestHandler {
        &self.server
    }

    /// Resolver filled from the `targets` section.
    pub fn static_resolver(&self) -> &Arc<StaticResolver> {
        &self.static_resolver
    }

    /// Default servant locator.
    pub fn servants(&self) -> &Arc<ServantRegistry> {
        &self.servants
    }

    pub fn selector(&self) -> &Arc<EndpointSelector> {
        &self.selector
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn client_chain(&self) -> &Arc<InterceptorChain> {
        &self.client_chain
    }

    pub fn server_chain(&self) -> &Arc<InterceptorChain> {
        &self.server_chain
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Destroy every interceptor in registration order, client chain first,
    /// then close the worker pool. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Shutting down ORB");
        for chain in [&self.client_chain, &self.server_chain] {
            for interceptor in chain.snapshot().iter() {
                interceptor.destroy();
            }
        }
        self.pool.close();
        info!("ORB shut down");
    }
}

impl Drop for Orb {
    fn drop(&mut self) {
        self.shutdown();
    }
}
