//! Interceptor registration
//!
//! A chain is open for registration during ORB initialization and sealed
//! afterwards. Requests run against an immutable snapshot, so no lock is held
//! while interceptor callbacks execute.

use std::sync::Arc;

use log::{debug, info};
use parking_lot::Mutex;

use crate::core::{
    error::{OrbError, OrbResult},
    traits::Interceptor,
};

pub type InterceptorList = Arc<[Arc<dyn Interceptor>]>;

#[derive(Default)]
struct ChainState {
    interceptors: Vec<Arc<dyn Interceptor>>,
    sealed: Option<InterceptorList>,
}

/// Ordered, append-only list of interceptors.
pub struct InterceptorChain {
    label: &'static str,
    state: Mutex<ChainState>,
}

impl InterceptorChain {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            state: Mutex::new(ChainState::default()),
        }
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Append an interceptor.
    ///
    /// Fails when the chain is sealed or when a non-empty name is already
    /// registered. Anonymous interceptors may be added any number of times.
    pub fn add(&self, interceptor: Arc<dyn Interceptor>) -> OrbResult<()> {
        let mut state = self.state.lock();
        let name = interceptor.name();

        if state.sealed.is_some() {
            return Err(OrbError::ChainSealed(name.to_string()));
        }

        if !name.is_empty() && state.interceptors.iter().any(|i| i.name() == name) {
            return Err(OrbError::DuplicateName(name.to_string()));
        }

        debug!("Registered {} interceptor '{name}'", self.label);
        state.interceptors.push(interceptor);
        Ok(())
    }

    /// Close the registration window. Idempotent.
    pub fn seal(&self) -> InterceptorList {
        let mut state = self.state.lock();
        if let Some(sealed) = &state.sealed {
            return sealed.clone();
        }

        let sealed: InterceptorList = Arc::from(state.interceptors.clone());
        info!(
            "Sealed {} interceptor chain with {} interceptors",
            self.label,
            sealed.len()
        );
        state.sealed = Some(sealed.clone());
        sealed
    }

    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed.is_some()
    }

    /// Interceptors to run a request through.
    pub fn snapshot(&self) -> InterceptorList {
        let state = self.state.lock();
        match &state.sealed {
            Some(sealed) => sealed.clone(),
            None => Arc::from(state.interceptors.clone()),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.state
            .lock()
            .interceptors
            .iter()
            .map(|i| i.name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().interceptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    impl Interceptor for Named {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_add_keeps_registration_order() {
        let chain = InterceptorChain::new("client");
        for name in ["1", "2", "3"] {
            chain.add(Arc::new(Named(name))).unwrap();
        }
        assert_eq!(chain.names(), vec!["1", "2", "3"]);
        let snapshot = chain.snapshot();
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot[2].name(), "3");
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let chain = InterceptorChain::new("client");
        chain.add(Arc::new(Named("1"))).unwrap();
        let err = chain.add(Arc::new(Named("1"))).unwrap_err();
        assert!(matches!(err, OrbError::DuplicateName(name) if name == "1"));
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_anonymous_interceptors_may_repeat() {
        let chain = InterceptorChain::new("server");
        chain.add(Arc::new(Named(""))).unwrap();
        chain.add(Arc::new(Named(""))).unwrap();
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_sealed_chain_rejects_registration() {
        let chain = InterceptorChain::new("client");
        chain.add(Arc::new(Named("1"))).unwrap();
        let sealed = chain.seal();
        assert!(chain.is_sealed());

        let err = chain.add(Arc::new(Named("2"))).unwrap_err();
        assert!(matches!(err, OrbError::ChainSealed(_)));

        assert!(Arc::ptr_eq(&sealed, &chain.seal()));
        assert!(Arc::ptr_eq(&sealed, &chain.snapshot()));
    }
}
