pub mod access_log;
pub mod chain;
pub mod forward;
pub mod pipeline;
pub mod prometheus;
pub mod request_id;

#[cfg(test)]
pub(crate) mod recorder;

use std::{collections::HashMap, sync::Arc};

use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

use crate::core::{
    error::{OrbError, OrbResult},
    traits::{Interceptor, InterceptorCreateFn},
};

pub use chain::{InterceptorChain, InterceptorList};
pub use pipeline::{InterceptorPipeline, Outcome, Side};

/// Global registry mapping built-in interceptor names to their factory
/// functions.
static INTERCEPTOR_BUILDER_REGISTRY: Lazy<HashMap<&'static str, InterceptorCreateFn>> =
    Lazy::new(|| {
        let arr: Vec<(&str, InterceptorCreateFn)> = vec![
            (
                request_id::INTERCEPTOR_NAME,
                request_id::create_request_id_interceptor,
            ),
            (
                access_log::INTERCEPTOR_NAME,
                access_log::create_access_log_interceptor,
            ),
            (
                prometheus::INTERCEPTOR_NAME,
                prometheus::create_prometheus_interceptor,
            ),
            (forward::INTERCEPTOR_NAME, forward::create_forward_interceptor),
        ];
        arr.into_iter().collect()
    });

/// Creates a built-in interceptor from configuration.
///
/// # Errors
/// `UnknownInterceptor` for names missing from the registry, or the factory's
/// configuration error.
pub fn build_interceptor(name: &str, cfg: JsonValue) -> OrbResult<Arc<dyn Interceptor>> {
    let builder = INTERCEPTOR_BUILDER_REGISTRY
        .get(name)
        .ok_or_else(|| OrbError::UnknownInterceptor(name.to_string()))?;
    builder(cfg)
}

/// Names of every built-in interceptor.
pub fn builtin_names() -> Vec<&'static str> {
    let mut names: Vec<_> = INTERCEPTOR_BUILDER_REGISTRY.keys().copied().collect();
    names.sort_unstable();
    names
}
