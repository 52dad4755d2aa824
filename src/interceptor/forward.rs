use std::{collections::HashMap, sync::Arc};

use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use validator::{Validate, ValidationError};

use crate::config::validate_host;
use crate::core::{
    context::RequestContext,
    error::{OrbError, OrbResult},
    traits::{InterceptResult, InterceptSignal, Interceptor},
};
use crate::selector::{ObjectRef, TargetIdentity};

pub const INTERCEPTOR_NAME: &str = "forward";

pub fn create_forward_interceptor(cfg: JsonValue) -> OrbResult<Arc<dyn Interceptor>> {
    let config = InterceptorConfig::try_from(cfg)?;

    let routes = config
        .routes
        .iter()
        .map(|(operation, route)| (operation.clone(), route.object_ref()))
        .collect();

    Ok(Arc::new(ForwardInterceptor { routes }))
}

#[derive(Default, Debug, Serialize, Deserialize, Validate)]
struct InterceptorConfig {
    /// Operation name to forward target
    #[validate(custom(function = "InterceptorConfig::validate_routes"))]
    routes: HashMap<String, ForwardRoute>,
}

impl InterceptorConfig {
    fn validate_routes(routes: &HashMap<String, ForwardRoute>) -> Result<(), ValidationError> {
        if routes.is_empty() {
            return Err(ValidationError::new("routes must not be empty"));
        }
        for route in routes.values() {
            route
                .validate()
                .map_err(|_| ValidationError::new("invalid_route"))?;
        }
        Ok(())
    }
}

impl TryFrom<JsonValue> for InterceptorConfig {
    type Error = OrbError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        let config: InterceptorConfig = serde_json::from_value(value)?;
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct ForwardRoute {
    #[validate(length(min = 1))]
    target: String,
    #[serde(default)]
    object_key: String,
    #[serde(default = "ForwardRoute::default_kind")]
    kind: String,
    #[validate(custom(function = "validate_host"))]
    host: String,
    port: u16,
}

impl ForwardRoute {
    fn default_kind() -> String {
        "clear".to_string()
    }

    fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(
            TargetIdentity::new(self.target.as_str()),
            self.object_key.as_str(),
            self.kind.as_str(),
            self.host.as_str(),
            self.port,
        )
    }
}

/// Redirects selected operations to a fixed target.
///
/// Requests already addressed to the route's target pass through, so a
/// forwarded request is not forwarded again.
pub struct ForwardInterceptor {
    routes: HashMap<String, ObjectRef>,
}

impl ForwardInterceptor {
    fn route(&self, ctx: &RequestContext) -> InterceptResult {
        match self.routes.get(ctx.operation()) {
            Some(target) if target.identity() != ctx.effective_target().identity() => {
                debug!(
                    "Forwarding {} of request {} to {target}",
                    ctx.operation(),
                    ctx.request_id()
                );
                Err(InterceptSignal::Forward(target.clone()))
            }
            _ => Ok(()),
        }
    }
}

impl Interceptor for ForwardInterceptor {
    fn name(&self) -> &str {
        INTERCEPTOR_NAME
    }

    fn send_request(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.route(ctx)
    }

    fn receive_request(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.route(ctx)
    }
}
