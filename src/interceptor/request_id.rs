use std::sync::Arc;

use bytes::Bytes;
use log::debug;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::core::{
    context::RequestContext,
    error::{OrbError, OrbResult},
    traits::{InterceptResult, Interceptor},
};

pub const INTERCEPTOR_NAME: &str = "request-id";

/// Request slot holding the id of the current request.
pub const REQUEST_ID_KEY: &str = "request-id";

const DEFAULT_CONTEXT_ID: u32 = 0x5249_4430;
const ALGORITHM_UUID: &str = "uuid";
const ALGORITHM_RANGE_ID: &str = "range_id";
const DEFAULT_CHAR_SET: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

pub fn create_request_id_interceptor(cfg: JsonValue) -> OrbResult<Arc<dyn Interceptor>> {
    let config = InterceptorConfig::try_from(cfg)?;
    Ok(Arc::new(RequestIdInterceptor { config }))
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct InterceptorConfig {
    /// Service context carrying the id between client and server
    #[serde(default = "InterceptorConfig::default_context_id")]
    context_id: u32,
    /// Echo the id back as a reply service context
    #[serde(default = "InterceptorConfig::default_include_in_reply")]
    include_in_reply: bool,
    #[serde(default = "InterceptorConfig::default_algorithm")]
    #[validate(custom(function = "InterceptorConfig::validate_algorithm"))]
    algorithm: String,
    #[serde(default)]
    #[validate(nested)]
    range_id: RangeId,
}

impl InterceptorConfig {
    fn default_context_id() -> u32 {
        DEFAULT_CONTEXT_ID
    }

    fn default_include_in_reply() -> bool {
        true
    }

    fn default_algorithm() -> String {
        ALGORITHM_UUID.to_string()
    }

    fn validate_algorithm(algorithm: &str) -> Result<(), ValidationError> {
        if algorithm == ALGORITHM_UUID || algorithm == ALGORITHM_RANGE_ID {
            Ok(())
        } else {
            Err(ValidationError::new("algorithm must be either 'uuid' or 'range_id'"))
        }
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
struct RangeId {
    #[serde(default = "RangeId::default_char_set")]
    #[validate(length(min = 1))]
    char_set: String,
    #[serde(default = "RangeId::default_length")]
    #[validate(range(min = 1, max = 256))]
    length: u32,
}

impl RangeId {
    fn default_char_set() -> String {
        DEFAULT_CHAR_SET.to_string()
    }

    fn default_length() -> u32 {
        16
    }
}

impl Default for RangeId {
    fn default() -> Self {
        Self {
            char_set: Self::default_char_set(),
            length: Self::default_length(),
        }
    }
}

/// Propagates a request id from client to server as a service context.
pub struct RequestIdInterceptor {
    config: InterceptorConfig,
}

impl RequestIdInterceptor {
    fn generate(&self) -> String {
        match self.config.algorithm.as_str() {
            ALGORITHM_RANGE_ID => self.range_id(),
            _ => Uuid::new_v4().to_string(),
        }
    }

    fn range_id(&self) -> String {
        let chars: Vec<char> = self.config.range_id.char_set.chars().collect();
        let mut rng = rand::thread_rng();
        (0..self.config.range_id.length)
            .filter_map(|_| chars.choose(&mut rng).copied())
            .collect()
    }

    fn reply_with_id(&self, ctx: &mut RequestContext) {
        if !self.config.include_in_reply {
            return;
        }
        if let Some(id) = ctx.get_str(REQUEST_ID_KEY).map(str::to_string) {
            ctx.add_reply_service_context(self.config.context_id, Bytes::from(id));
        }
    }
}

impl Interceptor for RequestIdInterceptor {
    fn name(&self) -> &str {
        INTERCEPTOR_NAME
    }

    fn send_request(&self, ctx: &mut RequestContext) -> InterceptResult {
        // Keep the id across forwards and failover attempts of the same request
        let id = match ctx.get_str(REQUEST_ID_KEY) {
            Some(id) => id.to_string(),
            None => {
                let id = self.generate();
                ctx.set(REQUEST_ID_KEY, id.clone());
                id
            }
        };

        ctx.add_request_service_context(self.config.context_id, Bytes::from(id));
        Ok(())
    }

    fn receive_request_service_contexts(&self, ctx: &mut RequestContext) -> InterceptResult {
        let id = ctx
            .request_service_context(self.config.context_id)
            .and_then(|data| std::str::from_utf8(data).ok())
            .map(str::to_string);

        let id = match id {
            Some(id) => id,
            None => {
                let id = self.generate();
                debug!(
                    "No request id received for {}, generated {id}",
                    ctx.operation()
                );
                id
            }
        };

        ctx.set(REQUEST_ID_KEY, id);
        Ok(())
    }

    fn send_reply(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.reply_with_id(ctx);
        Ok(())
    }

    fn send_exception(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.reply_with_id(ctx);
        Ok(())
    }
}
