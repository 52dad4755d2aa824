use std::sync::Arc;

use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::{
    context::RequestContext,
    error::{OrbError, OrbResult},
    traits::{InterceptResult, Interceptor},
};

use super::request_id::REQUEST_ID_KEY;

pub const INTERCEPTOR_NAME: &str = "access-log";

pub fn create_access_log_interceptor(cfg: JsonValue) -> OrbResult<Arc<dyn Interceptor>> {
    let config: InterceptorConfig = serde_json::from_value(cfg)?;
    let log_format = LogFormat::parse(&config.log_format)?;

    Ok(Arc::new(AccessLogInterceptor { log_format }))
}

#[derive(Debug, Serialize, Deserialize)]
struct InterceptorConfig {
    #[serde(default = "InterceptorConfig::default_log_format")]
    log_format: String,
}

impl InterceptorConfig {
    fn default_log_format() -> String {
        "$request_id $operation $target@$endpoint $outcome ${request_time}ms".to_string()
    }
}

/// Writes one line per request when its end point runs.
pub struct AccessLogInterceptor {
    log_format: LogFormat,
}

impl AccessLogInterceptor {
    fn log(&self, side: &str, ctx: &RequestContext) -> InterceptResult {
        info!("{}", self.log_format.render(side, ctx));
        Ok(())
    }
}

impl Interceptor for AccessLogInterceptor {
    fn name(&self) -> &str {
        INTERCEPTOR_NAME
    }

    fn receive_reply(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.log("client", ctx)
    }

    fn receive_exception(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.log("client", ctx)
    }

    fn receive_other(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.log("client", ctx)
    }

    fn send_reply(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.log("server", ctx)
    }

    fn send_exception(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.log("server", ctx)
    }

    fn send_other(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.log("server", ctx)
    }
}

#[derive(Debug, PartialEq)]
enum Segment {
    Static(String),
    Variable(String),
}

#[derive(Debug)]
struct LogFormat {
    segments: Vec<Segment>,
}

impl LogFormat {
    fn parse(format: &str) -> OrbResult<Self> {
        let re = Regex::new(r"\$\{([a-zA-Z0-9_]+)\}|\$([a-zA-Z0-9_]+)")
            .map_err(|e| OrbError::Configuration(format!("Failed to parse log format: {e}")))?;
        let mut segments = Vec::new();
        let mut last_pos = 0;

        for caps in re.captures_iter(format) {
            let Some(mat) = caps.get(0) else {
                continue;
            };
            if last_pos < mat.start() {
                segments.push(Segment::Static(format[last_pos..mat.start()].to_string()));
            }
            let name = caps.get(1).or_else(|| caps.get(2));
            segments.push(Segment::Variable(name.map_or("", |m| m.as_str()).to_string()));
            last_pos = mat.end();
        }

        if last_pos < format.len() {
            segments.push(Segment::Static(format[last_pos..].to_string()));
        }

        Ok(LogFormat { segments })
    }

    fn render(&self, side: &str, ctx: &RequestContext) -> String {
        let mut output = String::with_capacity(128);

        for segment in &self.segments {
            match segment {
                Segment::Static(text) => output.push_str(text),
                Segment::Variable(var) => {
                    let value = match var.as_str() {
                        "side" => side.to_string(),
                        "request_id" => ctx.get_str(REQUEST_ID_KEY).unwrap_or("").to_owned(),
                        "operation" => ctx.operation().to_string(),
                        "target" => ctx.target().identity().to_string(),
                        "effective_target" => {
                            ctx.effective_target().identity().to_string()
                        }
                        "endpoint" => ctx
                            .selected
                            .as_ref()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        "outcome" => ctx
                            .reply_status()
                            .map_or("", |status| status.label())
                            .to_string(),
                        "exception" => ctx
                            .received_exception()
                            .map(ToString::to_string)
                            .unwrap_or_default(),
                        "attempts" => ctx.attempts.to_string(),
                        "forwards" => ctx.forwards.to_string(),
                        "request_time" => ctx.elapsed().as_millis().to_string(),
                        "request_bytes" => ctx.request_body().len().to_string(),
                        "reply_bytes" => {
                            ctx.reply().map_or(0, |b| b.len()).to_string()
                        }
                        _ => String::new(),
                    };
                    output.push_str(&value);
                }
            }
        }

        output
    }
}
