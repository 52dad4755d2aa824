use std::sync::Arc;

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, HistogramOpts, HistogramVec, IntCounterVec,
};
use serde_json::Value as JsonValue;

use crate::core::{
    context::RequestContext,
    error::OrbResult,
    traits::{InterceptResult, Interceptor},
};

const DEFAULT_BUCKETS: &[f64] = &[
    1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 200.0, 500.0, 1000.0, 2000.0, 5000.0, 10000.0, 30000.0,
    60000.0,
];

// Requests by side and final disposition
static REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "orb_requests_total",
        "Requests completed since orbsix started",
        &[
            "side",    // client or server
            "outcome", // reply, exception or forward
        ]
    )
    .unwrap()
});

// Exceptions by kind
static EXCEPTIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "orb_exceptions_total",
        "System exceptions delivered to end points",
        &["side", "kind"]
    )
    .unwrap()
});

// Histogram for request latency
static LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    let opts = HistogramOpts::new(
        "orb_request_latency",
        "Request latency in milliseconds per operation",
    )
    .buckets(DEFAULT_BUCKETS.to_vec());
    register_histogram_vec!(opts, &["side", "operation"]).unwrap()
});

pub const INTERCEPTOR_NAME: &str = "prometheus";

pub fn create_prometheus_interceptor(_cfg: JsonValue) -> OrbResult<Arc<dyn Interceptor>> {
    Ok(Arc::new(PrometheusInterceptor))
}

pub struct PrometheusInterceptor;

impl PrometheusInterceptor {
    fn observe(&self, side: &str, ctx: &RequestContext) -> InterceptResult {
        let outcome = ctx
            .reply_status()
            .map_or("unknown", |status| status.label());
        REQUESTS.with_label_values(&[side, outcome]).inc();

        if let Some(ex) = ctx.received_exception() {
            EXCEPTIONS
                .with_label_values(&[side, &ex.kind.to_string()])
                .inc();
        }

        LATENCY
            .with_label_values(&[side, ctx.operation()])
            .observe(ctx.elapsed().as_millis() as f64);

        Ok(())
    }
}

impl Interceptor for PrometheusInterceptor {
    fn name(&self) -> &str {
        INTERCEPTOR_NAME
    }

    fn receive_reply(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.observe("client", ctx)
    }

    fn receive_exception(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.observe("client", ctx)
    }

    fn receive_other(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.observe("client", ctx)
    }

    fn send_reply(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.observe("server", ctx)
    }

    fn send_exception(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.observe("server", ctx)
    }

    fn send_other(&self, ctx: &mut RequestContext) -> InterceptResult {
        self.observe("server", ctx)
    }
}
