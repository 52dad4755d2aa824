//! Interceptor that records every point it is called at, for ordering tests.
//!
//! Each point is written as a two letter code followed by the interceptor name:
//! `sr` send_request, `rr` receive_reply, `re` receive_exception,
//! `ro` receive_other, `rs` receive_request_service_contexts,
//! `rq` receive_request, `sp` send_reply, `se` send_exception, `so` send_other.

use std::{collections::HashMap, sync::Arc};

use parking_lot::Mutex;

use crate::core::{
    context::RequestContext,
    error::{ExceptionKind, SystemException},
    traits::{InterceptResult, InterceptSignal, Interceptor},
};
use crate::selector::ObjectRef;

/// Shared, ordered trace of interceptor points.
#[derive(Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn push(&self, event: String) {
        self.events.lock().push(event);
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    pub fn joined(&self) -> String {
        self.events().join(",")
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[derive(Clone)]
pub enum Behavior {
    Fatal(ExceptionKind),
    Forward(ObjectRef),
}

pub struct RecordingInterceptor {
    name: String,
    recorder: Recorder,
    behaviors: HashMap<&'static str, Behavior>,
}

impl RecordingInterceptor {
    pub fn new(name: impl Into<String>, recorder: Recorder) -> Self {
        Self {
            name: name.into(),
            recorder,
            behaviors: HashMap::new(),
        }
    }

    /// Make the point with trace code `point` raise `behavior`.
    pub fn on(mut self, point: &'static str, behavior: Behavior) -> Self {
        self.behaviors.insert(point, behavior);
        self
    }

    fn record(&self, point: &'static str) -> InterceptResult {
        self.recorder.push(format!("{point}{}", self.name));
        match self.behaviors.get(point) {
            None => Ok(()),
            Some(Behavior::Fatal(kind)) => Err(InterceptSignal::Fatal(SystemException::new(
                kind.clone(),
                format!("raised by {} at {point}", self.name),
            ))),
            Some(Behavior::Forward(target)) => Err(InterceptSignal::Forward(target.clone())),
        }
    }
}

impl Interceptor for RecordingInterceptor {
    fn name(&self) -> &str {
        &self.name
    }

    fn send_request(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("sr")
    }

    fn receive_reply(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("rr")
    }

    fn receive_exception(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("re")
    }

    fn receive_other(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("ro")
    }

    fn receive_request_service_contexts(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("rs")
    }

    fn receive_request(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("rq")
    }

    fn send_reply(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("sp")
    }

    fn send_exception(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("se")
    }

    fn send_other(&self, _ctx: &mut RequestContext) -> InterceptResult {
        self.record("so")
    }

    fn destroy(&self) {
        self.recorder.push(format!("destroy{}", self.name));
    }
}
