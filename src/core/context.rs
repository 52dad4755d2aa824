//! Request context management
//!
//! This module provides the RequestContext that holds per-request state and is
//! threaded through every interceptor point of a single request.

use std::{
    any::Any,
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use uuid::Uuid;

use super::{error::SystemException, traits::Interceptor};
use crate::selector::{Endpoint, ObjectRef};

/// What the transport or servant produced for a request.
#[derive(Clone, Debug, PartialEq)]
pub enum ReplyStatus {
    Reply(Bytes),
    Exception(SystemException),
    LocationForward(ObjectRef),
}

impl ReplyStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ReplyStatus::Reply(_) => "reply",
            ReplyStatus::Exception(_) => "exception",
            ReplyStatus::LocationForward(_) => "forward",
        }
    }
}

/// Context that holds per-request state and metadata
pub struct RequestContext {
    request_id: String,
    operation: String,
    request_body: Bytes,

    /// Target the caller asked for
    target: ObjectRef,

    /// Target after following forwards
    effective_target: ObjectRef,

    /// Interceptors this request runs through
    pub(crate) interceptors: Arc<[Arc<dyn Interceptor>]>,

    /// Number of interceptors whose start point completed and that are owed
    /// an end point
    pub(crate) flow_depth: usize,

    reply_status: Option<ReplyStatus>,

    /// Endpoint chosen for the current attempt
    pub selected: Option<Endpoint>,

    /// Number of transport attempts so far
    pub attempts: usize,

    /// Number of forwards followed so far
    pub forwards: usize,

    request_service_contexts: HashMap<u32, Bytes>,
    reply_service_contexts: HashMap<u32, Bytes>,

    request_start: Instant,

    /// Request-scoped slots available to interceptors (type-erased, thread-safe)
    vars: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl RequestContext {
    /// Create a context for a new request against `target`
    pub fn new(operation: impl Into<String>, target: ObjectRef, body: Bytes) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            request_body: body,
            effective_target: target.clone(),
            target,
            interceptors: Arc::from(Vec::new()),
            flow_depth: 0,
            reply_status: None,
            selected: None,
            attempts: 0,
            forwards: 0,
            request_service_contexts: HashMap::new(),
            reply_service_contexts: HashMap::new(),
            request_start: Instant::now(),
            vars: HashMap::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn request_body(&self) -> &Bytes {
        &self.request_body
    }

    pub fn target(&self) -> &ObjectRef {
        &self.target
    }

    pub fn effective_target(&self) -> &ObjectRef {
        &self.effective_target
    }

    /// Retarget the request after a forward.
    pub fn set_effective_target(&mut self, target: ObjectRef) {
        self.effective_target = target;
        self.selected = None;
    }

    pub fn flow_depth(&self) -> usize {
        self.flow_depth
    }

    pub fn reply_status(&self) -> Option<&ReplyStatus> {
        self.reply_status.as_ref()
    }

    pub(crate) fn set_reply_status(&mut self, status: ReplyStatus) {
        self.reply_status = Some(status);
    }

    pub(crate) fn take_reply_status(&mut self) -> Option<ReplyStatus> {
        self.reply_status.take()
    }

    /// Reply body, available to `receive_reply` and `send_reply`.
    pub fn reply(&self) -> Option<&Bytes> {
        match &self.reply_status {
            Some(ReplyStatus::Reply(body)) => Some(body),
            _ => None,
        }
    }

    /// Exception being delivered to `receive_exception` / `send_exception`.
    pub fn received_exception(&self) -> Option<&SystemException> {
        match &self.reply_status {
            Some(ReplyStatus::Exception(ex)) => Some(ex),
            _ => None,
        }
    }

    /// Forward target being delivered to `receive_other` / `send_other`.
    pub fn forward_reference(&self) -> Option<&ObjectRef> {
        match &self.reply_status {
            Some(ReplyStatus::LocationForward(target)) => Some(target),
            _ => None,
        }
    }

    pub fn add_request_service_context(&mut self, id: u32, data: Bytes) {
        self.request_service_contexts.insert(id, data);
    }

    pub fn request_service_context(&self, id: u32) -> Option<&Bytes> {
        self.request_service_contexts.get(&id)
    }

    pub fn request_service_contexts(&self) -> &HashMap<u32, Bytes> {
        &self.request_service_contexts
    }

    pub fn add_reply_service_context(&mut self, id: u32, data: Bytes) {
        self.reply_service_contexts.insert(id, data);
    }

    pub fn reply_service_context(&self, id: u32) -> Option<&Bytes> {
        self.reply_service_contexts.get(&id)
    }

    pub fn elapsed(&self) -> Duration {
        self.request_start.elapsed()
    }

    /// Store a typed value into the context
    pub fn set<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.vars.insert(key.into(), Box::new(value));
    }

    /// Get a typed reference from the context
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.vars.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    /// Get a string slice if the stored value is a `String`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get::<String>(key).map(|s| s.as_str())
    }

    /// Check if a key exists in the context
    pub fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    /// Remove a value from the context
    pub fn remove(&mut self, key: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.vars.remove(key)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("operation", &self.operation)
            .field("target", &self.target)
            .field("effective_target", &self.effective_target)
            .field("flow_depth", &self.flow_depth)
            .field("reply_status", &self.reply_status)
            .field("selected", &self.selected)
            .field("attempts", &self.attempts)
            .field("forwards", &self.forwards)
            .finish()
    }
}
