//! Unified error handling for orbsix
//!
//! This module provides the crate-wide error type plus the `SystemException`
//! value that travels through interceptor points and transports.

use std::fmt;

/// How far a request got before an exception was raised.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CompletionStatus {
    Yes,
    #[default]
    No,
    Maybe,
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            CompletionStatus::Yes => "COMPLETED_YES",
            CompletionStatus::No => "COMPLETED_NO",
            CompletionStatus::Maybe => "COMPLETED_MAYBE",
        };
        write!(f, "{status}")
    }
}

/// Standard system exception kinds.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    Transient,
    CommFailure,
    BadParam,
    Internal,
    NoPermission,
    ObjectNotExist,
    Unknown,
    /// Application defined exception, identified by its repository id
    User(String),
}

impl ExceptionKind {
    /// Transport-level failures that allow failing over to another endpoint.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, ExceptionKind::Transient | ExceptionKind::CommFailure)
    }
}

impl fmt::Display for ExceptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExceptionKind::Transient => write!(f, "TRANSIENT"),
            ExceptionKind::CommFailure => write!(f, "COMM_FAILURE"),
            ExceptionKind::BadParam => write!(f, "BAD_PARAM"),
            ExceptionKind::Internal => write!(f, "INTERNAL"),
            ExceptionKind::NoPermission => write!(f, "NO_PERMISSION"),
            ExceptionKind::ObjectNotExist => write!(f, "OBJECT_NOT_EXIST"),
            ExceptionKind::Unknown => write!(f, "UNKNOWN"),
            ExceptionKind::User(id) => write!(f, "{id}"),
        }
    }
}

/// Exception raised by a transport, a servant or an interceptor point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SystemException {
    pub kind: ExceptionKind,
    pub minor: u32,
    pub completed: CompletionStatus,
    pub message: String,
}

impl SystemException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            minor: 0,
            completed: CompletionStatus::No,
            message: message.into(),
        }
    }

    pub fn with_minor(mut self, minor: u32) -> Self {
        self.minor = minor;
        self
    }

    pub fn with_completed(mut self, completed: CompletionStatus) -> Self {
        self.completed = completed;
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Transient, message)
    }

    pub fn comm_failure(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::CommFailure, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::Internal, message)
    }

    pub fn bad_param(message: impl Into<String>) -> Self {
        Self::new(ExceptionKind::BadParam, message)
    }
}

impl fmt::Display for SystemException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (minor {}, {}): {}",
            self.kind, self.minor, self.completed, self.message
        )
    }
}

impl std::error::Error for SystemException {}

/// Unified error types for the ORB runtime
#[derive(Debug)]
pub enum OrbError {
    /// Configuration-related errors
    Configuration(String),

    /// Validation errors
    Validation(String),

    /// Network and I/O errors
    Io(std::io::Error),

    /// The retried endpoint is missing from the freshly resolved candidate list
    StaleCandidateList(String),

    /// Resolution produced no endpoint to contact
    NoCandidates(String),

    /// Interceptor registered twice under the same name
    DuplicateName(String),

    /// Interceptor registration attempted after initialization
    ChainSealed(String),

    /// Unknown built-in interceptor type
    UnknownInterceptor(String),

    /// Request failed with a system exception raised by an interceptor,
    /// the servant or the transport
    InterceptorFatal(SystemException),

    /// Forward hop bound exceeded
    TooManyForwards(usize),

    /// A work item failed inside the worker pool
    WorkExecution(String),

    /// Work submitted to a pool that is shutting down
    PoolClosed(String),

    /// Internal system errors
    Internal(String),
}

impl fmt::Display for OrbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrbError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            OrbError::Validation(msg) => write!(f, "Validation error: {msg}"),
            OrbError::Io(err) => write!(f, "I/O error: {err}"),
            OrbError::StaleCandidateList(msg) => write!(f, "Stale candidate list: {msg}"),
            OrbError::NoCandidates(msg) => write!(f, "No candidate endpoints: {msg}"),
            OrbError::DuplicateName(name) => write!(f, "Duplicate interceptor name: {name}"),
            OrbError::ChainSealed(name) => {
                write!(f, "Interceptor chain is sealed, cannot register: {name}")
            }
            OrbError::UnknownInterceptor(name) => write!(f, "Unknown interceptor type: {name}"),
            OrbError::InterceptorFatal(ex) => write!(f, "Request failed: {ex}"),
            OrbError::TooManyForwards(hops) => {
                write!(f, "Request forwarded more than {hops} times")
            }
            OrbError::WorkExecution(msg) => write!(f, "Work execution failed: {msg}"),
            OrbError::PoolClosed(name) => write!(f, "Worker pool '{name}' is closed"),
            OrbError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for OrbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OrbError::Io(err) => Some(err),
            OrbError::InterceptorFatal(ex) => Some(ex),
            _ => None,
        }
    }
}

impl OrbError {
    /// Fatal errors are never retried against another endpoint.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            OrbError::StaleCandidateList(_) | OrbError::Internal(_) | OrbError::NoCandidates(_)
        )
    }
}

// Error conversions
impl From<std::io::Error> for OrbError {
    fn from(err: std::io::Error) -> Self {
        OrbError::Io(err)
    }
}

impl From<SystemException> for OrbError {
    fn from(ex: SystemException) -> Self {
        OrbError::InterceptorFatal(ex)
    }
}

impl From<serde_yaml::Error> for OrbError {
    fn from(err: serde_yaml::Error) -> Self {
        OrbError::Configuration(err.to_string())
    }
}

impl From<serde_json::Error> for OrbError {
    fn from(err: serde_json::Error) -> Self {
        OrbError::Configuration(err.to_string())
    }
}

impl From<validator::ValidationErrors> for OrbError {
    fn from(err: validator::ValidationErrors) -> Self {
        OrbError::Validation(err.to_string())
    }
}

/// Result type alias for ORB operations
pub type OrbResult<T> = std::result::Result<T, OrbError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> OrbResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> OrbResult<T> {
        self.map_err(|e| OrbError::Internal(format!("{context}: {e}")))
    }
}

/// Convenience macros for error creation
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::OrbError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::OrbError::Configuration(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::OrbError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::OrbError::Internal(format!($fmt, $($arg)*))
    };
}
