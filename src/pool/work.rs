use crate::core::error::OrbResult;

/// Unit of work run by a [`WorkerPool`](super::WorkerPool).
///
/// A work item runs exactly once, on one worker thread.
pub trait Work: Send {
    /// Name used in logs when the work fails
    fn name(&self) -> &str {
        "work"
    }

    fn do_work(self: Box<Self>) -> OrbResult<()>;
}

/// Closure adapter for [`Work`].
pub struct NamedWork<F> {
    name: String,
    f: F,
}

impl<F> NamedWork<F>
where
    F: FnOnce() -> OrbResult<()> + Send,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> Work for NamedWork<F>
where
    F: FnOnce() -> OrbResult<()> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn do_work(self: Box<Self>) -> OrbResult<()> {
        (self.f)()
    }
}
