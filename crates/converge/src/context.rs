//! Execution context and progress callbacks
//!
//! Every host-facing call receives a [`Context`] so a run can be cancelled
//! from another thread (e.g. a Ctrl-C handler).

use crate::error::{Error, Result};
use crate::plan::Action;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of everything holding a clone of this token
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Context passed to every host operation
#[derive(Debug, Clone)]
pub struct Context {
    cancel: CancelToken,
    /// Maximum number of steps loaded concurrently
    pub jobs: usize,
}

impl Context {
    pub fn new() -> Self {
        Self {
            cancel: CancelToken::new(),
            jobs: 4,
        }
    }

    /// Create a context bound to an existing cancellation token
    pub fn with_cancel(cancel: CancelToken) -> Self {
        Self {
            cancel,
            ..Self::new()
        }
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Fail with [`Error::Cancelled`] once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress callback for plan application
///
/// Implement this trait to render progress while a plan is applied.
pub trait ProgressCallback {
    /// Called before a step with pending changes is applied
    fn on_step_start(&mut self, index: usize, total: usize, action: &Action);

    /// Called once a step was applied and verified
    fn on_step_complete(&mut self, index: usize, action: &Action);

    /// Called when a failed apply starts rolling back
    fn on_rollback_start(&mut self, error: &Error);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_step_start(&mut self, _index: usize, _total: usize, _action: &Action) {}
    fn on_step_complete(&mut self, _index: usize, _action: &Action) {}
    fn on_rollback_start(&mut self, _error: &Error) {}
}
