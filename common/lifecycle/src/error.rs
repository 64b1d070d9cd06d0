//! Lifecycle error types.

use std::time::Duration;

use thiserror::Error;

/// Errors produced while registering or running shutdown hooks.
///
/// Hook failures never abort the sequence; they are collected into the
/// [`ShutdownReport`](crate::ShutdownReport) for the hook that produced them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LifecycleError {
    /// [`on_signal`](crate::ShutdownCoordinator::on_signal) was called after the hooks started.
    #[error("shutdown already in progress, hook '{tag}' was not registered")]
    AlreadyShuttingDown { tag: String },

    /// The hook returned an error.
    #[error("hook '{tag}' failed: {reason}")]
    HookFailed { tag: String, reason: String },

    /// The hook did not finish within its own bound.
    #[error("hook '{tag}' timed out after {timeout:?}")]
    HookTimedOut { tag: String, timeout: Duration },

    /// The hook panicked; the panic is contained to its task.
    #[error("hook '{tag}' panicked")]
    HookPanicked { tag: String },

    /// The global shutdown ceiling was reached before the hook could start.
    #[error("hook '{tag}' skipped, shutdown ceiling of {ceiling:?} reached")]
    HookSkipped { tag: String, ceiling: Duration },
}

impl LifecycleError {
    /// Short label used for metrics and log fields.
    pub fn result_label(&self) -> &'static str {
        match self {
            LifecycleError::AlreadyShuttingDown { .. } => "rejected",
            LifecycleError::HookFailed { .. } => "failed",
            LifecycleError::HookTimedOut { .. } => "timeout",
            LifecycleError::HookPanicked { .. } => "panicked",
            LifecycleError::HookSkipped { .. } => "skipped",
        }
    }
}
