//! Shutdown hooks and the report produced by running them.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::LifecycleError;

/// Bound applied to a hook registered without an explicit timeout.
pub const DEFAULT_HOOK_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) type HookFuture = BoxFuture<'static, Result<(), String>>;
pub(crate) type HookFn = Box<dyn FnOnce() -> HookFuture + Send>;

pub(crate) struct RegisteredHook {
    pub(crate) tag: String,
    pub(crate) timeout: Duration,
    pub(crate) run: HookFn,
}

/// Options for a registered hook; use builder methods with any duration type that implements `TryInto<Duration>`.
#[derive(Clone, Debug)]
pub struct HookOptions {
    pub timeout: Duration,
}

impl HookOptions {
    /// Hook bounded by [`DEFAULT_HOOK_TIMEOUT`].
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_HOOK_TIMEOUT,
        }
    }

    /// Max time this hook gets once it starts; the coordinator abandons it afterwards and moves on.
    pub fn with_timeout<D>(mut self, d: D) -> Self
    where
        D: TryInto<Duration>,
    {
        if let Ok(timeout) = d.try_into() {
            self.timeout = timeout;
        }
        self
    }
}

impl Default for HookOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one hook during shutdown.
#[derive(Clone, Debug)]
pub struct HookOutcome {
    pub tag: String,
    pub duration: Duration,
    pub result: Result<(), LifecycleError>,
}

/// Result of the one and only run of the hook sequence.
#[derive(Clone, Debug)]
pub struct ShutdownReport {
    /// What started the shutdown: a signal name, `prestop`, or a caller supplied reason.
    pub trigger: String,
    /// One entry per registered hook, in registration order.
    pub outcomes: Vec<HookOutcome>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// True when every hook completed without error.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = &LifecycleError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }
}
