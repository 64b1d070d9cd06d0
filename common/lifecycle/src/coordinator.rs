//! Shutdown coordinator: signal trapping, ordered hook registration, one-shot hook execution.

use std::fmt::Display;
use std::future::Future;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, error, info, warn, Instrument};

use crate::error::LifecycleError;
use crate::hook::{HookFn, HookOptions, HookOutcome, RegisteredHook, ShutdownReport};
use crate::metrics;
use crate::probes::{LivenessHandler, ReadinessHandler};
use crate::signals::TerminationSignals;

/// Options for creating a shutdown coordinator.
#[derive(Clone, Debug)]
pub struct CoordinatorOptions {
    pub name: String,
    /// Global ceiling on the whole hook sequence (caps the sum of hook timeouts).
    pub global_shutdown_timeout: Duration,
    /// Install SIGINT/SIGTERM handlers in [`ShutdownCoordinator::monitor`] (default: true).
    pub trap_signals: bool,
    /// Poll for a pre-stop file and treat it like a signal (default: true).
    pub enable_prestop_check: bool,
    pub prestop_path: PathBuf,
    pub prestop_poll_interval: Duration,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            name: "app".to_string(),
            global_shutdown_timeout: Duration::from_secs(60),
            trap_signals: true,
            enable_prestop_check: true,
            prestop_path: PathBuf::from("/tmp/shutdown"),
            prestop_poll_interval: Duration::from_secs(1),
        }
    }
}

pub struct CoordinatorBuilder {
    options: CoordinatorOptions,
}

impl CoordinatorBuilder {
    pub fn with_global_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.options.global_shutdown_timeout = timeout;
        self
    }

    pub fn with_trap_signals(mut self, trap: bool) -> Self {
        self.options.trap_signals = trap;
        self
    }

    pub fn with_prestop_check(mut self, enabled: bool) -> Self {
        self.options.enable_prestop_check = enabled;
        self
    }

    pub fn with_prestop_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.prestop_path = path.into();
        self
    }

    pub fn with_prestop_poll_interval(mut self, interval: Duration) -> Self {
        self.options.prestop_poll_interval = interval;
        self
    }

    pub fn build(self) -> ShutdownCoordinator {
        ShutdownCoordinator::new(self.options)
    }
}

/// Owns the ordered list of shutdown hooks and guarantees they run at most once.
///
/// Cheap to clone; all clones share the same hooks, latch and shutdown token, so the
/// coordinator can be handed to the HTTP server task, the signal listener and `main`
/// at the same time.
///
/// # One-shot guarantee
///
/// Any number of triggers (signals, pre-stop file, [`trigger`](Self::trigger),
/// concurrent [`shutdown`](Self::shutdown) calls) collapse into a single run of the hook
/// sequence. The run is guarded by a [`OnceCell`]: the first caller executes the hooks,
/// every other caller waits for it and receives a clone of the same [`ShutdownReport`].
/// The hook list itself is taken out of the coordinator when the run starts, so even an
/// abandoned run can never execute a hook twice.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    options: CoordinatorOptions,
    shutdown_token: CancellationToken,
    hooks: Mutex<Vec<RegisteredHook>>,
    started: AtomicBool,
    signals_trapped: AtomicBool,
    trigger: Mutex<Option<String>>,
    report: OnceCell<ShutdownReport>,
}

impl ShutdownCoordinator {
    pub fn new(options: CoordinatorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                shutdown_token: CancellationToken::new(),
                hooks: Mutex::new(Vec::new()),
                started: AtomicBool::new(false),
                signals_trapped: AtomicBool::new(false),
                trigger: Mutex::new(None),
                report: OnceCell::new(),
            }),
        }
    }

    pub fn builder(name: &str) -> CoordinatorBuilder {
        CoordinatorBuilder {
            options: CoordinatorOptions {
                name: name.to_string(),
                ..CoordinatorOptions::default()
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Register a cleanup operation. Hooks run sequentially in registration order, each
    /// bounded by its [`HookOptions::timeout`]. Rejected once the hook sequence has started.
    pub fn on_signal<F, Fut, E>(
        &self,
        tag: &str,
        options: HookOptions,
        hook: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let run: HookFn = Box::new(move || {
            async move { hook().await.map_err(|e| format!("{e:#}")) }.boxed()
        });

        let mut hooks = self
            .inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.started.load(Ordering::SeqCst) {
            warn!(hook = %tag, "Lifecycle: hook registered after shutdown started, ignoring");
            return Err(LifecycleError::AlreadyShuttingDown {
                tag: tag.to_string(),
            });
        }
        hooks.push(RegisteredHook {
            tag: tag.to_string(),
            timeout: options.timeout,
            run,
        });

        debug!(
            hook = %tag,
            position = hooks.len(),
            timeout_secs = options.timeout.as_secs_f64(),
            "Lifecycle: hook registered"
        );
        Ok(())
    }

    pub fn hook_count(&self) -> usize {
        self.inner
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Begin shutdown without waiting for the hooks. Idempotent: only the first reason is kept.
    pub fn trigger(&self, reason: &str) {
        let mut trigger = self
            .inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match trigger.as_deref() {
            None => {
                info!(trigger_reason = %reason, "Lifecycle: shutdown initiated");
                *trigger = Some(reason.to_string());
            }
            Some(first) => {
                warn!(
                    trigger_reason = %reason,
                    first_trigger = %first,
                    "Lifecycle: shutdown already in progress, ignoring trigger"
                );
            }
        }
        drop(trigger);
        self.inner.shutdown_token.cancel();
    }

    /// Trigger shutdown and wait for the hook sequence. Every caller gets the report of the
    /// single run, whether it started that run or not.
    pub async fn shutdown(&self, reason: &str) -> ShutdownReport {
        self.trigger(reason);
        self.finish().await
    }

    /// Install the signal listeners, wait for the first trigger, then run the hooks.
    ///
    /// Signals are subscribed to once per coordinator, however many times `monitor` is
    /// called. Signals arriving while the hooks run are logged and ignored.
    pub async fn monitor(&self) -> ShutdownReport {
        let span = tracing::info_span!("lifecycle", app = %self.name());
        async {
            if self.inner.options.trap_signals && self.spawn_signal_listener() {
                debug!("Lifecycle: listening for SIGINT and SIGTERM");
            }
            let prestop = self
                .inner
                .options
                .enable_prestop_check
                .then(|| self.spawn_prestop_watcher());

            self.inner.shutdown_token.cancelled().await;
            let report = self.finish().await;

            if let Some(handle) = prestop {
                handle.abort();
            }
            report
        }
        .instrument(span)
        .await
    }

    /// Future that resolves when shutdown begins; pass to `axum::serve(..).with_graceful_shutdown(..)`.
    pub fn shutdown_signal(&self) -> impl Future<Output = ()> + Send + 'static {
        let token = self.inner.shutdown_token.clone();
        async move {
            token.cancelled().await;
        }
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.shutdown_token.cancelled()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown_token.is_cancelled()
    }

    /// Report of the hook sequence, once it has finished.
    pub fn report(&self) -> Option<ShutdownReport> {
        self.inner.report.get().cloned()
    }

    pub fn readiness_handler(&self) -> ReadinessHandler {
        ReadinessHandler::new(self.inner.shutdown_token.clone())
    }

    pub fn liveness_handler(&self) -> LivenessHandler {
        LivenessHandler
    }

    async fn finish(&self) -> ShutdownReport {
        self.inner
            .report
            .get_or_init(|| self.run_hooks())
            .await
            .clone()
    }

    fn trigger_reason(&self) -> String {
        self.inner
            .trigger
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }

    async fn run_hooks(&self) -> ShutdownReport {
        let hooks = {
            let mut hooks = self
                .inner
                .hooks
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.started.store(true, Ordering::SeqCst);
            std::mem::take(&mut *hooks)
        };

        let name = self.name();
        let trigger = self.trigger_reason();
        let ceiling = self.inner.options.global_shutdown_timeout;
        metrics::emit_shutdown_initiated(name, &trigger);
        info!(
            trigger_reason = %trigger,
            hooks = hooks.len(),
            ceiling_secs = ceiling.as_secs_f64(),
            "Lifecycle: running shutdown hooks"
        );

        let shutdown_clock = Instant::now();
        // A ceiling too large to represent as an instant never expires.
        let deadline = shutdown_clock.checked_add(ceiling);
        let mut outcomes = Vec::with_capacity(hooks.len());

        for hook in hooks {
            let started = Instant::now();
            let remaining =
                deadline.map_or(Duration::MAX, |d| d.saturating_duration_since(started));
            let result = if remaining.is_zero() {
                Err(LifecycleError::HookSkipped {
                    tag: hook.tag.clone(),
                    ceiling,
                })
            } else {
                run_hook(&hook.tag, hook.timeout.min(remaining), hook.run).await
            };
            let duration = started.elapsed();

            match &result {
                Ok(()) => {
                    metrics::emit_hook_finished(name, &hook.tag, "completed", duration.as_secs_f64());
                    info!(
                        hook = %hook.tag,
                        duration_secs = duration.as_secs_f64(),
                        result = "completed",
                        "Lifecycle: hook completed"
                    );
                }
                Err(e) => {
                    metrics::emit_hook_finished(
                        name,
                        &hook.tag,
                        e.result_label(),
                        duration.as_secs_f64(),
                    );
                    error!(
                        hook = %hook.tag,
                        duration_secs = duration.as_secs_f64(),
                        result = e.result_label(),
                        "Lifecycle: {e}"
                    );
                }
            }

            outcomes.push(HookOutcome {
                tag: hook.tag,
                duration,
                result,
            });
        }

        let report = ShutdownReport {
            trigger,
            outcomes,
            elapsed: shutdown_clock.elapsed(),
        };
        let clean = report.is_clean();
        metrics::emit_shutdown_completed(name, clean);
        if clean {
            info!(
                clean,
                total_duration_secs = report.elapsed.as_secs_f64(),
                "Lifecycle: shutdown complete"
            );
        } else {
            warn!(
                clean,
                total_duration_secs = report.elapsed.as_secs_f64(),
                "Lifecycle: shutdown complete with failures"
            );
        }
        report
    }

    /// Returns false when a listener was already installed.
    fn spawn_signal_listener(&self) -> bool {
        if self.inner.signals_trapped.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut signals = match TerminationSignals::install() {
            Ok(signals) => signals,
            Err(e) => {
                error!("Lifecycle: failed to install signal handlers: {e}");
                return false;
            }
        };
        let coordinator = self.clone();
        tokio::spawn(async move {
            loop {
                let signal = signals.recv().await;
                coordinator.trigger(signal);
            }
        });
        true
    }

    fn spawn_prestop_watcher(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        let path = self.inner.options.prestop_path.clone();
        let poll = self.inner.options.prestop_poll_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if path.exists() {
                            info!(path = %path.display(), "Lifecycle: prestop file detected");
                            coordinator.trigger("prestop");
                            break;
                        }
                    }
                    _ = coordinator.cancelled() => break,
                }
            }
        })
    }
}

/// Run a single hook on its own task so a panic or a hang stays contained to it.
async fn run_hook(tag: &str, timeout: Duration, run: HookFn) -> Result<(), LifecycleError> {
    let mut task = tokio::spawn(run());
    match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(reason))) => Err(LifecycleError::HookFailed {
            tag: tag.to_string(),
            reason,
        }),
        Ok(Err(join_error)) if join_error.is_panic() => Err(LifecycleError::HookPanicked {
            tag: tag.to_string(),
        }),
        Ok(Err(join_error)) => Err(LifecycleError::HookFailed {
            tag: tag.to_string(),
            reason: join_error.to_string(),
        }),
        Err(_) => {
            task.abort();
            Err(LifecycleError::HookTimedOut {
                tag: tag.to_string(),
                timeout,
            })
        }
    }
}
