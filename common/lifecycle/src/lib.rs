//! Process lifecycle: termination signal trapping, an ordered list of shutdown hooks that
//! runs exactly once, and the readiness/liveness probes that reflect it.
//!
//! A service builds one [`ShutdownCoordinator`] at startup, registers its cleanup work with
//! [`ShutdownCoordinator::on_signal`] (in the order it must run), then awaits
//! [`ShutdownCoordinator::monitor`]. The first SIGINT/SIGTERM (or pre-stop file, or
//! [`ShutdownCoordinator::trigger`] call) runs every hook sequentially; later triggers only
//! observe the same [`ShutdownReport`].

mod coordinator;
mod error;
mod hook;
mod metrics;
mod probes;
mod signals;

pub use coordinator::{CoordinatorBuilder, CoordinatorOptions, ShutdownCoordinator};
pub use error::LifecycleError;
pub use hook::{HookOptions, HookOutcome, ShutdownReport};
pub use probes::{LivenessHandler, ReadinessHandler};
