//! Delivers real signals to the test process, kept in its own binary so the
//! handlers it installs cannot interfere with other tests.

use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lifecycle::{HookOptions, ShutdownCoordinator};

fn send_signal(name: &str) {
    let status = Command::new("kill")
        .arg(format!("-{name}"))
        .arg(std::process::id().to_string())
        .status()
        .expect("failed to run kill");
    assert!(status.success());
}

#[tokio::test]
async fn repeated_signals_run_hooks_once() {
    let coordinator = ShutdownCoordinator::builder("test")
        .with_prestop_check(false)
        .with_global_shutdown_timeout(Duration::from_secs(5))
        .build();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    coordinator
        .on_signal("database", HookOptions::new(), move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<(), String>(())
        })
        .unwrap();

    let monitor = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.monitor().await })
    };
    // Let the monitor task install its handlers before anything is delivered.
    tokio::time::sleep(Duration::from_millis(200)).await;

    send_signal("TERM");
    send_signal("TERM");
    send_signal("INT");

    let report = tokio::time::timeout(Duration::from_secs(10), monitor)
        .await
        .expect("timed out")
        .unwrap();

    assert!(report.is_clean());
    assert_eq!(report.outcomes.len(), 1);
    assert!(report.trigger == "SIGTERM" || report.trigger == "SIGINT");

    // Late signals are still absorbed by the listener and change nothing.
    send_signal("TERM");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}
