pub(crate) const METRIC_SHUTDOWN_INITIATED: &str = "lifecycle_shutdown_initiated_total";
pub(crate) const METRIC_SHUTDOWN_COMPLETED: &str = "lifecycle_shutdown_completed_total";
pub(crate) const METRIC_HOOK_DURATION: &str = "lifecycle_hook_duration_seconds";
pub(crate) const METRIC_HOOK_RESULT: &str = "lifecycle_hook_result_total";

pub(crate) fn emit_shutdown_initiated(service_name: &str, trigger: &str) {
    metrics::counter!(
        METRIC_SHUTDOWN_INITIATED,
        "service_name" => service_name.to_string(),
        "trigger" => trigger.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_shutdown_completed(service_name: &str, clean: bool) {
    metrics::counter!(
        METRIC_SHUTDOWN_COMPLETED,
        "service_name" => service_name.to_string(),
        "clean" => clean.to_string()
    )
    .increment(1);
}

pub(crate) fn emit_hook_finished(service_name: &str, hook: &str, result: &str, duration_secs: f64) {
    metrics::histogram!(
        METRIC_HOOK_DURATION,
        "service_name" => service_name.to_string(),
        "hook" => hook.to_string(),
        "result" => result.to_string()
    )
    .record(duration_secs);
    metrics::counter!(
        METRIC_HOOK_RESULT,
        "service_name" => service_name.to_string(),
        "hook" => hook.to_string(),
        "result" => result.to_string()
    )
    .increment(1);
}
