//! Handlers behind `/_readiness` and `/_liveness`.

use axum::http::StatusCode;
use tokio_util::sync::CancellationToken;

/// Answers whether this instance should receive new orders traffic. It turns
/// unavailable on the first shutdown trigger, while the HTTP server is still draining
/// and the database connection is still open.
#[derive(Clone)]
pub struct ReadinessHandler {
    shutdown_token: CancellationToken,
}

impl ReadinessHandler {
    pub(crate) fn new(shutdown_token: CancellationToken) -> Self {
        Self { shutdown_token }
    }

    pub fn is_ready(&self) -> bool {
        !self.shutdown_token.is_cancelled()
    }

    pub fn check(&self) -> StatusCode {
        if self.is_ready() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Always healthy while the process can serve HTTP, including during teardown, so a
/// restart never cuts the database disconnect short.
#[derive(Clone, Copy, Default)]
pub struct LivenessHandler;

impl LivenessHandler {
    pub fn check(&self) -> (StatusCode, &'static str) {
        (StatusCode::OK, "ok")
    }
}
