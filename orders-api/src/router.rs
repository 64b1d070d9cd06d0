use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use database::{ConnectionManager, Connector, MongoConnector};
use lifecycle::{LivenessHandler, ReadinessHandler, ShutdownCoordinator};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::middleware::log_request;
use crate::SERVICE_NAME;

const STATUS_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared by every handler. The connection manager is injected, never global.
pub struct AppState<C: Connector = MongoConnector> {
    pub db: Arc<ConnectionManager<C>>,
    readiness: ReadinessHandler,
    liveness: LivenessHandler,
}

impl<C: Connector> AppState<C> {
    pub fn new(db: Arc<ConnectionManager<C>>, coordinator: &ShutdownCoordinator) -> Self {
        Self {
            db,
            readiness: coordinator.readiness_handler(),
            liveness: coordinator.liveness_handler(),
        }
    }
}

// Derive would require `C: Clone`.
impl<C: Connector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            readiness: self.readiness.clone(),
            liveness: self.liveness.clone(),
        }
    }
}

/// Probe, status and optional metrics routes, all wrapped by the request log middleware.
/// Business routes are merged in by the caller through `routes`.
pub fn router<C: Connector>(
    state: AppState<C>,
    routes: Router<AppState<C>>,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let mut router = routes
        .route("/", get(index))
        .route("/_readiness", get(readiness::<C>))
        .route("/_liveness", get(liveness::<C>))
        .route("/status", get(status::<C>));

    if let Some(recorder_handle) = metrics {
        router = router.route("/metrics", get(move || ready(recorder_handle.render())));
    }

    router
        .layer(axum::middleware::from_fn(log_request))
        .with_state(state)
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    const BUCKETS: &[f64] = &[
        0.001, 0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
    ];

    PrometheusBuilder::new()
        .set_buckets(BUCKETS)?
        .install_recorder()
}

async fn index() -> &'static str {
    SERVICE_NAME
}

async fn readiness<C: Connector>(State(state): State<AppState<C>>) -> StatusCode {
    state.readiness.check()
}

async fn liveness<C: Connector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    state.liveness.check()
}

async fn status<C: Connector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    match state.db.ping(STATUS_PING_TIMEOUT).await {
        Ok(()) => (StatusCode::OK, "database connected".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use database::{ConnectionError, ConnectionOptions, DbCredential, DisconnectError};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use super::*;

    struct NullConnector;

    #[async_trait]
    impl Connector for NullConnector {
        type Client = ();
        type Database = ();

        async fn connect(
            &self,
            _credential: &DbCredential,
            _options: &ConnectionOptions,
        ) -> Result<(), ConnectionError> {
            Ok(())
        }

        fn database(&self, _client: &(), _name: &str) {}

        async fn ping(&self, _database: &()) -> Result<(), ConnectionError> {
            Ok(())
        }

        async fn close(&self, _client: ()) -> Result<(), DisconnectError> {
            Ok(())
        }
    }

    fn coordinator() -> ShutdownCoordinator {
        ShutdownCoordinator::builder("test")
            .with_trap_signals(false)
            .with_prestop_check(false)
            .build()
    }

    async fn connected_manager() -> Arc<ConnectionManager<NullConnector>> {
        let manager = Arc::new(ConnectionManager::new(NullConnector));
        manager
            .connect(
                &DbCredential::new("localhost", "orders", "pw"),
                &ConnectionOptions::new("orders"),
            )
            .await
            .unwrap();
        manager
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn index_names_the_service() {
        let coordinator = coordinator();
        let state = AppState::new(connected_manager().await, &coordinator);

        let (status, body) = fetch(router(state, Router::new(), None), "/").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, SERVICE_NAME);
    }

    #[tokio::test]
    async fn readiness_fails_once_shutdown_starts() {
        let coordinator = coordinator();
        let app = router(
            AppState::new(connected_manager().await, &coordinator),
            Router::new(),
            None,
        );

        assert_eq!(fetch(app.clone(), "/_readiness").await.0, StatusCode::OK);
        coordinator.trigger("test");
        assert_eq!(
            fetch(app.clone(), "/_readiness").await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(fetch(app, "/_liveness").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn status_reflects_connection_state() {
        let coordinator = coordinator();
        let db = connected_manager().await;
        let app = router(AppState::new(db.clone(), &coordinator), Router::new(), None);

        assert_eq!(fetch(app.clone(), "/status").await.0, StatusCode::OK);

        db.disconnect().await.unwrap();
        let (status, body) = fetch(app, "/status").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, ConnectionError::Closed.to_string());
    }

    #[tokio::test]
    async fn status_before_connect_is_unavailable() {
        let coordinator = coordinator();
        let db = Arc::new(ConnectionManager::new(NullConnector));
        let app = router(AppState::new(db, &coordinator), Router::new(), None);

        let (status, body) = fetch(app, "/status").await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, ConnectionError::NotInitialized.to_string());
    }

    #[tokio::test]
    async fn caller_routes_share_state() {
        let coordinator = coordinator();
        let routes = Router::new().route(
            "/orders",
            get(|State(state): State<AppState<NullConnector>>| async move {
                match state.db.get_db() {
                    Ok(()) => StatusCode::OK,
                    Err(_) => StatusCode::SERVICE_UNAVAILABLE,
                }
            }),
        );
        let app = router(
            AppState::new(connected_manager().await, &coordinator),
            routes,
            None,
        );

        assert_eq!(fetch(app, "/orders").await.0, StatusCode::OK);
    }

    #[tokio::test]
    async fn metrics_route_is_only_mounted_with_a_recorder() {
        let coordinator = coordinator();
        let app = router(
            AppState::new(connected_manager().await, &coordinator),
            Router::new(),
            None,
        );

        assert_eq!(fetch(app, "/metrics").await.0, StatusCode::NOT_FOUND);
    }
}
