use axum::extract::{MatchedPath, Request};
use axum::http::header::USER_AGENT;
use axum::middleware::Next;
use axum::response::Response;
use tokio::time::Instant;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const METRIC_HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
const METRIC_HTTP_REQUESTS_DURATION_SECONDS: &str = "http_requests_duration_seconds";

/// Runs the request inside a `request` span carrying its `request_id`, then emits one
/// record once the handler has produced a response. The response is passed through
/// untouched.
pub async fn log_request(req: Request, next: Next) -> Response {
    let start = Instant::now();

    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let method = req.method().clone();
    let url = req.uri().to_string();
    let path = req.uri().path().to_owned();
    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    // Label metrics by route template to keep cardinality bounded.
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| path.clone());

    let span = info_span!("request", request_id = %request_id);
    let response = next.run(req).instrument(span.clone()).await;

    let elapsed = start.elapsed();
    let status = response.status().as_u16();
    span.in_scope(|| {
        info!(
            method = %method,
            url = %url,
            path = %path,
            userAgent = %user_agent,
            respStatus = status,
            elapsedMs = elapsed.as_secs_f64() * 1000.0,
            "request completed"
        );
    });

    let labels = [
        ("method", method.to_string()),
        ("path", route),
        ("status", status.to_string()),
    ];
    metrics::counter!(METRIC_HTTP_REQUESTS_TOTAL, &labels).increment(1);
    metrics::histogram!(METRIC_HTTP_REQUESTS_DURATION_SECONDS, &labels)
        .record(elapsed.as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    use super::*;

    type Fields = HashMap<String, String>;

    #[derive(Clone, Default)]
    struct Capture {
        events: Arc<Mutex<Vec<Fields>>>,
        spans: Arc<Mutex<Vec<(String, Fields)>>>,
    }

    struct FieldVisitor<'a>(&'a mut Fields);

    impl Visit for FieldVisitor<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
            self.0
                .insert(field.name().to_string(), format!("{value:?}"));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }
    }

    impl<S: Subscriber> Layer<S> for Capture {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
            let mut fields = Fields::new();
            attrs.record(&mut FieldVisitor(&mut fields));
            self.spans
                .lock()
                .unwrap()
                .push((attrs.metadata().name().to_string(), fields));
        }

        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let mut fields = Fields::new();
            event.record(&mut FieldVisitor(&mut fields));
            self.events.lock().unwrap().push(fields);
        }
    }

    fn app() -> Router {
        Router::new()
            .route(
                "/orders/:id",
                get(|| async { (StatusCode::CREATED, "order created") }),
            )
            .route(
                "/broken",
                get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
            )
            .layer(axum::middleware::from_fn(log_request))
    }

    fn completed(capture: &Capture) -> Vec<Fields> {
        capture
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|f| f.get("message").map(String::as_str) == Some("request completed"))
            .cloned()
            .collect()
    }

    #[tokio::test]
    async fn emits_one_record_per_request() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(capture.clone()),
        );

        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/orders/42?expand=items")
                    .header(USER_AGENT, "orders-test/1.0")
                    .header(REQUEST_ID_HEADER, "req-abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"order created");

        let records = completed(&capture);
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record["method"], "GET");
        assert_eq!(record["url"], "/orders/42?expand=items");
        assert_eq!(record["path"], "/orders/42");
        assert_eq!(record["userAgent"], "orders-test/1.0");
        assert_eq!(record["respStatus"], "201");
        assert!(record.contains_key("elapsedMs"));

        let spans = capture.spans.lock().unwrap();
        let (_, span_fields) = spans
            .iter()
            .find(|(name, _)| name == "request")
            .expect("request span");
        assert_eq!(span_fields["request_id"], "req-abc-123");
    }

    #[tokio::test]
    async fn error_responses_pass_through_unchanged() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(capture.clone()),
        );

        let response = app()
            .oneshot(Request::builder().uri("/broken").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"boom");
        let records = completed(&capture);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["respStatus"], "500");
        assert_eq!(records[0]["userAgent"], "");
    }

    #[tokio::test]
    async fn generates_request_id_when_absent() {
        let capture = Capture::default();
        let _guard = tracing::subscriber::set_default(
            tracing_subscriber::registry().with(capture.clone()),
        );

        app()
            .oneshot(Request::builder().uri("/orders/7").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let spans = capture.spans.lock().unwrap();
        let (_, span_fields) = spans
            .iter()
            .find(|(name, _)| name == "request")
            .expect("request span");
        assert!(Uuid::parse_str(&span_fields["request_id"]).is_ok());
    }
}
