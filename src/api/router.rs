use axum::{
    body::Body,
    http::{HeaderName, Request, Response},
    routing::get,
    Router,
};
use std::time::Duration;
use tower_http::{
    normalize_path::NormalizePathLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::api::handlers;
use crate::core::state::AppState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Ops surface next to the bot: health and Prometheus scrape.
pub(crate) fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    let mut router: Router<AppState> = Router::new()
        .route("/healthz", get(handlers::healthz).head(handlers::healthz))
        .layer(NormalizePathLayer::trim_trailing_slash())
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(ops_span)
                .on_response(|response: &Response<Body>, latency: Duration, _span: &Span| {
                    record_response(response.status().as_u16(), latency)
                }),
        );

    if state.settings().telemetry().prometheus_enabled {
        router = router.route("/metrics", get(handlers::metrics));
    }

    router.with_state(state)
}

fn ops_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("-");
    tracing::info_span!(
        "ops_request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id
    )
}

fn record_response(status: u16, latency: Duration) {
    let status = status.to_string();
    metrics::counter!("http_requests_total", "status" => status.clone()).increment(1);
    metrics::histogram!("http_request_duration_seconds", "status" => status)
        .record(latency.as_secs_f64());
    tracing::debug!(latency_ms = latency.as_millis() as u64, "Ops request finished");
}

#[cfg(test)]
mod tests {
    use super::router;
    use axum::{body::to_bytes, body::Body, http::Request, http::StatusCode};
    use tower::ServiceExt;

    use crate::core::metrics;
    use crate::test_support;
    use crate::workflow::session::SessionState;

    #[tokio::test]
    async fn healthz_reports_sessions_and_ledger() {
        let harness = test_support::harness().await;
        harness.state.sessions().get_or_create(1);
        harness.state.sessions().update(2, |session| session.state = SessionState::Step3Student);
        harness.state.active_tasks().record(2, "T1");
        let app = router(harness.state.clone());

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["service"], "exam-grading-bot");
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["components"]["ledger"], "healthy");
        assert_eq!(json["components"]["active_tasks"], "1");
        assert_eq!(json["sessions"]["START"], 1);
        assert_eq!(json["sessions"]["STEP_3_STUDENT"], 1);
    }

    #[tokio::test]
    async fn metrics_disabled_returns_404() {
        let harness = test_support::harness().await;
        let app = router(harness.state.clone());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_enabled_returns_200() {
        let harness = test_support::harness_with_env(&[("PROMETHEUS_ENABLED", "1")]).await;
        metrics::init(harness.state.settings()).expect("metrics init");
        let app = router(harness.state.clone());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
    }
}
