//! HTTP server for the metrics endpoint.

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::sink::{self, SharedSink};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    sink: SharedSink,
}

/// Create the HTTP router.
fn create_router(sink: SharedSink, metrics_path: &str) -> Router {
    let state = AppState { sink };

    Router::new()
        .route(metrics_path, get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Handler for the metrics endpoint. Reads the sink, never scrapes.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let body = state.sink.render();

    (StatusCode::OK, [(CONTENT_TYPE, sink::CONTENT_TYPE)], body).into_response()
}

/// Handler for the /health endpoint.
async fn health_handler() -> Response {
    (StatusCode::OK, "healthy\n").into_response()
}

/// Handler for the /ready endpoint.
async fn ready_handler(State(state): State<AppState>) -> Response {
    if state.sink.last_success().is_some() {
        (StatusCode::OK, "ready\n").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "not ready - no successful scrape yet\n",
        )
            .into_response()
    }
}

/// Wait until the watch value turns true or the sender goes away.
async fn wait_for_shutdown(mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        if shutdown.changed().await.is_err() {
            break;
        }
    }
}

/// HTTP server exposing the metrics sink.
pub struct HttpServer {
    sink: SharedSink,
    metrics_path: String,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(sink: SharedSink, metrics_path: impl Into<String>) -> Self {
        Self {
            sink,
            metrics_path: metrics_path.into(),
        }
    }

    /// Serve on `listener` until the shutdown signal is received.
    ///
    /// Binding is left to the caller so that a busy port fails at startup.
    pub async fn serve(
        self,
        listener: TcpListener,
        shutdown: watch::Receiver<bool>,
    ) -> anyhow::Result<()> {
        let router = create_router(self.sink, &self.metrics_path);
        let addr = listener.local_addr()?;

        info!(
            addr = %addr,
            path = %self.metrics_path,
            "HTTP server listening"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                wait_for_shutdown(shutdown).await;
                info!("HTTP server shutting down");
            })
            .await
            .map_err(|e| anyhow::anyhow!("HTTP server error: {}", e))?;

        info!("HTTP server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MetricsSink;
    use axum::body::Body;
    use axum::http::Request;
    use smartmeter_common::Reading;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn make_sink() -> SharedSink {
        Arc::new(MetricsSink::new())
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let sink = make_sink();
        sink.set_reading(&Reading::PowerWatts(1200.0));
        let router = create_router(sink, "/metrics");

        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response.headers().get("content-type").unwrap();
        assert!(
            content_type
                .to_str()
                .unwrap()
                .starts_with("application/openmetrics-text")
        );

        let body = body_string(response).await;
        assert!(body.contains("smartmeter_power_watts 1200.0"));
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let router = create_router(make_sink(), "/metrics");

        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ready_endpoint_not_ready() {
        let router = create_router(make_sink(), "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        // Not ready because no scrape has succeeded
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_ready_endpoint_ready() {
        let sink = make_sink();
        sink.record_success(1_700_000_000.0);
        let router = create_router(sink, "/metrics");

        let response = router
            .oneshot(Request::get("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_custom_metrics_path() {
        let router = create_router(make_sink(), "/smartmeter/metrics");

        let response = router
            .clone()
            .oneshot(
                Request::get("/smartmeter/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // Default path should 404
        let response = router
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
