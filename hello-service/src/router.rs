use std::future::ready;
use std::sync::Arc;

use axum::{
    extract::State,
    http::header,
    response::IntoResponse,
    routing::get,
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::trace::TraceLayer;

use crate::prometheus::track_metrics;

#[derive(Clone)]
pub struct AppState {
    greeting: Arc<str>,
}

impl AppState {
    pub fn new(service_name: &str, host: &str) -> Self {
        let message = format!("Hello from {service_name} on {host}");
        // Escape the value only, the envelope keeps a space after the colon
        let message = serde_json::Value::String(message);
        Self {
            greeting: format!(r#"{{"message": {message}}}"#).into(),
        }
    }
}

async fn index(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.greeting.to_string(),
    )
}

/// Liveness only, the registry drops the instance when this stops answering.
pub async fn health() -> &'static str {
    "OK"
}

pub fn router(state: AppState, metrics: Option<PrometheusHandle>) -> Router {
    let router = Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .with_state(state);

    let router = match metrics {
        Some(recorder_handle) => router
            .route("/metrics", get(move || ready(recorder_handle.render())))
            .layer(axum::middleware::from_fn(track_metrics)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}
