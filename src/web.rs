use crate::export;
use crate::monitor::{SharedMonitor, Snapshot};
use axum::{
    extract::State,
    http::header,
    response::sse::{Event, Sse},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub monitor: SharedMonitor,
    pub broadcast_tx: broadcast::Sender<String>, // SSE updates after each tick
    pub shutdown_tx: broadcast::Sender<()>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/endpoints", post(add_endpoint).delete(remove_endpoint))
        .route("/api/endpoints/clear", post(clear_all_endpoints))
        .route("/api/start", post(start_monitoring))
        .route("/api/stop", post(stop_monitoring))
        .route("/api/clear", post(clear_data))
        .route("/api/export", get(export_csv))
        .route("/api/events", get(sse_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct EndpointPayload {
    pub url: String,
}

async fn get_status(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.monitor.read().await.snapshot())
}

async fn add_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<EndpointPayload>,
) -> Json<serde_json::Value> {
    let added = state.monitor.write().await.add_endpoint(&payload.url);
    if added {
        tracing::info!("Watching new endpoint: {}", payload.url);
    }
    Json(serde_json::json!({ "success": true, "added": added }))
}

async fn remove_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<EndpointPayload>,
) -> Json<serde_json::Value> {
    let removed = state.monitor.write().await.remove_endpoint(&payload.url);
    if removed {
        tracing::info!("Stopped watching endpoint: {}", payload.url);
    }
    Json(serde_json::json!({ "success": true, "removed": removed }))
}

/// Drops every watched endpoint together with the collected data, matching
/// the dashboard's clear-all action.
async fn clear_all_endpoints(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut monitor = state.monitor.write().await;
    monitor.clear_endpoints();
    monitor.clear_data();
    Json(serde_json::json!({ "success": true }))
}

async fn start_monitoring(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.monitor.write().await.start();
    Json(serde_json::json!({ "success": true }))
}

async fn stop_monitoring(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.monitor.write().await.stop();
    Json(serde_json::json!({ "success": true }))
}

async fn clear_data(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.monitor.write().await.clear_data();
    Json(serde_json::json!({ "success": true }))
}

async fn export_csv(State(state): State<AppState>) -> impl IntoResponse {
    let monitor = state.monitor.read().await;
    let body = export::to_csv(monitor.results());
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"api_report.csv\"",
            ),
        ],
        body,
    )
}

async fn sse_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Initial state
    let snapshot = state.monitor.read().await.snapshot();
    let initial_json = serde_json::to_string(&snapshot).unwrap_or_default();
    let initial_event = Ok(Event::default().event("init").data(initial_json));

    let rx = state.broadcast_tx.subscribe();
    let broadcast_stream = tokio_stream::wrappers::BroadcastStream::new(rx).map(|msg| match msg {
        Ok(json) => Ok(Event::default().event("update").data(json)),
        Err(_) => Ok(Event::default().event("error").data("stream lagged")),
    });

    let mut shutdown_rx = state.shutdown_tx.subscribe();
    let stream = futures::stream::once(async { initial_event })
        .chain(broadcast_stream)
        .take_until(async move {
            let _ = shutdown_rx.recv().await;
        });

    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}
