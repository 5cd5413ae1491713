//! Collector HTTP server
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/` | All metrics as JSON |
//! | POST | `/update/` | Merge one JSON metric |
//! | POST | `/update/{type}/{name}/{value}` | Merge one metric from the path |
//! | POST | `/updates/` | Merge a JSON array of metrics |
//! | GET | `/value/{type}/{name}` | Plain-text value |
//! | POST | `/value/` | JSON query, JSON metric back |
//! | GET | `/ping` | Storage liveness |
//!
//! Every request passes log → decrypt → verify → decompress before it
//! reaches a handler, and JSON or HTML responses are gzipped for clients
//! that accept it.

pub mod handlers;
pub mod middleware;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use log::error;
use std::sync::Arc;

use crate::codec::FrameDecoder;
use crate::error::MetricsError;
use crate::storage::MetricStore;

/// Shared state for handlers and middleware
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn MetricStore>,
    pub decoder: Arc<FrameDecoder>,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        (status, self.to_string()).into_response()
    }
}

/// Build the complete router with its middleware chain
pub fn build_router(store: Arc<dyn MetricStore>, decoder: FrameDecoder) -> Router {
    let state = AppState {
        store,
        decoder: Arc::new(decoder),
    };

    Router::new()
        .route("/", get(handlers::list_metrics))
        .route("/update/", post(handlers::update_json))
        .route("/update/{kind}/{name}/{value}", post(handlers::update_path))
        .route("/updates/", post(handlers::update_batch))
        .route("/value/", post(handlers::value_json))
        .route("/value/{kind}/{name}", get(handlers::value_path))
        .route("/ping", get(handlers::ping))
        // Layers run bottom-up: the last one added sees the request first
        .layer(axum::middleware::from_fn(middleware::compress_response))
        .layer(axum::middleware::from_fn(middleware::decompress))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::verify_integrity,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::decrypt,
        ))
        .layer(axum::middleware::from_fn(middleware::log_request))
        .layer(DefaultBodyLimit::max(middleware::MAX_BODY))
        .with_state(state)
}
