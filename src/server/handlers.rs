//! Route handlers
//!
//! Bodies arrive here already decrypted, verified and inflated.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use log::debug;

use crate::error::{MetricsError, Result};
use crate::metric::{Metric, MetricKey, MetricKind};
use crate::server::AppState;

/// Records per `bulk_add` call on `/updates/`
pub const BATCH_CHUNK: usize = 100;

fn parse_json<T: serde::de::DeserializeOwned>(body: &Bytes) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| MetricsError::Validation(format!("invalid JSON body: {}", e)))
}

/// GET /
pub async fn list_metrics(State(state): State<AppState>) -> Result<Json<Vec<Metric>>> {
    let mut metrics = state.store.list().await?;
    metrics.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.kind().as_str().cmp(b.kind().as_str())));
    Ok(Json(metrics))
}

/// POST /update/{type}/{name}/{value}
pub async fn update_path(
    State(state): State<AppState>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<StatusCode> {
    let metric = Metric::parse(&kind, &name, &value)?;
    debug!("Update {} {} = {}", metric.kind(), metric.id, metric.value);
    state.store.add(metric).await?;
    Ok(StatusCode::OK)
}

/// POST /update/
///
/// Answers with the stored metric after the merge.
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> Result<Json<Metric>> {
    let metric: Metric = parse_json(&body)?;
    let key = metric.key();
    state.store.add(metric).await?;
    Ok(Json(state.store.get(&key).await?))
}

/// POST /updates/
pub async fn update_batch(State(state): State<AppState>, body: Bytes) -> Result<Json<Vec<Metric>>> {
    let metrics: Vec<Metric> = parse_json(&body)?;
    debug!("Batch of {} metrics", metrics.len());

    for chunk in metrics.chunks(BATCH_CHUNK) {
        state.store.bulk_add(chunk.to_vec()).await?;
    }
    Ok(Json(metrics))
}

/// GET /value/{type}/{name}
pub async fn value_path(
    State(state): State<AppState>,
    Path((kind, name)): Path<(String, String)>,
) -> Result<impl IntoResponse> {
    let kind: MetricKind = kind.parse()?;
    let metric = state.store.get(&MetricKey::new(name, kind)).await?;
    Ok(metric.value.to_string())
}

/// POST /value/
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Result<Json<Metric>> {
    let key: MetricKey = parse_json(&body)?;
    Ok(Json(state.store.get(&key).await?))
}

/// GET /ping
pub async fn ping(State(state): State<AppState>) -> StatusCode {
    if state.store.ping().await {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}
