//! The Update API exposed over HTTP (§6.1 / §10.5) and the host lookup /
//! store-reset convenience routes.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use crate::error::{UpdateError, UpdateOutcome, UpdateResult};
use crate::json;
use crate::query::ValueDto;
use crate::store::MetricStoreRef;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StoreNamedRequest {
    pub name: String,
    pub ts: i64,
    #[serde(default)]
    pub backend: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StoreMetricRequest {
    pub name: String,
    pub ts: i64,
    #[serde(default)]
    pub backend: Option<String>,
    #[serde(default)]
    pub metric_store: Option<MetricStoreRefDto>,
}

#[derive(Debug, Deserialize)]
pub struct MetricStoreRefDto {
    #[serde(rename = "type")]
    pub store_type: String,
    pub id: String,
}

impl From<MetricStoreRefDto> for MetricStoreRef {
    fn from(dto: MetricStoreRefDto) -> Self {
        MetricStoreRef {
            store_type: dto.store_type,
            id: dto.id,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StoreAttributeRequest {
    pub key: String,
    pub value: ValueDto,
    pub ts: i64,
    #[serde(default)]
    pub backend: Option<String>,
}

pub async fn store_host(
    State(state): State<AppState>,
    Json(req): Json<StoreNamedRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    respond(state.store.store_host_from(&req.name, req.ts, req.backend.as_deref()))
}

pub async fn store_service(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<StoreNamedRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    respond(state.store.store_service_from(&host, &req.name, req.ts, req.backend.as_deref()))
}

pub async fn store_metric(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<StoreMetricRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    respond(state.store.store_metric_from(
        &host,
        &req.name,
        req.metric_store.map(Into::into),
        req.ts,
        req.backend.as_deref(),
    ))
}

pub async fn store_host_attribute(
    State(state): State<AppState>,
    Path(host): Path<String>,
    Json(req): Json<StoreAttributeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    respond(state.store.store_attribute_from(
        &host,
        &req.key,
        req.value.into_datum(),
        req.ts,
        req.backend.as_deref(),
    ))
}

pub async fn store_service_attribute(
    State(state): State<AppState>,
    Path((host, service)): Path<(String, String)>,
    Json(req): Json<StoreAttributeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    respond(state.store.store_service_attribute_from(
        &host,
        &service,
        &req.key,
        req.value.into_datum(),
        req.ts,
        req.backend.as_deref(),
    ))
}

pub async fn store_metric_attribute(
    State(state): State<AppState>,
    Path((host, metric)): Path<(String, String)>,
    Json(req): Json<StoreAttributeRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    respond(state.store.store_metric_attribute_from(
        &host,
        &metric,
        &req.key,
        req.value.into_datum(),
        req.ts,
        req.backend.as_deref(),
    ))
}

pub async fn get_host(
    State(state): State<AppState>,
    Path(host): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let Some(host) = state.store.get_host(&host) else {
        return Err((StatusCode::NOT_FOUND, format!("host {host:?} does not exist")));
    };
    let mut buf = String::new();
    let flags = state.config.serializer.flags();
    json::host_to_json(&host, flags, now_micros(), &mut buf)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        buf,
    ))
}

pub async fn clear_store(State(state): State<AppState>) -> impl IntoResponse {
    state.store.clear();
    StatusCode::NO_CONTENT
}

/// Maps an update outcome to its HTTP representation. `Store`'s entry
/// points already log at debug/warn (§10.1); this only needs to pick a
/// status code.
fn respond(result: UpdateResult) -> Result<impl IntoResponse, (StatusCode, String)> {
    match result {
        Ok(UpdateOutcome::Stored) => {
            Ok((StatusCode::OK, Json(serde_json::json!({"outcome": "stored"}))))
        }
        Ok(UpdateOutcome::Unchanged) => {
            Ok((StatusCode::OK, Json(serde_json::json!({"outcome": "unchanged"}))))
        }
        Err(err @ (UpdateError::MissingHost(_)
        | UpdateError::MissingService { .. }
        | UpdateError::MissingMetric { .. })) => {
            Err((StatusCode::NOT_FOUND, err.to_string()))
        }
        Err(err @ UpdateError::InvalidArgument(_)) => {
            Err((StatusCode::BAD_REQUEST, err.to_string()))
        }
    }
}

/// Wall-clock timestamp in the same unit (microseconds since the epoch) the
/// store uses for `last_update`/`AGE` — only needed by the handful of
/// read-only routes that don't take a caller-supplied `ts`.
pub(crate) fn now_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SysDbConfig;
    use crate::store::Store;
    use axum::response::IntoResponse;
    use std::sync::Arc;

    fn state() -> AppState {
        AppState {
            store: Arc::new(Store::new()),
            config: Arc::new(SysDbConfig::default()),
        }
    }

    #[tokio::test]
    async fn store_host_then_fetch_round_trips() {
        let state = state();
        let res = store_host(
            State(state.clone()),
            Json(StoreNamedRequest { name: "h1".into(), ts: 1, backend: None }),
        )
        .await
        .unwrap()
        .into_response();
        assert_eq!(res.status(), StatusCode::OK);

        let res = get_host(State(state), Path("h1".into())).await.unwrap().into_response();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn get_host_missing_is_404() {
        let state = state();
        let err = get_host(State(state), Path("nope".into())).await.unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn store_service_on_missing_host_is_404() {
        let state = state();
        let err = store_service(
            State(state),
            Path("nope".into()),
            Json(StoreNamedRequest { name: "svc".into(), ts: 1, backend: None }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn clear_store_empties_it() {
        let state = state();
        state.store.store_host("h1", 1).unwrap();
        clear_store(State(state.clone())).await;
        assert_eq!(state.store.host_count(), 0);
    }
}
