use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use crate::json;
use crate::matcher::Matcher;
use crate::query::{self, QueryRequest};
use crate::AppState;

use super::hosts::now_micros;

/// `POST /v1/query` (§10.5): translate the JSON matcher-tree AST into a
/// `Matcher`, then stream the filtered `tojson` projection back.
pub async fn run_query(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let matcher: Option<Matcher> = req
        .filter
        .map(query::translate)
        .transpose()
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;

    let mut buf = String::new();
    json::to_json(&state.store, matcher.as_ref(), req.flags(), now_micros(), &mut buf)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        buf,
    ))
}
