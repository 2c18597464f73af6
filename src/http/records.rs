use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::json;

use crate::domain::{Fields, RecordKind};

use super::extract::{parse_id, JsonBody};
use super::{created, ApiResult, AppState};

pub(crate) async fn list(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.records.list(kind).await?))
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    JsonBody(fields): JsonBody<Fields>,
) -> ApiResult<impl IntoResponse> {
    Ok(created(state.records.create(kind, fields).await?))
}

pub(crate) async fn show(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, kind.as_str())?;
    Ok(Json(state.records.get(kind, id).await?))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
    JsonBody(changes): JsonBody<Fields>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, kind.as_str())?;
    Ok(Json(state.records.update(kind, id, changes).await?))
}

pub(crate) async fn remove(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let id = parse_id(&id, kind.as_str())?;
    let removed = state.records.delete(kind, id).await?;
    Ok(Json(json!({
        "message": format!("{} deleted successfully", capitalize(kind.as_str())),
        "removedDependents": removed,
    })))
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
