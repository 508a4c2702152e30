//! Calendar endpoints
//!
//! Lens and entry CRUD behind full request authentication (bearer plus the
//! anti-forgery gate on mutations).

use crate::auth::AuthContext;
use crate::calendar::{EntryPatch, LensPatch, NewEntry, NewLens};
use crate::server::state::AppState;
use crate::server::ApiError;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

async fn authed(
    state: &AppState,
    method: &Method,
    headers: &HeaderMap,
) -> Result<AuthContext, ApiError> {
    Ok(state.sessions.authenticate(method, headers).await?)
}

// ---- Lenses -------------------------------------------------------------

pub async fn list_lenses(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let lenses = state.lenses.list_visible(&context.member).await?;
    Ok(Json(lenses))
}

pub async fn create_lens(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Json(body): Json<NewLens>,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let lens = state.lenses.create(&context.member, body).await?;
    Ok((StatusCode::CREATED, Json(lens)))
}

pub async fn get_lens(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(lens_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let lens = state.lenses.get(&context.member, lens_id).await?;
    Ok(Json(lens))
}

pub async fn patch_lens(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(lens_id): Path<Uuid>,
    Json(body): Json<LensPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let lens = state.lenses.patch(&context.member, lens_id, body).await?;
    Ok(Json(lens))
}

pub async fn delete_lens(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(lens_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    state.lenses.delete(&context.member, lens_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---- Entries ------------------------------------------------------------

pub async fn list_entries(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let entries = state.entries.list_visible(&context.member).await?;
    Ok(Json(entries))
}

pub async fn create_entry(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Json(body): Json<NewEntry>,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let entry = state.entries.create(&context.member, body).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn get_entry(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(entry_id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let entry = state.entries.get(&context.member, entry_id).await?;
    Ok(Json(entry))
}

pub async fn patch_entry(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<EntryPatch>,
) -> Result<impl IntoResponse, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    let entry = state
        .entries
        .update(&context.member, entry_id, body)
        .await?;
    Ok(Json(entry))
}

pub async fn delete_entry(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(entry_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let context = authed(&state, &method, &headers).await?;
    state.entries.delete(&context.member, entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
