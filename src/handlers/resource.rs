//! JSON:API resource handlers. Each resolves the engine from the `:resource` path segment.

use crate::error::AppError;
use crate::request::{QueryParams, RequestContext};
use crate::response::JsonApiResponse;
use crate::service::{Engine, OperationResult};
use crate::state::AppState;
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
};

type Pairs = Query<Vec<(String, String)>>;

fn engine<'a>(state: &'a AppState, resource: &str) -> Result<Engine<'a>, AppError> {
    Engine::for_path(&state.model, state.store.as_ref(), &state.settings, resource)
}

fn context(query: &[(String, String)], body: &[u8]) -> Result<RequestContext, AppError> {
    let body = RequestContext::parse_body(body)?;
    Ok(RequestContext::new(QueryParams::from_pairs(query), body))
}

/// GET /:resource
pub async fn index(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(query): Pairs,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &[])?;
    engine(&state, &resource)?.index(&ctx).await
}

/// POST /:resource
pub async fn store(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    Query(query): Pairs,
    body: Bytes,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &body)?;
    engine(&state, &resource)?.store(&ctx).await
}

/// PATCH /:resource with an `operations` envelope.
pub async fn batch(
    State(state): State<AppState>,
    Path(resource): Path<String>,
    body: Bytes,
) -> Result<JsonApiResponse<Vec<OperationResult>>, AppError> {
    let engine = engine(&state, &resource)?;
    let body = RequestContext::parse_body(&body).map_err(|e| AppError::Validation(e.public_detail()))?;
    engine.batch(&body).await
}

/// GET /:resource/:id
pub async fn show(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Query(query): Pairs,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &[])?;
    engine(&state, &resource)?.show(&ctx, &id).await
}

/// PATCH /:resource/:id
pub async fn update(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
    Query(query): Pairs,
    body: Bytes,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &body)?;
    engine(&state, &resource)?.update(&ctx, &id).await
}

/// DELETE /:resource/:id
pub async fn destroy(
    State(state): State<AppState>,
    Path((resource, id)): Path<(String, String)>,
) -> Result<JsonApiResponse, AppError> {
    engine(&state, &resource)?.destroy(&id).await
}

/// GET /:resource/:id/:relation
pub async fn related(
    State(state): State<AppState>,
    Path((resource, id, relation)): Path<(String, String, String)>,
    Query(query): Pairs,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &[])?;
    engine(&state, &resource)?.related(&ctx, &id, &relation).await
}

/// GET /:resource/:id/relationships/:relation
pub async fn list_relationship(
    State(state): State<AppState>,
    Path((resource, id, relation)): Path<(String, String, String)>,
    Query(query): Pairs,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &[])?;
    engine(&state, &resource)?.list_relationship(&ctx, &id, &relation).await
}

/// POST /:resource/:id/relationships/:relation
pub async fn store_relationship(
    State(state): State<AppState>,
    Path((resource, id, relation)): Path<(String, String, String)>,
    Query(query): Pairs,
    body: Bytes,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &body)?;
    engine(&state, &resource)?.store_relationship(&ctx, &id, &relation).await
}

/// PATCH /:resource/:id/relationships/:relation
pub async fn update_relationship(
    State(state): State<AppState>,
    Path((resource, id, relation)): Path<(String, String, String)>,
    Query(query): Pairs,
    body: Bytes,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&query, &body)?;
    engine(&state, &resource)?.update_relationship(&ctx, &id, &relation).await
}

/// DELETE /:resource/:id/relationships/:relation
pub async fn destroy_relationship(
    State(state): State<AppState>,
    Path((resource, id, relation)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<JsonApiResponse, AppError> {
    let ctx = context(&[], &body)?;
    engine(&state, &resource)?.destroy_relationship(&ctx, &id, &relation).await
}
