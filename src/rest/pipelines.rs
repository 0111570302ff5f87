use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::board::PipelineBoard;
use crate::controller::{self, parse_id};
use crate::error::AppResult;
use crate::models::{Job, MessageResponse, NewPipeline, Pipeline, PipelinePatch};
use crate::rest::{AppJson, AppQuery, AppState};
use crate::storage::ListQuery;

#[utoipa::path(
    get,
    path = "/api/pipelines",
    params(ListQuery),
    responses((status = 200, body = [Pipeline])),
    security(("bearer" = [])),
    tag = "pipelines"
)]
pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ListQuery>,
) -> AppResult<Json<Vec<Pipeline>>> {
    Ok(Json(state.storage.list(&query)?))
}

#[utoipa::path(
    get,
    path = "/api/pipelines/{id}",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, body = Pipeline),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "pipelines"
)]
pub async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Pipeline>> {
    let id = parse_id::<Pipeline>(&id)?;
    Ok(Json(state.storage.fetch(id)?))
}

#[utoipa::path(
    post,
    path = "/api/pipelines",
    request_body = NewPipeline,
    responses(
        (status = 201, body = Pipeline),
        (status = 400, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "pipelines"
)]
pub async fn create_pipeline(
    State(state): State<Arc<AppState>>,
    AppJson(input): AppJson<NewPipeline>,
) -> AppResult<(StatusCode, Json<Pipeline>)> {
    let pipeline = controller::create_pipeline(&state.storage, input)?;
    Ok((StatusCode::CREATED, Json(pipeline)))
}

#[utoipa::path(
    put,
    path = "/api/pipelines/{id}",
    params(("id" = String, Path, description = "Pipeline id")),
    request_body = PipelinePatch,
    responses(
        (status = 200, body = Pipeline),
        (status = 404, body = crate::error::ErrorBody),
        (status = 409, body = crate::error::ErrorBody, description = "A removed step is still in use")
    ),
    security(("bearer" = [])),
    tag = "pipelines"
)]
pub async fn update_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(patch): AppJson<PipelinePatch>,
) -> AppResult<Json<Pipeline>> {
    let id = parse_id::<Pipeline>(&id)?;
    Ok(Json(controller::update_pipeline(&state.storage, id, patch)?))
}

#[utoipa::path(
    delete,
    path = "/api/pipelines/{id}",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, body = crate::error::ErrorBody),
        (status = 409, body = crate::error::ErrorBody, description = "Pipeline still has jobs")
    ),
    security(("bearer" = [])),
    tag = "pipelines"
)]
pub async fn delete_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id::<Pipeline>(&id)?;
    controller::delete_pipeline(&state.storage, id)?;
    Ok(Json(MessageResponse::new("Pipeline deleted")))
}

/// Jobs of the pipeline grouped into one column per step.
#[utoipa::path(
    get,
    path = "/api/pipelines/{id}/board",
    params(("id" = String, Path, description = "Pipeline id")),
    responses(
        (status = 200, body = PipelineBoard),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "pipelines"
)]
pub async fn get_board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<PipelineBoard>> {
    let id = parse_id::<Pipeline>(&id)?;
    let pipeline: Pipeline = state.storage.fetch(id)?;
    let jobs: Vec<Job> = state.storage.all()?;
    Ok(Json(PipelineBoard::from_pipeline(pipeline, jobs)))
}
