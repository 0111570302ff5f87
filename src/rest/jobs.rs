use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::controller::{self, parse_id};
use crate::error::AppResult;
use crate::models::{Job, JobPatch, MessageResponse, MoveJobRequest, NewJob};
use crate::rest::{AppJson, AppQuery, AppState};
use crate::storage::ListQuery;

/// Newest first, 10 per page unless `limit` says otherwise (`limit=0` for all).
#[utoipa::path(
    get,
    path = "/api/jobs",
    params(ListQuery),
    responses(
        (status = 200, body = [Job]),
        (status = 400, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ListQuery>,
) -> AppResult<Json<Vec<Job>>> {
    Ok(Json(state.storage.list(&query)?))
}

#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job id")),
    responses(
        (status = 200, body = Job),
        (status = 400, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Job>> {
    let id = parse_id::<Job>(&id)?;
    Ok(Json(state.storage.fetch(id)?))
}

#[utoipa::path(
    post,
    path = "/api/jobs",
    request_body = NewJob,
    responses(
        (status = 201, body = Job),
        (status = 400, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn create_job(
    State(state): State<Arc<AppState>>,
    AppJson(input): AppJson<NewJob>,
) -> AppResult<(StatusCode, Json<Job>)> {
    let job = controller::create_job(&state.storage, input)?;
    Ok((StatusCode::CREATED, Json(job)))
}

#[utoipa::path(
    put,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job id")),
    request_body = JobPatch,
    responses(
        (status = 200, body = Job),
        (status = 400, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn update_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(patch): AppJson<JobPatch>,
) -> AppResult<Json<Job>> {
    let id = parse_id::<Job>(&id)?;
    Ok(Json(controller::update_job(&state.storage, id, patch)?))
}

/// Move a job between steps of its pipeline.
#[utoipa::path(
    post,
    path = "/api/jobs/{id}/move",
    params(("id" = String, Path, description = "Job id")),
    request_body = MoveJobRequest,
    responses(
        (status = 200, body = Job),
        (status = 400, body = crate::error::ErrorBody, description = "Target is not a step of the pipeline"),
        (status = 404, body = crate::error::ErrorBody),
        (status = 409, body = crate::error::ErrorBody, description = "fromStep is stale")
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn move_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(request): AppJson<MoveJobRequest>,
) -> AppResult<Json<Job>> {
    let id = parse_id::<Job>(&id)?;
    Ok(Json(controller::move_job(&state.storage, id, request)?))
}

#[utoipa::path(
    delete,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job id")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "jobs"
)]
pub async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id::<Job>(&id)?;
    controller::delete_job(&state.storage, id)?;
    Ok(Json(MessageResponse::new("Job deleted")))
}
