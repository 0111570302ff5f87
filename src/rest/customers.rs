use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::controller::{self, parse_id};
use crate::error::AppResult;
use crate::models::{CountResponse, Customer, CustomerPatch, MessageResponse, NewCustomer};
use crate::rest::{AppJson, AppQuery, AppState};
use crate::storage::ListQuery;

#[utoipa::path(
    get,
    path = "/api/customers",
    params(ListQuery),
    responses(
        (status = 200, body = [Customer]),
        (status = 400, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "customers"
)]
pub async fn list_customers(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ListQuery>,
) -> AppResult<Json<Vec<Customer>>> {
    Ok(Json(state.storage.list(&query)?))
}

#[utoipa::path(
    get,
    path = "/api/customers/count",
    responses((status = 200, body = CountResponse)),
    security(("bearer" = [])),
    tag = "customers"
)]
pub async fn count_customers(State(state): State<Arc<AppState>>) -> AppResult<Json<CountResponse>> {
    let count = state.storage.count::<Customer>()? as u64;
    Ok(Json(CountResponse { count }))
}

#[utoipa::path(
    get,
    path = "/api/customers/{id}",
    params(("id" = String, Path, description = "Customer id")),
    responses(
        (status = 200, body = Customer),
        (status = 400, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "customers"
)]
pub async fn get_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<Customer>> {
    let id = parse_id::<Customer>(&id)?;
    Ok(Json(state.storage.fetch(id)?))
}

#[utoipa::path(
    post,
    path = "/api/customers",
    request_body = NewCustomer,
    responses(
        (status = 201, body = Customer),
        (status = 400, body = crate::error::ErrorBody),
        (status = 409, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "customers"
)]
pub async fn create_customer(
    State(state): State<Arc<AppState>>,
    AppJson(input): AppJson<NewCustomer>,
) -> AppResult<(StatusCode, Json<Customer>)> {
    let customer = controller::create_customer(&state.storage, input)?;
    Ok((StatusCode::CREATED, Json(customer)))
}

#[utoipa::path(
    put,
    path = "/api/customers/{id}",
    params(("id" = String, Path, description = "Customer id")),
    request_body = CustomerPatch,
    responses(
        (status = 200, body = Customer),
        (status = 400, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody),
        (status = 409, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "customers"
)]
pub async fn update_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    AppJson(patch): AppJson<CustomerPatch>,
) -> AppResult<Json<Customer>> {
    let id = parse_id::<Customer>(&id)?;
    Ok(Json(controller::update_customer(&state.storage, id, patch)?))
}

#[utoipa::path(
    delete,
    path = "/api/customers/{id}",
    params(("id" = String, Path, description = "Customer id")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 404, body = crate::error::ErrorBody),
        (status = 409, body = crate::error::ErrorBody, description = "Customer still has jobs")
    ),
    security(("bearer" = [])),
    tag = "customers"
)]
pub async fn delete_customer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    let id = parse_id::<Customer>(&id)?;
    controller::delete_customer(&state.storage, id)?;
    Ok(Json(MessageResponse::new("Customer deleted")))
}
