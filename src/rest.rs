//! REST API layer using Axum.
//!
//! Every route lives under `/api`. All of them except login and health
//! require a bearer token (see [`crate::auth::auth_middleware`]). Errors
//! are rendered by [`AppError`]'s `IntoResponse`; in development the
//! underlying detail is added to the body by [`expose_error_detail`].

use std::any::Any;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{FromRequest, FromRequestParts, Request, State};
use axum::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::auth::{auth_middleware, TokenKeys};
use crate::config::Config;
use crate::error::{AppError, AppResult, ErrorBody, ErrorDetail};
use crate::models::MessageResponse;
use crate::storage::Storage;

mod customers;
mod dashboard;
mod jobs;
mod pipelines;
mod users;

/// Largest error body `expose_error_detail` will rewrite.
const ERROR_BODY_LIMIT: usize = 64 * 1024;

/// Shared app state for REST handlers.
pub struct AppState {
    pub storage: Arc<Storage>,
    pub keys: TokenKeys,
    /// Echo error details back to clients (development only).
    pub expose_errors: bool,
    pub cors_origins: Vec<HeaderValue>,
}

impl AppState {
    pub fn new(storage: Storage, keys: TokenKeys) -> Self {
        Self {
            storage: Arc::new(storage),
            keys,
            expose_errors: false,
            cors_origins: Vec::new(),
        }
    }

    pub fn from_config(storage: Storage, config: &Config) -> AppResult<Self> {
        Ok(Self {
            storage: Arc::new(storage),
            keys: TokenKeys::new(config.jwt_secret.as_bytes(), config.token_ttl_secs),
            expose_errors: config.is_development(),
            cors_origins: config.cors_header_values()?,
        })
    }
}

/// `Json` whose rejection is an [`AppError`], so malformed bodies get the
/// same `{message}` shape as every other error.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct AppJson<T>(pub T);

impl<T: Serialize> IntoResponse for AppJson<T> {
    fn into_response(self) -> Response {
        Json(self.0).into_response()
    }
}

/// `Query` with an [`AppError`] rejection.
#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct AppQuery<T>(pub T);

#[derive(OpenApi)]
#[openapi(
    paths(
        customers::list_customers,
        customers::count_customers,
        customers::get_customer,
        customers::create_customer,
        customers::update_customer,
        customers::delete_customer,
        jobs::list_jobs,
        jobs::get_job,
        jobs::create_job,
        jobs::update_job,
        jobs::move_job,
        jobs::delete_job,
        pipelines::list_pipelines,
        pipelines::get_pipeline,
        pipelines::create_pipeline,
        pipelines::update_pipeline,
        pipelines::delete_pipeline,
        pipelines::get_board,
        users::login,
        users::list_users,
        users::get_user,
        users::create_user,
        users::update_user,
        users::delete_user,
        dashboard::get_metrics,
        dashboard::get_revenue,
        health,
    ),
    components(schemas(
        crate::models::Customer,
        crate::models::NewCustomer,
        crate::models::CustomerPatch,
        crate::models::CustomerStatus,
        crate::models::ContactMethod,
        crate::models::Job,
        crate::models::NewJob,
        crate::models::JobPatch,
        crate::models::JobStatus,
        crate::models::MoveJobRequest,
        crate::models::Pipeline,
        crate::models::NewPipeline,
        crate::models::PipelinePatch,
        crate::models::Role,
        crate::models::UserProfile,
        crate::models::NewUser,
        crate::models::UserPatch,
        crate::models::LoginRequest,
        crate::models::LoginResponse,
        crate::models::CountResponse,
        crate::models::MessageResponse,
        crate::board::PipelineBoard,
        crate::board::BoardColumn,
        crate::query::DashboardMetrics,
        crate::query::StatusCount,
        crate::query::MonthlyRevenue,
        crate::query::RevenueResponse,
        ErrorBody,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "customers"),
        (name = "jobs"),
        (name = "pipelines"),
        (name = "users"),
        (name = "dashboard"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Create the Axum router with every endpoint and the cross-cutting layers.
pub fn create_router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route(
            "/api/customers",
            get(customers::list_customers).post(customers::create_customer),
        )
        .route("/api/customers/count", get(customers::count_customers))
        .route(
            "/api/customers/:id",
            get(customers::get_customer)
                .put(customers::update_customer)
                .delete(customers::delete_customer),
        )
        .route("/api/jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route(
            "/api/jobs/:id",
            get(jobs::get_job).put(jobs::update_job).delete(jobs::delete_job),
        )
        .route("/api/jobs/:id/move", post(jobs::move_job))
        .route(
            "/api/pipelines",
            get(pipelines::list_pipelines).post(pipelines::create_pipeline),
        )
        .route(
            "/api/pipelines/:id",
            get(pipelines::get_pipeline)
                .put(pipelines::update_pipeline)
                .delete(pipelines::delete_pipeline),
        )
        .route("/api/pipelines/:id/board", get(pipelines::get_board))
        .route("/api/users", get(users::list_users).post(users::create_user))
        .route(
            "/api/users/:id",
            get(users::get_user)
                .put(users::update_user)
                .delete(users::delete_user),
        )
        .route("/api/dashboard/metrics", get(dashboard::get_metrics))
        .route("/api/dashboard/revenue", get(dashboard::get_revenue))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(state.cors_origins.clone()))
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/api/users/login", post(users::login))
        .route("/api/health", get(health))
        .route("/api-docs/openapi.json", get(openapi_json))
        .merge(protected)
        .fallback(handle_404)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            expose_error_detail,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/api/health",
    responses((status = 200, body = MessageResponse))
)]
pub async fn health() -> Json<MessageResponse> {
    Json(MessageResponse::new("ok"))
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

async fn handle_404() -> AppError {
    AppError::NotFound("Route not found".to_string())
}

fn handle_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    AppError::Internal(format!("handler panicked: {}", detail)).into_response()
}

/// Adds `{"error": detail}` to error bodies when the state allows it.
async fn expose_error_detail(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let response = next.run(req).await;
    if !state.expose_errors {
        return response;
    }
    let Some(ErrorDetail(detail)) = response.extensions().get::<ErrorDetail>().cloned() else {
        return response;
    };

    let (parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, ERROR_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "could not buffer error body");
            return Response::from_parts(parts, Body::empty());
        }
    };
    let mut payload: ErrorBody = match serde_json::from_slice(&bytes) {
        Ok(payload) => payload,
        Err(_) => return Response::from_parts(parts, Body::from(bytes)),
    };
    payload.error = Some(detail);
    match serde_json::to_vec(&payload) {
        Ok(body) => Response::from_parts(parts, Body::from(body)),
        Err(_) => Response::from_parts(parts, Body::from(bytes)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::http::{Request as HttpRequest, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::controller;
    use crate::models::{Role, User};

    pub(crate) struct TestApp {
        pub router: Router,
        pub state: Arc<AppState>,
        pub admin_token: String,
    }

    impl TestApp {
        pub fn new() -> Self {
            Self::with_expose(false)
        }

        pub fn with_expose(expose_errors: bool) -> Self {
            let storage = Storage::temporary().unwrap();
            controller::bootstrap_admin(&storage, "admin@example.com", "password1").unwrap();
            let mut state = AppState::new(storage, TokenKeys::new(b"router-tests", 600));
            state.expose_errors = expose_errors;
            state.cors_origins = vec![HeaderValue::from_static("http://localhost:5173")];
            let state = Arc::new(state);

            let admin: User = state
                .storage
                .find_unique("admin@example.com")
                .unwrap()
                .unwrap();
            let admin_token = state.keys.create_jwt(&admin).unwrap();
            Self {
                router: create_router(Arc::clone(&state)),
                state,
                admin_token,
            }
        }

        /// Token for a fresh non-admin user.
        pub fn user_token(&self) -> (uuid::Uuid, String) {
            let profile = controller::create_user(
                &self.state.storage,
                crate::models::NewUser {
                    name: "Regular".into(),
                    email: format!("user-{}@example.com", uuid::Uuid::new_v4()),
                    password: "password1".into(),
                    role: Some(Role::User),
                },
            )
            .unwrap();
            let user: User = self.state.storage.fetch(profile.id).unwrap();
            (profile.id, self.state.keys.create_jwt(&user).unwrap())
        }

        pub async fn call(
            &self,
            method: &str,
            uri: &str,
            token: Option<&str>,
            body: Option<Value>,
        ) -> (StatusCode, Value) {
            let mut builder = HttpRequest::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("Authorization", format!("Bearer {}", token));
            }
            let request = match body {
                Some(body) => builder
                    .header("Content-Type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
                None => builder.body(Body::empty()).unwrap(),
            };
            let response = self.router.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap_or(Value::Null)
            };
            (status, value)
        }

        pub async fn admin(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let token = self.admin_token.clone();
            self.call(method, uri, Some(&token), body).await
        }
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let app = TestApp::new();
        let (status, body) = app.call("GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "ok");
    }

    #[tokio::test]
    async fn test_protected_routes_need_token() {
        let app = TestApp::new();
        let (status, body) = app.call("GET", "/api/jobs", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Missing bearer token");

        let (status, _) = app.call("GET", "/api/jobs", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_unknown_route_is_json_404() {
        let app = TestApp::new();
        let (status, body) = app.call("GET", "/api/nope", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["message"], "Route not found");
    }

    #[tokio::test]
    async fn test_malformed_json_is_400_with_message() {
        let app = TestApp::new();
        let request = HttpRequest::builder()
            .method("POST")
            .uri("/api/customers")
            .header("Authorization", format!("Bearer {}", app.admin_token))
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["message"].as_str().unwrap().starts_with("Invalid JSON"));
    }

    #[tokio::test]
    async fn test_error_detail_only_in_development() {
        let app = TestApp::new();
        let (_, body) = app
            .admin("GET", "/api/jobs?sort=shoeSize", None)
            .await;
        assert!(body.get("error").is_none());

        let app = TestApp::with_expose(true);
        let (status, body) = app
            .admin("GET", "/api/jobs?sort=shoeSize", None)
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("shoeSize"));
    }

    #[tokio::test]
    async fn test_openapi_document_lists_routes() {
        let app = TestApp::new();
        let (status, body) = app.call("GET", "/api-docs/openapi.json", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/jobs/{id}/move"].is_object());
        assert!(body["components"]["securitySchemes"]["bearer"].is_object());
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_configured_origin() {
        let app = TestApp::new();
        let request = HttpRequest::builder()
            .method("OPTIONS")
            .uri("/api/jobs")
            .header("Origin", "http://localhost:5173")
            .header("Access-Control-Request-Method", "GET")
            .body(Body::empty())
            .unwrap();
        let response = app.router.clone().oneshot(request).await.unwrap();
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "http://localhost:5173"
        );
    }

    #[tokio::test]
    async fn test_customer_count_over_http() {
        let app = TestApp::new();
        for email in ["a@example.com", "b@example.com", "c@example.com"] {
            let (status, _) = app
                .admin(
                    "POST",
                    "/api/customers",
                    Some(json!({"firstName": "F", "lastName": "L", "email": email})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }
        let (status, body) = app.admin("GET", "/api/customers/count", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
    }
}
