use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};

use crate::auth::require_admin;
use crate::controller::{self, parse_id};
use crate::error::{AppError, AppResult};
use crate::models::{
    AuthPayload, LoginRequest, LoginResponse, MessageResponse, NewUser, User, UserPatch,
    UserProfile,
};
use crate::rest::{AppJson, AppQuery, AppState};
use crate::storage::ListQuery;

/// Runs password hashing or verification off the async workers.
async fn blocking<T, F>(state: &Arc<AppState>, work: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&AppState) -> AppResult<T> + Send + 'static,
{
    let state = Arc::clone(state);
    tokio::task::spawn_blocking(move || work(&state))
        .await
        .map_err(|e| AppError::Internal(format!("password task failed: {}", e)))?
}

#[utoipa::path(
    post,
    path = "/api/users/login",
    request_body = LoginRequest,
    responses(
        (status = 200, body = LoginResponse),
        (status = 401, body = crate::error::ErrorBody)
    ),
    tag = "users"
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(request): AppJson<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let session = blocking(&state, move |state| {
        controller::login(&state.storage, &state.keys, request)
    })
    .await?;
    Ok(Json(session))
}

#[utoipa::path(
    get,
    path = "/api/users",
    params(ListQuery),
    responses((status = 200, body = [UserProfile])),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ListQuery>,
) -> AppResult<Json<Vec<UserProfile>>> {
    let users: Vec<User> = state.storage.list(&query)?;
    Ok(Json(users.iter().map(UserProfile::from).collect()))
}

#[utoipa::path(
    get,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, body = UserProfile),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> AppResult<Json<UserProfile>> {
    let id = parse_id::<User>(&id)?;
    let user: User = state.storage.fetch(id)?;
    Ok(Json(UserProfile::from(&user)))
}

#[utoipa::path(
    post,
    path = "/api/users",
    request_body = NewUser,
    responses(
        (status = 201, body = UserProfile),
        (status = 403, body = crate::error::ErrorBody),
        (status = 409, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    AppJson(input): AppJson<NewUser>,
) -> AppResult<(StatusCode, Json<UserProfile>)> {
    require_admin(&claims)?;
    let profile = blocking(&state, move |state| {
        controller::create_user(&state.storage, input)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(profile)))
}

/// Admins may update anyone; users only themselves, and never their role.
#[utoipa::path(
    put,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    request_body = UserPatch,
    responses(
        (status = 200, body = UserProfile),
        (status = 403, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
    AppJson(patch): AppJson<UserPatch>,
) -> AppResult<Json<UserProfile>> {
    let id = parse_id::<User>(&id)?;
    let profile = blocking(&state, move |state| {
        controller::update_user(&state.storage, &claims, id, patch)
    })
    .await?;
    Ok(Json(profile))
}

#[utoipa::path(
    delete,
    path = "/api/users/{id}",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, body = MessageResponse),
        (status = 403, body = crate::error::ErrorBody),
        (status = 404, body = crate::error::ErrorBody)
    ),
    security(("bearer" = [])),
    tag = "users"
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<AuthPayload>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageResponse>> {
    require_admin(&claims)?;
    let id = parse_id::<User>(&id)?;
    controller::delete_user(&state.storage, &claims, id)?;
    Ok(Json(MessageResponse::new("User deleted")))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::rest::tests::TestApp;

    #[tokio::test]
    async fn test_login_returns_token_and_profile() {
        let app = TestApp::new();
        let (status, body) = app
            .call(
                "POST",
                "/api/users/login",
                None,
                Some(json!({"email": "ADMIN@example.com", "password": "password1"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["role"], "admin");
        assert!(body["user"].get("passwordHash").is_none());

        let token = body["token"].as_str().unwrap().to_string();
        let (status, _) = app.call("GET", "/api/users", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app
            .call(
                "POST",
                "/api/users/login",
                None,
                Some(json!({"email": "admin@example.com", "password": "nope"})),
            )
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Invalid email or password");
    }

    #[tokio::test]
    async fn test_role_checks() {
        let app = TestApp::new();
        let (user_id, token) = app.user_token();

        let (status, _) = app
            .call(
                "POST",
                "/api/users",
                Some(&token),
                Some(json!({"name": "X", "email": "x@example.com", "password": "password1"})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, me) = app
            .call(
                "PUT",
                &format!("/api/users/{}", user_id),
                Some(&token),
                Some(json!({"name": "Renamed"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["name"], "Renamed");

        let (status, _) = app
            .call(
                "DELETE",
                &format!("/api/users/{}", user_id),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, created) = app
            .admin(
                "POST",
                "/api/users",
                Some(json!({"name": "New", "email": "new@example.com", "password": "password1"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["role"], "user");

        let (status, _) = app
            .admin("DELETE", &format!("/api/users/{}", user_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_tokens_follow_the_stored_account() {
        let app = TestApp::new();
        let (status, second) = app
            .admin(
                "POST",
                "/api/users",
                Some(json!({
                    "name": "Second admin",
                    "email": "second@example.com",
                    "password": "password1",
                    "role": "admin"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        let second_id = second["id"].as_str().unwrap().to_string();

        let (status, session) = app
            .call(
                "POST",
                "/api/users/login",
                None,
                Some(json!({"email": "second@example.com", "password": "password1"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let token = session["token"].as_str().unwrap().to_string();

        let (status, _) = app
            .admin(
                "PUT",
                &format!("/api/users/{}", second_id),
                Some(json!({"role": "user"})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        // Token was issued while still admin
        let (status, _) = app
            .call(
                "POST",
                "/api/users",
                Some(&token),
                Some(json!({
                    "name": "Escalated",
                    "email": "escalated@example.com",
                    "password": "password1",
                    "role": "admin"
                })),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .admin("DELETE", &format!("/api/users/{}", second_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = app.call("GET", "/api/customers", Some(&token), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "Account no longer exists");
    }
}
