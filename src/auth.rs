use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use bcrypt::{hash, verify, DEFAULT_COST};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use std::sync::Arc;

use crate::error::AppError;
use crate::models::{AuthPayload, User};
use crate::rest::AppState;

pub fn hash_password(password: &str) -> Result<String, bcrypt::BcryptError> {
    hash(password, DEFAULT_COST)
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, bcrypt::BcryptError> {
    verify(password, hash)
}

/// HS256 signing material plus token lifetime.
#[derive(Clone)]
pub struct TokenKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: u64,
}

impl TokenKeys {
    pub fn new(secret: &[u8], ttl_secs: u64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs,
        }
    }

    pub fn create_jwt(&self, user: &User) -> Result<String, jsonwebtoken::errors::Error> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();

        let claims = AuthPayload {
            sub: user.id.to_string(),
            role: user.role,
            iat: now as usize,
            exp: (now + self.ttl_secs) as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
    }

    pub fn validate_jwt(&self, token: &str) -> Result<AuthPayload, jsonwebtoken::errors::Error> {
        let token_data = decode::<AuthPayload>(
            token,
            &self.decoding,
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(token_data.claims)
    }
}

/// Requires `Authorization: Bearer <jwt>` for an account that still exists
/// and makes the claims, carrying the stored role, available to handlers as
/// an `Extension<AuthPayload>`.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Unauthorized("Malformed authorization header".to_string()))?;

    let mut claims = state.keys.validate_jwt(token.trim()).map_err(|err| {
        tracing::debug!(error = %err, "rejected bearer token");
        AppError::Unauthorized("Invalid or expired token".to_string())
    })?;

    // The stored account is authoritative: deleted users lose access and
    // role changes apply to tokens issued before them.
    let user: User = claims
        .user_id()
        .map(|id| state.storage.get::<User>(id))
        .transpose()?
        .flatten()
        .ok_or_else(|| AppError::Unauthorized("Account no longer exists".to_string()))?;
    claims.role = user.role;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Fails with `Forbidden` unless the caller is an admin.
pub fn require_admin(claims: &AuthPayload) -> Result<(), AppError> {
    if claims.is_admin() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Admin role required".to_string()))
    }
}
