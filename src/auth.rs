use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, Env},
    error::{ApiError, ApiResult},
    models::{Role, User},
    repository::RepositoryState,
};

/// Header accepted in `Env::Local` to act as an existing user without a token.
pub const DEV_USER_HEADER: &str = "x-user-id";

/// Claims
///
/// Payload of the session token issued after a successful login. Signed with
/// HS256 using `AppConfig::jwt_secret`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's e-mail address.
    pub sub: String,
    /// Primary key of the user row; used for the per-request lookup.
    pub user_id: i32,
    pub email: String,
    /// Expiration Time (exp): tokens are rejected after this instant.
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
}

/// AuthUser Extractor Result
///
/// The resolved identity of an authenticated request. The role is read from the
/// Users table on every request, so a role change applies immediately.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Owners manage their own trails; admins manage all of them.
    pub fn can_manage(&self, owner_id: i32) -> bool {
        self.id == owner_id || self.is_admin()
    }

    pub fn require_admin(&self) -> ApiResult<()> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ApiError::forbidden("Administrator role required"))
        }
    }
}

impl From<User> for AuthUser {
    fn from(user: User) -> Self {
        Self {
            id: user.user_id,
            email: user.email,
            role: user.role,
        }
    }
}

/// issue_token
///
/// Signs a session token for `user`, valid for `config.token_ttl_hours`.
pub fn issue_token(config: &AppConfig, user: &User) -> ApiResult<String> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user.email.clone(),
        user_id: user.user_id,
        email: user.email.clone(),
        iat: now as usize,
        exp: (now + config.token_ttl_secs()) as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.jwt_secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!("Failed to sign session token: {}", e);
        ApiError::Internal("Could not issue token".to_string())
    })
}

/// decode_token
///
/// Verifies signature and expiry. Every failure is `ApiError::InvalidToken`.
pub fn decode_token(config: &AppConfig, token: &str) -> ApiResult<Claims> {
    let decoding_key = DecodingKey::from_secret(config.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = true;

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => ApiError::InvalidToken("Token has expired".to_string()),
            _ => ApiError::InvalidToken("Token is invalid".to_string()),
        })
}

fn has_credentials(parts: &Parts, config: &AppConfig) -> bool {
    parts.headers.contains_key(header::AUTHORIZATION)
        || (config.env == Env::Local && parts.headers.contains_key(DEV_USER_HEADER))
}

/// resolve_identity
///
/// 1. Reuses an identity already resolved earlier in the pipeline (auth middleware).
/// 2. Local bypass via `x-user-id` (Env::Local only, user must exist).
/// 3. Bearer token extraction and validation.
/// 4. User lookup, so deleted users are refused even with a live token.
async fn resolve_identity(parts: &mut Parts, repo: &RepositoryState, config: &AppConfig) -> ApiResult<AuthUser> {
    if let Some(user) = parts.extensions.get::<AuthUser>() {
        return Ok(user.clone());
    }

    if config.env == Env::Local
        && let Some(user_id) = parts
            .headers
            .get(DEV_USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| raw.trim().parse::<i32>().ok())
        && let Some(user) = repo.get_user(user_id).await?
    {
        return Ok(user.into());
    }
    // Production, or the bypass header was absent/unknown: fall through to the token flow.

    let auth_header = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthenticated("Missing Authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| {
            ApiError::Unauthenticated("Authorization header must use the Bearer scheme".to_string())
        })?;

    let claims = decode_token(config, token)?;

    let user = repo
        .get_user(claims.user_id)
        .await?
        .ok_or_else(|| ApiError::InvalidToken("Token user no longer exists".to_string()))?;

    Ok(user.into())
}

/// AuthUser Extractor Implementation
///
/// Rejects with `Unauthenticated` (no/malformed header) or `InvalidToken`
/// (bad signature, expired, unknown user). Both render as 401.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let repo = RepositoryState::from_ref(state);
        let config = AppConfig::from_ref(state);

        let user = resolve_identity(parts, &repo, &config).await?;
        parts.extensions.insert(user.clone());
        Ok(user)
    }
}

/// MaybeAuthUser
///
/// Optional identity for public endpoints. A missing or rejected token means
/// anonymous; data-access failures are still reported.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

impl<S> FromRequestParts<S> for MaybeAuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    AppConfig: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = AppConfig::from_ref(state);
        if !has_credentials(parts, &config) {
            return Ok(MaybeAuthUser(None));
        }

        match AuthUser::from_request_parts(parts, state).await {
            Ok(user) => Ok(MaybeAuthUser(Some(user))),
            Err(ApiError::Unauthenticated(reason) | ApiError::InvalidToken(reason)) => {
                tracing::debug!("Treating request as anonymous: {}", reason);
                Ok(MaybeAuthUser(None))
            }
            Err(other) => Err(other),
        }
    }
}
