use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};

use super::record_action;
use crate::{
    AppState,
    auth::{AuthUser, issue_token},
    error::{ApiError, ApiResult, RepoError},
    extract::AppJson,
    models::{LogAction, LoginRequest, LoginResponse, NewLogEntry, NewUser, RegisterRequest, Role, User},
    validation::{Credentials, username_from_email, validate_credentials, validate_username},
};

/// Forwards the credentials to the Authenticator API exactly once.
async fn verify_upstream(state: &AppState, credentials: &Credentials) -> ApiResult<()> {
    match state
        .authenticator
        .verify_credentials(&credentials.email, &credentials.password)
        .await
    {
        Ok(true) => Ok(()),
        Ok(false) => Err(ApiError::Unauthenticated(
            "Invalid email or password".to_string(),
        )),
        Err(e) => {
            tracing::error!("Authenticator API call failed: {}", e);
            Err(ApiError::UpstreamAuth(
                "Authentication service is unavailable".to_string(),
            ))
        }
    }
}

fn token_response(state: &AppState, user: User) -> ApiResult<LoginResponse> {
    Ok(LoginResponse {
        access_token: issue_token(&state.config, &user)?,
        token_type: "bearer".to_string(),
        expires_in: state.config.token_ttl_secs(),
        user,
    })
}

/// Inserts the user, or returns the row a concurrent request created first.
async fn create_or_fetch(state: &AppState, new_user: &NewUser) -> ApiResult<User> {
    match state.repo.create_user(new_user).await {
        Ok(user) => Ok(user),
        Err(RepoError::Conflict(_)) => state
            .repo
            .get_user_by_email(&new_user.email)
            .await?
            .ok_or_else(|| ApiError::Internal("User row vanished after conflict".to_string())),
        Err(e) => Err(e.into()),
    }
}

/// login
///
/// [Public Route] `POST /api/v1/auth/login`.
///
/// 1. Credentials are verified by the external Authenticator API (401 / 502).
/// 2. The local user row is fetched or created with role `user`.
/// 3. `LastLogin` is stamped and a session token is issued.
pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let credentials = validate_credentials(payload.email, payload.password)?;
    verify_upstream(&state, &credentials).await?;

    let user = match state.repo.get_user_by_email(&credentials.email).await? {
        Some(user) => user,
        None => {
            let new_user = NewUser {
                username: username_from_email(&credentials.email),
                email: credentials.email.clone(),
                role: Role::User,
            };
            let user = create_or_fetch(&state, &new_user).await?;
            tracing::info!(user_id = user.user_id, "Created user on first login");
            user
        }
    };

    state.repo.touch_last_login(user.user_id).await?;
    let user = state.repo.get_user(user.user_id).await?.unwrap_or(user);

    record_action(
        &state,
        NewLogEntry {
            trail_id: None,
            user_id: user.user_id,
            action: LogAction::Login,
            details: format!("User {} logged in", user.email),
        },
    )
    .await;

    Ok(Json(token_response(&state, user)?))
}

/// register
///
/// [Public Route] `POST /api/v1/auth/register`. The account must exist at the
/// Authenticator API; an already-registered e-mail is a conflict.
pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<LoginResponse>)> {
    let credentials = validate_credentials(payload.email, payload.password)?;
    let username = validate_username(payload.username)?;
    verify_upstream(&state, &credentials).await?;

    if state
        .repo
        .get_user_by_email(&credentials.email)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("User already exists".to_string()));
    }

    let user = state
        .repo
        .create_user(&NewUser {
            username: username.unwrap_or_else(|| username_from_email(&credentials.email)),
            email: credentials.email,
            role: Role::User,
        })
        .await?;
    tracing::info!(user_id = user.user_id, "Registered user");

    Ok((StatusCode::CREATED, Json(token_response(&state, user)?)))
}

/// verify
///
/// [Authenticated Route] Confirms the presented token and returns its user.
pub async fn verify(auth_user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let user = state
        .repo
        .get_user(auth_user.id)
        .await?
        .ok_or_else(|| ApiError::InvalidToken("Token user no longer exists".to_string()))?;
    Ok(Json(json!({ "valid": true, "user": user })))
}

/// logout
///
/// [Authenticated Route] Tokens are stateless; the client discards its token.
pub async fn logout(AuthUser { id, .. }: AuthUser) -> Json<Value> {
    Json(json!({
        "message": "Logged out. Discard the access token on the client.",
        "user_id": id,
    }))
}
