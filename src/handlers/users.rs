use axum::{Json, extract::State};

use super::record_action;
use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    extract::{AppJson, AppPath, AppQuery},
    models::{
        LogAction, NewLogEntry, RoleUpdateRequest, Trail, User, UserList, UserListParams,
        UserProfile, UserTrailsParams,
    },
    validation::{parse_role, user_filter},
};

const OWN_PROFILE_ACTIVITY: i64 = 10;
const ADMIN_VIEW_ACTIVITY: i64 = 5;

async fn profile(state: &AppState, user: User, activity: i64) -> ApiResult<UserProfile> {
    let stats = state.repo.user_trail_stats(user.user_id).await?;
    let recent_activity = state.repo.recent_activity(user.user_id, activity).await?;
    Ok(UserProfile {
        user,
        stats,
        recent_activity,
    })
}

async fn existing_user(state: &AppState, user_id: i32) -> ApiResult<User> {
    state
        .repo
        .get_user(user_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User {user_id} not found")))
}

/// me
///
/// [Authenticated Route] The caller's profile, trail statistics and recent activity.
pub async fn me(auth_user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<UserProfile>> {
    let user = existing_user(&state, auth_user.id).await?;
    Ok(Json(profile(&state, user, OWN_PROFILE_ACTIVITY).await?))
}

/// list_users
///
/// [Admin Route] Filter by role or a username/e-mail fragment; ordered by id.
pub async fn list_users(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<UserListParams>,
) -> ApiResult<Json<UserList>> {
    auth_user.require_admin()?;
    let filter = user_filter(params)?;
    let users = state.repo.list_users(&filter).await?;
    Ok(Json(UserList {
        users,
        limit: filter.limit,
        offset: filter.offset,
    }))
}

pub async fn get_user(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i32>,
) -> ApiResult<Json<UserProfile>> {
    auth_user.require_admin()?;
    let user = existing_user(&state, user_id).await?;
    Ok(Json(profile(&state, user, ADMIN_VIEW_ACTIVITY).await?))
}

/// update_user_role
///
/// [Admin Route] Sets a user's role. Admins cannot change their own role.
pub async fn update_user_role(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i32>,
    AppJson(payload): AppJson<RoleUpdateRequest>,
) -> ApiResult<Json<User>> {
    auth_user.require_admin()?;
    let role = parse_role(payload.role)?;

    if user_id == auth_user.id {
        return Err(ApiError::BadRequest(
            "Administrators cannot change their own role".to_string(),
        ));
    }

    let previous = existing_user(&state, user_id).await?;
    let user = state
        .repo
        .set_user_role(user_id, role)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("User {user_id} not found")))?;
    tracing::info!(user_id, by = auth_user.id, from = %previous.role, to = %role, "User role changed");

    record_action(
        &state,
        NewLogEntry {
            trail_id: None,
            user_id: auth_user.id,
            action: LogAction::UpdateUserRole,
            details: format!(
                "Changed role of user {} ({}) from {} to {}",
                user_id, user.email, previous.role, role
            ),
        },
    )
    .await;

    Ok(Json(user))
}

/// list_user_trails
///
/// [Admin Route] Trails owned by a user; private ones only with `include_private=true`.
pub async fn list_user_trails(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(user_id): AppPath<i32>,
    AppQuery(params): AppQuery<UserTrailsParams>,
) -> ApiResult<Json<Vec<Trail>>> {
    auth_user.require_admin()?;
    existing_user(&state, user_id).await?;

    let include_private = params.include_private.unwrap_or(false);
    Ok(Json(
        state
            .repo
            .list_user_trails(user_id, include_private)
            .await?,
    ))
}
