use axum::{Json, extract::State, http::StatusCode};

use super::record_action;
use crate::{
    AppState,
    auth::{AuthUser, MaybeAuthUser},
    error::{ApiError, ApiResult},
    extract::{AppJson, AppPath, AppQuery},
    models::{
        CreateTrailRequest, LogAction, NewLogEntry, Trail, TrailDetail, TrailListParams, TrailPage,
        TrailPoint, TrailPointRequest, UpdateTrailRequest,
    },
    validation::{merge_trail_update, trail_filter, validate_new_trail, validate_point},
};

/// Loads a trail the caller may see. Private trails are reported as missing
/// to everyone but their owner and admins.
async fn visible_trail(state: &AppState, viewer: Option<&AuthUser>, trail_id: i32) -> ApiResult<Trail> {
    let trail = state
        .repo
        .get_trail(trail_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Trail {trail_id} not found")))?;

    if trail.is_public || viewer.is_some_and(|user| user.can_manage(trail.user_id)) {
        Ok(trail)
    } else {
        Err(ApiError::not_found(format!("Trail {trail_id} not found")))
    }
}

/// Loads a trail the caller may modify: 404 when absent, 403 when not owner/admin.
async fn managed_trail(state: &AppState, user: &AuthUser, trail_id: i32) -> ApiResult<Trail> {
    let trail = state
        .repo
        .get_trail(trail_id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Trail {trail_id} not found")))?;

    if user.can_manage(trail.user_id) {
        Ok(trail)
    } else {
        Err(ApiError::forbidden(
            "Only the trail owner or an administrator may modify this trail",
        ))
    }
}

/// Unknown feature ids are a field error rather than a constraint failure.
async fn check_features(state: &AppState, feature_ids: &[i32]) -> ApiResult<()> {
    if feature_ids.is_empty() {
        return Ok(());
    }
    let known = state.repo.list_features().await?;
    let unknown: Vec<String> = feature_ids
        .iter()
        .filter(|id| !known.iter().any(|f| f.feature_id == **id))
        .map(|id| id.to_string())
        .collect();
    if unknown.is_empty() {
        Ok(())
    } else {
        Err(ApiError::field(
            "feature_ids",
            format!("Unknown feature ids: {}", unknown.join(", ")),
        ))
    }
}

/// list_trails
///
/// [Public Route] Paginated listing. Anonymous callers see public trails; an
/// authenticated caller additionally sees their own private trails.
pub async fn list_trails(
    MaybeAuthUser(viewer): MaybeAuthUser,
    State(state): State<AppState>,
    AppQuery(params): AppQuery<TrailListParams>,
) -> ApiResult<Json<TrailPage>> {
    let filter = trail_filter(params, viewer.as_ref().map(|user| user.id))?;

    let trails = state.repo.list_trails(&filter).await?;
    let total = state.repo.count_trails(&filter).await?;

    Ok(Json(TrailPage {
        has_more: filter.offset + (trails.len() as i64) < total,
        trails,
        total,
        limit: filter.limit,
        offset: filter.offset,
        authenticated: viewer.is_some(),
    }))
}

/// get_trail
///
/// [Public Route] Trail detail with its location, ordered points, features
/// and review summary.
pub async fn get_trail(
    MaybeAuthUser(viewer): MaybeAuthUser,
    State(state): State<AppState>,
    AppPath(trail_id): AppPath<i32>,
) -> ApiResult<Json<TrailDetail>> {
    let trail = visible_trail(&state, viewer.as_ref(), trail_id).await?;

    let location = match trail.location_id {
        Some(location_id) => state.repo.get_location(location_id).await?,
        None => None,
    };
    let points = state.repo.list_trail_points(trail_id).await?;
    let features = state.repo.list_trail_features(trail_id).await?;
    let reviews = state.repo.trail_review_summary(trail_id).await?;

    Ok(Json(TrailDetail {
        trail,
        location,
        points,
        features,
        reviews,
    }))
}

/// create_trail
///
/// [Authenticated Route] The caller becomes the owner regardless of any
/// `user_id` in the body. Returns 201 with the stored trail.
pub async fn create_trail(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateTrailRequest>,
) -> ApiResult<(StatusCode, Json<Trail>)> {
    if let Some(claimed) = payload.user_id
        && claimed != auth_user.id
    {
        tracing::warn!(
            caller = auth_user.id,
            claimed,
            "Ignoring user_id in trail body; owner is the caller"
        );
    }

    let new_trail = validate_new_trail(payload)?;
    check_features(&state, &new_trail.feature_ids).await?;
    let trail = state.repo.create_trail(auth_user.id, &new_trail).await?;
    tracing::info!(trail_id = trail.trail_id, owner = auth_user.id, "Trail created");

    record_action(
        &state,
        NewLogEntry {
            trail_id: Some(trail.trail_id),
            user_id: auth_user.id,
            action: LogAction::Create,
            details: format!("Created trail: {}", trail.trail_name),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(trail)))
}

/// update_trail
///
/// [Authenticated Route] Partial update: supplied fields are merged onto the
/// stored trail and the merged result is validated as a whole. A supplied
/// `feature_ids` replaces the trail's features.
pub async fn update_trail(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(trail_id): AppPath<i32>,
    AppJson(payload): AppJson<UpdateTrailRequest>,
) -> ApiResult<Json<Trail>> {
    let existing = managed_trail(&state, &auth_user, trail_id).await?;
    let update = merge_trail_update(&existing, payload)?;
    if let Some(feature_ids) = &update.feature_ids {
        check_features(&state, feature_ids).await?;
    }

    let trail = state
        .repo
        .update_trail(trail_id, auth_user.id, &update)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Trail {trail_id} not found")))?;

    record_action(
        &state,
        NewLogEntry {
            trail_id: Some(trail_id),
            user_id: auth_user.id,
            action: LogAction::Update,
            details: format!("Updated trail: {}", trail.trail_name),
        },
    )
    .await;

    Ok(Json(trail))
}

/// delete_trail
///
/// [Authenticated Route] Owner or admin only. Points, feature tags and reviews
/// are removed with the trail.
pub async fn delete_trail(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(trail_id): AppPath<i32>,
) -> ApiResult<StatusCode> {
    let existing = managed_trail(&state, &auth_user, trail_id).await?;

    if !state.repo.delete_trail(trail_id).await? {
        return Err(ApiError::not_found(format!("Trail {trail_id} not found")));
    }
    tracing::info!(trail_id, by = auth_user.id, "Trail deleted");

    record_action(
        &state,
        NewLogEntry {
            trail_id: Some(trail_id),
            user_id: auth_user.id,
            action: LogAction::Delete,
            details: format!("Deleted trail: {}", existing.trail_name),
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

/// list_trail_points
///
/// [Public Route] Points in order, under the same visibility rule as the trail.
pub async fn list_trail_points(
    MaybeAuthUser(viewer): MaybeAuthUser,
    State(state): State<AppState>,
    AppPath(trail_id): AppPath<i32>,
) -> ApiResult<Json<Vec<TrailPoint>>> {
    visible_trail(&state, viewer.as_ref(), trail_id).await?;
    Ok(Json(state.repo.list_trail_points(trail_id).await?))
}

/// add_trail_point
///
/// [Authenticated Route] Appends a waypoint after the current last one.
pub async fn add_trail_point(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(trail_id): AppPath<i32>,
    AppJson(payload): AppJson<TrailPointRequest>,
) -> ApiResult<(StatusCode, Json<TrailPoint>)> {
    managed_trail(&state, &auth_user, trail_id).await?;
    let point = validate_point(payload)?;

    let point = state.repo.add_trail_point(trail_id, &point).await?;

    record_action(
        &state,
        NewLogEntry {
            trail_id: Some(trail_id),
            user_id: auth_user.id,
            action: LogAction::AddPoint,
            details: format!("Added point {} to trail {}", point.point_order, trail_id),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(point)))
}
