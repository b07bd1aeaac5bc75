use axum::{Json, extract::State, http::StatusCode};

use super::record_action;
use crate::{
    AppState,
    auth::AuthUser,
    error::{ApiError, ApiResult},
    extract::{AppJson, AppPath, AppQuery},
    models::{
        City, CityListParams, Country, Location, LocationFields, LocationListParams,
        LocationRequest, LogAction, NameParams, NewLogEntry,
    },
    validation::{location_filter, validate_location},
};

/// Checks city/country references. A city without a country inherits the city's country.
async fn resolve_geography(state: &AppState, mut fields: LocationFields) -> ApiResult<LocationFields> {
    if let Some(city_id) = fields.city_id {
        let city = state
            .repo
            .get_city(city_id)
            .await?
            .ok_or_else(|| ApiError::field("city_id", format!("City {city_id} does not exist")))?;
        match fields.country_id {
            Some(country_id) if country_id != city.country_id => {
                return Err(ApiError::field(
                    "city_id",
                    format!("City {city_id} is not in country {country_id}"),
                ));
            }
            Some(_) => {}
            None => fields.country_id = Some(city.country_id),
        }
    }

    if let Some(country_id) = fields.country_id
        && state.repo.get_country(country_id).await?.is_none()
    {
        return Err(ApiError::field(
            "country_id",
            format!("Country {country_id} does not exist"),
        ));
    }

    Ok(fields)
}

/// list_locations
///
/// [Public Route] Filter by `city_id`, `country_id` or a name fragment.
pub async fn list_locations(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<LocationListParams>,
) -> ApiResult<Json<Vec<Location>>> {
    let filter = location_filter(params)?;
    Ok(Json(state.repo.list_locations(&filter).await?))
}

pub async fn get_location(
    State(state): State<AppState>,
    AppPath(location_id): AppPath<i32>,
) -> ApiResult<Json<Location>> {
    state
        .repo
        .get_location(location_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("Location {location_id} not found")))
}

/// create_location
///
/// [Admin Route] Location names are unique; a duplicate is a 409.
pub async fn create_location(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<LocationRequest>,
) -> ApiResult<(StatusCode, Json<Location>)> {
    auth_user.require_admin()?;
    let fields = resolve_geography(&state, validate_location(payload)?).await?;

    let location = state.repo.create_location(&fields).await?;

    record_action(
        &state,
        NewLogEntry {
            trail_id: None,
            user_id: auth_user.id,
            action: LogAction::CreateLocation,
            details: format!("Created location: {}", location.location_name),
        },
    )
    .await;

    Ok((StatusCode::CREATED, Json(location)))
}

/// update_location
///
/// [Admin Route] Full replacement of the location's fields.
pub async fn update_location(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(location_id): AppPath<i32>,
    AppJson(payload): AppJson<LocationRequest>,
) -> ApiResult<Json<Location>> {
    auth_user.require_admin()?;
    let fields = resolve_geography(&state, validate_location(payload)?).await?;

    let location = state
        .repo
        .update_location(location_id, &fields)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Location {location_id} not found")))?;

    record_action(
        &state,
        NewLogEntry {
            trail_id: None,
            user_id: auth_user.id,
            action: LogAction::UpdateLocation,
            details: format!("Updated location {location_id}: {}", location.location_name),
        },
    )
    .await;

    Ok(Json(location))
}

/// delete_location
///
/// [Admin Route] Refused with 409 while trails still reference the location.
pub async fn delete_location(
    auth_user: AuthUser,
    State(state): State<AppState>,
    AppPath(location_id): AppPath<i32>,
) -> ApiResult<StatusCode> {
    auth_user.require_admin()?;

    if !state.repo.delete_location(location_id).await? {
        return Err(ApiError::not_found(format!("Location {location_id} not found")));
    }

    record_action(
        &state,
        NewLogEntry {
            trail_id: None,
            user_id: auth_user.id,
            action: LogAction::DeleteLocation,
            details: format!("Deleted location {location_id}"),
        },
    )
    .await;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_countries(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<NameParams>,
) -> ApiResult<Json<Vec<Country>>> {
    let name = params.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    Ok(Json(state.repo.list_countries(name).await?))
}

/// list_country_cities
///
/// [Public Route] Cities of one country; 404 for an unknown country.
pub async fn list_country_cities(
    State(state): State<AppState>,
    AppPath(country_id): AppPath<i32>,
    AppQuery(params): AppQuery<NameParams>,
) -> ApiResult<Json<Vec<City>>> {
    cities_in(&state, Some(country_id), params.name.as_deref()).await
}

/// list_cities
///
/// [Public Route] `GET /api/v1/cities?country_id=`. Without `country_id` all cities are listed.
pub async fn list_cities(
    State(state): State<AppState>,
    AppQuery(params): AppQuery<CityListParams>,
) -> ApiResult<Json<Vec<City>>> {
    cities_in(&state, params.country_id, params.name.as_deref()).await
}

async fn cities_in(state: &AppState, country_id: Option<i32>, name: Option<&str>) -> ApiResult<Json<Vec<City>>> {
    if let Some(country_id) = country_id
        && state.repo.get_country(country_id).await?.is_none()
    {
        return Err(ApiError::not_found(format!("Country {country_id} not found")));
    }
    let name = name.map(str::trim).filter(|n| !n.is_empty());
    Ok(Json(state.repo.list_cities(country_id, name).await?))
}
