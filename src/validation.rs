//! Validation of request payloads and query strings.
//!
//! Every function takes the loosely-typed request shape and returns either a
//! typed, validated value or `ApiError::Validation` carrying one message per
//! offending field.

use crate::{
    error::{ApiError, ApiResult, FieldErrors},
    models::{
        CreateTrailRequest, Difficulty, LocationFields, LocationFilter, LocationListParams,
        LocationRequest, NewTrail, NewTrailPoint, Role, RouteType, Trail, TrailFields,
        TrailFilter, TrailListParams, TrailPointRequest, TrailUpdate, UpdateTrailRequest,
        UserFilter, UserListParams,
    },
};

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 255;
pub const MAX_TRAIL_LENGTH_KM: f64 = 999.99;
pub const MIN_FILTER_LENGTH_KM: f64 = 0.1;
pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_TRAIL_PAGE: i64 = 20;
pub const DEFAULT_LOCATION_PAGE: i64 = 50;
pub const DEFAULT_USER_PAGE: i64 = 20;
// Each point binds five values; SQL Server caps a request at 2100 parameters.
pub const MAX_POINTS_PER_TRAIL: usize = 400;
pub const MAX_FEATURES_PER_TRAIL: usize = 50;

/// Collects field errors; the first message recorded for a field wins.
#[derive(Default)]
struct Checker {
    errors: FieldErrors,
}

impl Checker {
    fn fail(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_insert_with(|| message.into());
    }

    fn required<T>(&mut self, field: &str, value: Option<T>) -> Option<T> {
        if value.is_none() {
            self.fail(field, "This field is required");
        }
        value
    }

    fn name(&mut self, field: &str, value: String) -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            self.fail(field, "Must not be empty");
            None
        } else if trimmed.chars().count() > MAX_NAME_LEN {
            self.fail(field, format!("Must be at most {MAX_NAME_LEN} characters"));
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn difficulty(&mut self, raw: &str) -> Option<Difficulty> {
        raw.parse()
            .map_err(|e: crate::models::UnknownVariant| self.fail("difficulty", e.to_string()))
            .ok()
    }

    fn route_type(&mut self, raw: &str) -> Option<RouteType> {
        raw.parse()
            .map_err(|e: crate::models::UnknownVariant| self.fail("route_type", e.to_string()))
            .ok()
    }

    fn length(&mut self, value: f64) -> Option<f64> {
        if value.is_finite() && value > 0.0 && value <= MAX_TRAIL_LENGTH_KM {
            Some(value)
        } else {
            self.fail(
                "length",
                format!("Must be greater than 0 and at most {MAX_TRAIL_LENGTH_KM}"),
            );
            None
        }
    }

    fn elevation_gain(&mut self, value: Option<i32>) -> Option<i32> {
        if let Some(gain) = value
            && gain < 0
        {
            self.fail("elevation_gain", "Must be zero or greater");
        }
        value
    }

    fn positive_id(&mut self, field: &str, value: Option<i32>) -> Option<i32> {
        if let Some(id) = value
            && id <= 0
        {
            self.fail(field, "Must be a positive identifier");
        }
        value
    }

    fn time_range(&mut self, min: i32, max: i32) -> Option<(i32, i32)> {
        let mut ok = true;
        if min < 1 {
            self.fail("est_time_min", "Must be at least 1 minute");
            ok = false;
        }
        if max < 1 {
            self.fail("est_time_max", "Must be at least 1 minute");
            ok = false;
        }
        if ok && min > max {
            self.fail("est_time_min", "Must be less than or equal to est_time_max");
            ok = false;
        }
        ok.then_some((min, max))
    }

    fn point(&mut self, prefix: &str, req: TrailPointRequest) -> Option<NewTrailPoint> {
        let lat_field = format!("{prefix}latitude");
        let lon_field = format!("{prefix}longitude");
        let latitude = match req.latitude {
            None => {
                self.fail(lat_field, "This field is required");
                None
            }
            Some(lat) if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) => {
                self.fail(lat_field, "Must be between -90 and 90");
                None
            }
            Some(lat) => Some(lat),
        };
        let longitude = match req.longitude {
            None => {
                self.fail(lon_field, "This field is required");
                None
            }
            Some(lon) if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) => {
                self.fail(lon_field, "Must be between -180 and 180");
                None
            }
            Some(lon) => Some(lon),
        };
        if let Some(elevation) = req.elevation
            && !elevation.is_finite()
        {
            self.fail(format!("{prefix}elevation"), "Must be a finite number");
        }
        Some(NewTrailPoint {
            latitude: latitude?,
            longitude: longitude?,
            description: clean_text(req.description),
            elevation: req.elevation,
        })
    }

    /// Positive ids, duplicates dropped, first occurrence order kept.
    fn feature_ids(&mut self, ids: Vec<i32>) -> Option<Vec<i32>> {
        if ids.len() > MAX_FEATURES_PER_TRAIL {
            self.fail(
                "feature_ids",
                format!("At most {MAX_FEATURES_PER_TRAIL} features may be attached"),
            );
            return None;
        }
        if ids.iter().any(|id| *id <= 0) {
            self.fail("feature_ids", "Must contain positive identifiers only");
            return None;
        }
        let mut distinct = Vec::with_capacity(ids.len());
        for id in ids {
            if !distinct.contains(&id) {
                distinct.push(id);
            }
        }
        Some(distinct)
    }

    fn finish<T>(self, value: Option<T>) -> ApiResult<T> {
        match value {
            Some(value) if self.errors.is_empty() => Ok(value),
            _ => Err(ApiError::validation(self.errors)),
        }
    }
}

fn clean_text(value: Option<String>) -> Option<String> {
    value
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// estimate_time
///
/// Estimated (min, max) walking time in minutes: length times the difficulty's
/// pace, widened by -20% / +20%. Both bounds are at least one minute.
pub fn estimate_time(difficulty: Difficulty, length_km: f64) -> (i32, i32) {
    let base = length_km * difficulty.minutes_per_km();
    let min = ((base * 0.8) as i32).max(1);
    let max = ((base * 1.2) as i32).max(min);
    (min, max)
}

/// validate_new_trail
///
/// Required: trail_name, difficulty, length, route_type. When neither time bound
/// is supplied both are estimated; supplying only one is rejected.
pub fn validate_new_trail(req: CreateTrailRequest) -> ApiResult<NewTrail> {
    let mut check = Checker::default();

    let trail_name = check
        .required("trail_name", req.trail_name)
        .and_then(|name| check.name("trail_name", name));
    let difficulty = check
        .required("difficulty", req.difficulty)
        .and_then(|raw| check.difficulty(&raw));
    let length = check
        .required("length", req.length)
        .and_then(|len| check.length(len));
    let route_type = check
        .required("route_type", req.route_type)
        .and_then(|raw| check.route_type(&raw));
    let elevation_gain = check.elevation_gain(req.elevation_gain);
    let location_id = check.positive_id("location_id", req.location_id);

    let times = match (req.est_time_min, req.est_time_max) {
        (Some(min), Some(max)) => check.time_range(min, max),
        (None, None) => match (difficulty, length) {
            (Some(difficulty), Some(length)) => Some(estimate_time(difficulty, length)),
            _ => None,
        },
        (Some(_), None) => {
            check.fail("est_time_max", "Required when est_time_min is given");
            None
        }
        (None, Some(_)) => {
            check.fail("est_time_min", "Required when est_time_max is given");
            None
        }
    };

    let points = req.points.unwrap_or_default();
    if points.len() > MAX_POINTS_PER_TRAIL {
        check.fail(
            "points",
            format!("At most {MAX_POINTS_PER_TRAIL} points may be sent with a trail"),
        );
    }
    let points: Vec<Option<NewTrailPoint>> = points
        .into_iter()
        .enumerate()
        .map(|(index, point)| check.point(&format!("points[{index}]."), point))
        .collect();

    let feature_ids = check.feature_ids(req.feature_ids.unwrap_or_default());

    let trail = (|| {
        let (est_time_min, est_time_max) = times?;
        Some(NewTrail {
            fields: TrailFields {
                trail_name: trail_name?,
                location_id,
                difficulty: difficulty?,
                length: length?,
                elevation_gain,
                est_time_min,
                est_time_max,
                route_type: route_type?,
                description: clean_text(req.description),
                is_public: req.is_public.unwrap_or(true),
            },
            points: points.into_iter().collect::<Option<Vec<_>>>()?,
            feature_ids: feature_ids?,
        })
    })();

    check.finish(trail)
}

/// merge_trail_update
///
/// Applies the supplied fields of an update onto the stored trail and
/// re-validates the result, including the time-range invariant. An explicit
/// `null` clears `location_id`, `elevation_gain` or `description`.
pub fn merge_trail_update(existing: &Trail, req: UpdateTrailRequest) -> ApiResult<TrailUpdate> {
    let mut check = Checker::default();

    let trail_name = match req.trail_name {
        Some(name) => check.name("trail_name", name),
        None => Some(existing.trail_name.clone()),
    };
    let difficulty = match req.difficulty {
        Some(raw) => check.difficulty(&raw),
        None => Some(existing.difficulty),
    };
    let length = match req.length {
        Some(len) => check.length(len),
        None => Some(existing.length),
    };
    let route_type = match req.route_type {
        Some(raw) => check.route_type(&raw),
        None => Some(existing.route_type),
    };
    let elevation_gain = match req.elevation_gain {
        Some(gain) => check.elevation_gain(gain),
        None => existing.elevation_gain,
    };
    let location_id = match req.location_id {
        Some(id) => check.positive_id("location_id", id),
        None => existing.location_id,
    };
    let times = check.time_range(
        req.est_time_min.unwrap_or(existing.est_time_min),
        req.est_time_max.unwrap_or(existing.est_time_max),
    );
    let description = match req.description {
        Some(text) => clean_text(text),
        None => existing.description.clone(),
    };
    let feature_ids = match req.feature_ids {
        Some(ids) => check.feature_ids(ids).map(Some),
        None => Some(None),
    };

    let update = (|| {
        let (est_time_min, est_time_max) = times?;
        Some(TrailUpdate {
            fields: TrailFields {
                trail_name: trail_name?,
                location_id,
                difficulty: difficulty?,
                length: length?,
                elevation_gain,
                est_time_min,
                est_time_max,
                route_type: route_type?,
                description,
                is_public: req.is_public.unwrap_or(existing.is_public),
            },
            feature_ids: feature_ids?,
        })
    })();

    check.finish(update)
}

/// Validates a single waypoint appended via `POST /trails/{id}/points`.
pub fn validate_point(req: TrailPointRequest) -> ApiResult<NewTrailPoint> {
    let mut check = Checker::default();
    let point = check.point("", req);
    check.finish(point)
}

pub fn validate_location(req: LocationRequest) -> ApiResult<LocationFields> {
    let mut check = Checker::default();

    let location_name = check
        .required("location_name", req.location_name)
        .and_then(|name| check.name("location_name", name));
    let city_id = check.positive_id("city_id", req.city_id);
    let country_id = check.positive_id("country_id", req.country_id);

    let mut coordinates_ok = true;
    let coordinates = match clean_text(req.coordinates) {
        Some(raw) => match raw.parse() {
            Ok(coordinates) => Some(coordinates),
            Err(e) => {
                check.fail("coordinates", format!("Invalid coordinates: {e}"));
                coordinates_ok = false;
                None
            }
        },
        None => None,
    };

    let fields = location_name
        .filter(|_| coordinates_ok)
        .map(|location_name| LocationFields {
            location_name,
            city_id,
            country_id,
            coordinates,
        });

    check.finish(fields)
}

pub fn parse_role(raw: Option<String>) -> ApiResult<Role> {
    let mut check = Checker::default();
    let role = check.required("role", raw).and_then(|raw| {
        raw.parse::<Role>()
            .map_err(|e| check.fail("role", e.to_string()))
            .ok()
    });
    check.finish(role)
}

/// Validated login credentials. The e-mail is trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

pub fn validate_credentials(email: Option<String>, password: Option<String>) -> ApiResult<Credentials> {
    let mut check = Checker::default();

    let email = check
        .required("email", email)
        .map(|email| email.trim().to_lowercase())
        .and_then(|email| {
            if is_plausible_email(&email) {
                Some(email)
            } else {
                check.fail("email", "Must be a valid e-mail address");
                None
            }
        });
    let password = check.required("password", password).and_then(|password| {
        if password.is_empty() {
            check.fail("password", "Must not be empty");
            None
        } else {
            Some(password)
        }
    });

    let credentials = email
        .zip(password)
        .map(|(email, password)| Credentials { email, password });
    check.finish(credentials)
}

pub fn validate_username(raw: Option<String>) -> ApiResult<Option<String>> {
    let mut check = Checker::default();
    let username = match raw {
        Some(name) => check.name("username", name).map(Some),
        None => Some(None),
    };
    check.finish(username)
}

/// The local part of an e-mail address, used as the default username.
pub fn username_from_email(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn is_plausible_email(email: &str) -> bool {
    if email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn page(check: &mut Checker, limit: Option<i64>, offset: Option<i64>, default: i64) -> (i64, i64) {
    let limit = limit.unwrap_or(default);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        check.fail("limit", format!("Must be between 1 and {MAX_PAGE_SIZE}"));
    }
    let offset = offset.unwrap_or(0);
    if offset < 0 {
        check.fail("offset", "Must be zero or greater");
    }
    (limit, offset)
}

/// trail_filter
///
/// Validates listing parameters. `viewer` is the authenticated caller, if any.
pub fn trail_filter(params: TrailListParams, viewer: Option<i32>) -> ApiResult<TrailFilter> {
    let mut check = Checker::default();

    let difficulty = params.difficulty.and_then(|raw| check.difficulty(&raw));
    for (field, value) in [("min_length", params.min_length), ("max_length", params.max_length)] {
        if let Some(len) = value
            && !(len.is_finite() && len >= MIN_FILTER_LENGTH_KM)
        {
            check.fail(field, format!("Must be at least {MIN_FILTER_LENGTH_KM}"));
        }
    }
    if let (Some(min), Some(max)) = (params.min_length, params.max_length)
        && min > max
    {
        check.fail("min_length", "Must be less than or equal to max_length");
    }
    let location_id = check.positive_id("location_id", params.location_id);
    let (limit, offset) = page(&mut check, params.limit, params.offset, DEFAULT_TRAIL_PAGE);

    let filter = TrailFilter {
        difficulty,
        min_length: params.min_length,
        max_length: params.max_length,
        location_id,
        viewer,
        limit,
        offset,
    };
    check.finish(Some(filter))
}

pub fn location_filter(params: LocationListParams) -> ApiResult<LocationFilter> {
    let mut check = Checker::default();
    let city_id = check.positive_id("city_id", params.city_id);
    let country_id = check.positive_id("country_id", params.country_id);
    let (limit, offset) = page(&mut check, params.limit, params.offset, DEFAULT_LOCATION_PAGE);

    check.finish(Some(LocationFilter {
        city_id,
        country_id,
        name: clean_text(params.name),
        limit,
        offset,
    }))
}

pub fn user_filter(params: UserListParams) -> ApiResult<UserFilter> {
    let mut check = Checker::default();
    let role = params.role.and_then(|raw| {
        raw.parse::<Role>()
            .map_err(|e| check.fail("role", e.to_string()))
            .ok()
    });
    let (limit, offset) = page(&mut check, params.limit, params.offset, DEFAULT_USER_PAGE);

    check.finish(Some(UserFilter {
        role,
        search: clean_text(params.search),
        limit,
        offset,
    }))
}
