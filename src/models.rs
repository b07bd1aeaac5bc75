use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// --- Enumerations ---

/// Difficulty
///
/// Trail difficulty grade. Stored and serialized with its capitalised name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Difficulty {
    Easy,
    Moderate,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "Easy",
            Difficulty::Moderate => "Moderate",
            Difficulty::Hard => "Hard",
        }
    }

    /// Average walking pace used to estimate trail duration.
    pub fn minutes_per_km(&self) -> f64 {
        match self {
            Difficulty::Easy => 15.0,
            Difficulty::Moderate => 20.0,
            Difficulty::Hard => 25.0,
        }
    }
}

/// RouteType
///
/// Shape of a route. `"Out & back"` is accepted as a legacy spelling of `Out-and-back`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteType {
    Loop,
    OutAndBack,
    PointToPoint,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteType::Loop => "Loop",
            RouteType::OutAndBack => "Out-and-back",
            RouteType::PointToPoint => "Point-to-point",
        }
    }
}

/// Role
///
/// Coarse permission level attached to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

/// Error returned when a string is not a member of one of the enumerations above.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{value:?} is not one of: {allowed}")]
pub struct UnknownVariant {
    pub value: String,
    pub allowed: &'static str,
}

impl FromStr for Difficulty {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Easy" => Ok(Difficulty::Easy),
            "Moderate" => Ok(Difficulty::Moderate),
            "Hard" => Ok(Difficulty::Hard),
            other => Err(UnknownVariant {
                value: other.to_string(),
                allowed: "Easy, Moderate, Hard",
            }),
        }
    }
}

impl FromStr for RouteType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Loop" => Ok(RouteType::Loop),
            "Out-and-back" | "Out & back" => Ok(RouteType::OutAndBack),
            "Point-to-point" => Ok(RouteType::PointToPoint),
            other => Err(UnknownVariant {
                value: other.to_string(),
                allowed: "Loop, Out-and-back, Point-to-point",
            }),
        }
    }
}

impl FromStr for Role {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownVariant {
                value: other.to_string(),
                allowed: "user, admin",
            }),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for RouteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RouteType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RouteType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// --- Coordinates ---

/// Coordinates
///
/// A WGS84 latitude/longitude pair. Persisted as the text `"lat,lon"`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoordinatesError {
    #[error("coordinates must be formatted as \"latitude,longitude\"")]
    Format,
    #[error("latitude must be between -90 and 90")]
    Latitude,
    #[error("longitude must be between -180 and 180")]
    Longitude,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self, CoordinatesError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(CoordinatesError::Latitude);
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(CoordinatesError::Longitude);
        }
        Ok(Self { latitude, longitude })
    }
}

impl FromStr for Coordinates {
    type Err = CoordinatesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (lat, lon) = s.split_once(',').ok_or(CoordinatesError::Format)?;
        let latitude = lat.trim().parse().map_err(|_| CoordinatesError::Format)?;
        let longitude = lon.trim().parse().map_err(|_| CoordinatesError::Format)?;
        Coordinates::new(latitude, longitude)
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.latitude, self.longitude)
    }
}

// --- Core Entities (Mapped to Database) ---

/// User
///
/// A row of `CW2.[User]`. Created on first successful login, role changed only by admins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub user_id: i32,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// Trail
///
/// A row of `CW2.Trail`. Always owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trail {
    pub trail_id: i32,
    pub trail_name: String,
    pub location_id: Option<i32>,
    pub difficulty: Difficulty,
    // Kilometres.
    pub length: f64,
    // Metres.
    pub elevation_gain: Option<i32>,
    // Minutes. Invariant: est_time_min <= est_time_max.
    pub est_time_min: i32,
    pub est_time_max: i32,
    pub route_type: RouteType,
    pub description: Option<String>,
    // Owner.
    pub user_id: i32,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// TrailSummary
///
/// List entry for `GET /api/v1/trails`: the trail plus its owner's username and location name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailSummary {
    #[serde(flatten)]
    pub trail: Trail,
    pub username: Option<String>,
    pub location_name: Option<String>,
}

/// TrailPoint
///
/// One ordered waypoint of a trail. `point_order` starts at 1 and is unique per trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailPoint {
    pub point_id: i32,
    pub trail_id: i32,
    pub point_order: i32,
    pub latitude: f64,
    pub longitude: f64,
    pub description: Option<String>,
    pub elevation: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// TrailDetail
///
/// Response of `GET /api/v1/trails/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailDetail {
    #[serde(flatten)]
    pub trail: Trail,
    pub location: Option<Location>,
    pub points: Vec<TrailPoint>,
    pub features: Vec<Feature>,
    pub reviews: ReviewSummary,
}

/// Feature
///
/// A row of `CW2.Feature`: an amenity or point of interest trails can be tagged with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub feature_id: i32,
    pub feature_name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
}

/// ReviewSummary
///
/// Aggregate of a trail's `CW2.Review` rows. `average_rating` is `None` while
/// the trail has no reviews.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ReviewSummary {
    pub total_reviews: i64,
    pub average_rating: Option<f64>,
    pub five_star: i64,
    pub four_star: i64,
    pub three_star: i64,
    pub two_star: i64,
    pub one_star: i64,
}

impl ReviewSummary {
    /// Builds the summary from individual 1-5 ratings; out-of-range values are ignored.
    pub fn from_ratings(ratings: impl IntoIterator<Item = i32>) -> Self {
        let mut summary = ReviewSummary::default();
        let mut sum = 0_i64;
        for rating in ratings {
            let bucket = match rating {
                5 => &mut summary.five_star,
                4 => &mut summary.four_star,
                3 => &mut summary.three_star,
                2 => &mut summary.two_star,
                1 => &mut summary.one_star,
                _ => continue,
            };
            *bucket += 1;
            summary.total_reviews += 1;
            sum += i64::from(rating);
        }
        if summary.total_reviews > 0 {
            summary.average_rating = Some(sum as f64 / summary.total_reviews as f64);
        }
        summary
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Country {
    pub country_id: i32,
    pub country_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct City {
    pub city_id: i32,
    pub city_name: String,
    pub country_id: i32,
}

/// Location
///
/// A row of `CW2.Location` joined with its city and country names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub location_id: i32,
    pub location_name: String,
    pub city_id: Option<i32>,
    pub city_name: Option<String>,
    pub country_id: Option<i32>,
    pub country_name: Option<String>,
    pub coordinates: Option<Coordinates>,
}

/// LogAction
///
/// Audit actions recorded in `CW2.Trail_Log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogAction {
    Create,
    Update,
    Delete,
    AddPoint,
    UpdateUserRole,
    CreateLocation,
    UpdateLocation,
    DeleteLocation,
    Login,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Create => "CREATE",
            LogAction::Update => "UPDATE",
            LogAction::Delete => "DELETE",
            LogAction::AddPoint => "ADD_POINT",
            LogAction::UpdateUserRole => "UPDATE_USER_ROLE",
            LogAction::CreateLocation => "CREATE_LOCATION",
            LogAction::UpdateLocation => "UPDATE_LOCATION",
            LogAction::DeleteLocation => "DELETE_LOCATION",
            LogAction::Login => "LOGIN",
        }
    }
}

/// ActivityEntry
///
/// A recorded audit row as shown in user profiles. `action` is kept as stored text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub log_id: i32,
    pub trail_id: Option<i32>,
    pub action: String,
    pub action_date: DateTime<Utc>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    pub trail_id: Option<i32>,
    pub user_id: i32,
    pub action: LogAction,
    pub details: String,
}

// --- Validated write models (input to the repository) ---

#[derive(Debug, Clone, PartialEq)]
pub struct NewTrailPoint {
    pub latitude: f64,
    pub longitude: f64,
    pub description: Option<String>,
    pub elevation: Option<f64>,
}

/// TrailFields
///
/// Every writable trail column, already validated. Used for inserts and for
/// full-row updates after a partial merge.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailFields {
    pub trail_name: String,
    pub location_id: Option<i32>,
    pub difficulty: Difficulty,
    pub length: f64,
    pub elevation_gain: Option<i32>,
    pub est_time_min: i32,
    pub est_time_max: i32,
    pub route_type: RouteType,
    pub description: Option<String>,
    pub is_public: bool,
}

/// NewTrail
///
/// A validated trail with its initial points and feature tags. Feature ids are
/// distinct and in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrail {
    pub fields: TrailFields,
    pub points: Vec<NewTrailPoint>,
    pub feature_ids: Vec<i32>,
}

/// TrailUpdate
///
/// Result of merging an update request onto a stored trail. `feature_ids` is
/// `None` when the request left the trail's features alone and `Some` (possibly
/// empty) when they are to be replaced.
#[derive(Debug, Clone, PartialEq)]
pub struct TrailUpdate {
    pub fields: TrailFields,
    pub feature_ids: Option<Vec<i32>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationFields {
    pub location_name: String,
    pub city_id: Option<i32>,
    pub country_id: Option<i32>,
    pub coordinates: Option<Coordinates>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub role: Role,
}

// --- Read filters ---

/// TrailFilter
///
/// Validated listing filter. `viewer` widens visibility to the viewer's own private trails.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrailFilter {
    pub difficulty: Option<Difficulty>,
    pub min_length: Option<f64>,
    pub max_length: Option<f64>,
    pub location_id: Option<i32>,
    pub viewer: Option<i32>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationFilter {
    pub city_id: Option<i32>,
    pub country_id: Option<i32>,
    pub name: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub role: Option<Role>,
    pub search: Option<String>,
    pub limit: i64,
    pub offset: i64,
}

// --- Request Payloads (Input Schemas) ---
//
// Enumerations arrive as plain strings so membership failures become field-level
// validation errors instead of body rejections.

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct TrailPointRequest {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
    pub elevation: Option<f64>,
}

/// CreateTrailRequest
///
/// Body of `POST /api/v1/trails`. A `user_id` is tolerated for compatibility but
/// the owner is always the authenticated caller.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateTrailRequest {
    pub trail_name: Option<String>,
    pub location_id: Option<i32>,
    pub difficulty: Option<String>,
    pub length: Option<f64>,
    pub elevation_gain: Option<i32>,
    pub est_time_min: Option<i32>,
    pub est_time_max: Option<i32>,
    pub route_type: Option<String>,
    pub description: Option<String>,
    pub user_id: Option<i32>,
    pub is_public: Option<bool>,
    pub points: Option<Vec<TrailPointRequest>>,
    pub feature_ids: Option<Vec<i32>>,
}

/// UpdateTrailRequest
///
/// Body of `PUT /api/v1/trails/{id}`. Absent fields keep their stored value.
/// The nullable columns distinguish an absent key (`None`) from an explicit
/// `null` (`Some(None)`), which clears the stored value.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateTrailRequest {
    pub trail_name: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub location_id: Option<Option<i32>>,
    pub difficulty: Option<String>,
    pub length: Option<f64>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub elevation_gain: Option<Option<i32>>,
    pub est_time_min: Option<i32>,
    pub est_time_max: Option<i32>,
    pub route_type: Option<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Option::is_none")]
    pub description: Option<Option<String>>,
    pub is_public: Option<bool>,
    pub feature_ids: Option<Vec<i32>>,
}

// Only called when the key is present, so `null` becomes `Some(None)`.
fn nullable<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LocationRequest {
    pub location_name: Option<String>,
    pub city_id: Option<i32>,
    pub country_id: Option<i32>,
    // "lat,lon"
    pub coordinates: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RoleUpdateRequest {
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub username: Option<String>,
}

// --- Query strings ---

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrailListParams {
    pub difficulty: Option<String>,
    pub min_length: Option<f64>,
    pub max_length: Option<f64>,
    pub location_id: Option<i32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LocationListParams {
    pub city_id: Option<i32>,
    pub country_id: Option<i32>,
    pub name: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameParams {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CityListParams {
    pub country_id: Option<i32>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserListParams {
    pub role: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserTrailsParams {
    pub include_private: Option<bool>,
}

// --- Response Envelopes ---

/// TrailPage
///
/// Paginated trail listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrailPage {
    pub trails: Vec<TrailSummary>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
    pub authenticated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrailStats {
    pub total_trails: i64,
    pub public_trails: i64,
    pub private_trails: i64,
}

/// UserProfile
///
/// A user with trail statistics and their most recent audit entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub stats: TrailStats,
    pub recent_activity: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: User,
}
