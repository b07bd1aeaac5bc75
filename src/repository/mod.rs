use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::RepoError,
    models::{
        ActivityEntry, City, Country, Feature, Location, LocationFields, LocationFilter,
        NewLogEntry, NewTrail, NewTrailPoint, NewUser, ReviewSummary, Role, Trail, TrailFilter,
        TrailPoint, TrailStats, TrailSummary, TrailUpdate, User, UserFilter,
    },
};

mod memory;
mod query;
mod rows;
mod sql_server;

pub use memory::InMemoryRepository;
pub use sql_server::{PooledConn, SessionResetManager, SqlPool, SqlServerRepository, connect_pool};

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository
///
/// Data-access contract for the service. One operation per CRUD action per entity.
/// Implementations take pre-validated input, use parameterised statements only,
/// and return rows in a deterministic order.
///
/// "Absent" rows are reported as `Ok(None)` / `Ok(false)`; constraint violations
/// (missing foreign key, duplicate natural key) as `RepoError::Conflict`.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Round-trips a trivial statement to prove the database is reachable.
    async fn ping(&self) -> RepoResult<()>;

    // --- Trails ---

    /// Trails visible under `filter`, newest first (`created_at DESC, trail_id DESC`).
    async fn list_trails(&self, filter: &TrailFilter) -> RepoResult<Vec<TrailSummary>>;
    /// Number of trails matching `filter`, ignoring `limit`/`offset`.
    async fn count_trails(&self, filter: &TrailFilter) -> RepoResult<i64>;
    async fn get_trail(&self, trail_id: i32) -> RepoResult<Option<Trail>>;
    /// Inserts the trail, its points (numbered 1..n) and its feature tags atomically.
    /// Unknown feature ids fail with `Conflict` and nothing is written.
    async fn create_trail(&self, owner_id: i32, trail: &NewTrail) -> RepoResult<Trail>;
    /// Overwrites every writable column and stamps `updated_at`. When
    /// `update.feature_ids` is set the trail's tags are replaced in the same
    /// transaction, newly attached ones recorded as added by `editor_id`.
    async fn update_trail(&self, trail_id: i32, editor_id: i32, update: &TrailUpdate) -> RepoResult<Option<Trail>>;
    /// Deletes the trail; its points, feature tags and reviews go with it.
    async fn delete_trail(&self, trail_id: i32) -> RepoResult<bool>;
    /// Trails owned by `user_id`, newest first.
    async fn list_user_trails(&self, user_id: i32, include_private: bool) -> RepoResult<Vec<Trail>>;
    async fn user_trail_stats(&self, user_id: i32) -> RepoResult<TrailStats>;

    // --- Trail points ---

    /// Points of a trail in `point_order`.
    async fn list_trail_points(&self, trail_id: i32) -> RepoResult<Vec<TrailPoint>>;
    /// Appends a point with `point_order` = current maximum + 1.
    async fn add_trail_point(&self, trail_id: i32, point: &NewTrailPoint) -> RepoResult<TrailPoint>;

    // --- Features & reviews ---

    /// Every feature, ordered by name.
    async fn list_features(&self) -> RepoResult<Vec<Feature>>;
    /// Features attached to a trail, ordered by name.
    async fn list_trail_features(&self, trail_id: i32) -> RepoResult<Vec<Feature>>;
    /// Rating counts and average over the trail's reviews.
    async fn trail_review_summary(&self, trail_id: i32) -> RepoResult<ReviewSummary>;

    // --- Locations & geography ---

    async fn list_locations(&self, filter: &LocationFilter) -> RepoResult<Vec<Location>>;
    async fn get_location(&self, location_id: i32) -> RepoResult<Option<Location>>;
    async fn create_location(&self, fields: &LocationFields) -> RepoResult<Location>;
    async fn update_location(&self, location_id: i32, fields: &LocationFields) -> RepoResult<Option<Location>>;
    /// Fails with `Conflict` while any trail references the location.
    async fn delete_location(&self, location_id: i32) -> RepoResult<bool>;
    async fn list_countries(&self, name: Option<&str>) -> RepoResult<Vec<Country>>;
    async fn get_country(&self, country_id: i32) -> RepoResult<Option<Country>>;
    async fn list_cities(&self, country_id: Option<i32>, name: Option<&str>) -> RepoResult<Vec<City>>;
    async fn get_city(&self, city_id: i32) -> RepoResult<Option<City>>;

    // --- Users ---

    async fn get_user(&self, user_id: i32) -> RepoResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn create_user(&self, user: &NewUser) -> RepoResult<User>;
    async fn touch_last_login(&self, user_id: i32) -> RepoResult<()>;
    /// Users ordered by `user_id`.
    async fn list_users(&self, filter: &UserFilter) -> RepoResult<Vec<User>>;
    async fn set_user_role(&self, user_id: i32, role: Role) -> RepoResult<Option<User>>;

    // --- Audit log ---

    async fn log_action(&self, entry: &NewLogEntry) -> RepoResult<()>;
    /// Most recent entries for a user, newest first.
    async fn recent_activity(&self, user_id: i32, limit: i64) -> RepoResult<Vec<ActivityEntry>>;
}

/// RepositoryState
///
/// Thread-safe handle to the repository shared via `AppState`.
pub type RepositoryState = Arc<dyn Repository>;
