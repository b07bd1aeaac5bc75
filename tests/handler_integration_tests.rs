use async_trait::async_trait;
use axum::{extract::State, http::StatusCode};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use trail_service::{
    AppConfig, AppState, InMemoryRepository, MockAuthenticator,
    auth::{AuthUser, MaybeAuthUser},
    error::{ApiError, RepoError},
    extract::{AppJson, AppPath, AppQuery},
    handlers,
    models::{
        ActivityEntry, City, Country, CreateTrailRequest, Feature, Location, LocationFields,
        LocationFilter, LocationRequest, NewLogEntry, NewTrail, NewTrailPoint, NewUser,
        ReviewSummary, Role, RoleUpdateRequest, Trail, TrailFilter, TrailListParams, TrailPoint,
        TrailStats, TrailSummary, TrailUpdate, UpdateTrailRequest, User, UserFilter,
    },
    repository::{RepoResult, Repository, RepositoryState},
};

// --- MOCK REPOSITORY IMPLEMENTATION ---

// Delegates to the in-memory store but refuses every audit write, so handlers
// can be checked for not depending on the audit log.
#[derive(Default)]
struct AuditFailingRepo {
    inner: InMemoryRepository,
    audit_attempts: AtomicUsize,
}

#[async_trait]
impl Repository for AuditFailingRepo {
    async fn ping(&self) -> RepoResult<()> {
        self.inner.ping().await
    }
    async fn list_trails(&self, filter: &TrailFilter) -> RepoResult<Vec<TrailSummary>> {
        self.inner.list_trails(filter).await
    }
    async fn count_trails(&self, filter: &TrailFilter) -> RepoResult<i64> {
        self.inner.count_trails(filter).await
    }
    async fn get_trail(&self, trail_id: i32) -> RepoResult<Option<Trail>> {
        self.inner.get_trail(trail_id).await
    }
    async fn create_trail(&self, owner_id: i32, trail: &NewTrail) -> RepoResult<Trail> {
        self.inner.create_trail(owner_id, trail).await
    }
    async fn update_trail(&self, trail_id: i32, editor_id: i32, update: &TrailUpdate) -> RepoResult<Option<Trail>> {
        self.inner.update_trail(trail_id, editor_id, update).await
    }
    async fn delete_trail(&self, trail_id: i32) -> RepoResult<bool> {
        self.inner.delete_trail(trail_id).await
    }
    async fn list_user_trails(&self, user_id: i32, include_private: bool) -> RepoResult<Vec<Trail>> {
        self.inner.list_user_trails(user_id, include_private).await
    }
    async fn user_trail_stats(&self, user_id: i32) -> RepoResult<TrailStats> {
        self.inner.user_trail_stats(user_id).await
    }
    async fn list_trail_points(&self, trail_id: i32) -> RepoResult<Vec<TrailPoint>> {
        self.inner.list_trail_points(trail_id).await
    }
    async fn add_trail_point(&self, trail_id: i32, point: &NewTrailPoint) -> RepoResult<TrailPoint> {
        self.inner.add_trail_point(trail_id, point).await
    }
    async fn list_features(&self) -> RepoResult<Vec<Feature>> {
        self.inner.list_features().await
    }
    async fn list_trail_features(&self, trail_id: i32) -> RepoResult<Vec<Feature>> {
        self.inner.list_trail_features(trail_id).await
    }
    async fn trail_review_summary(&self, trail_id: i32) -> RepoResult<ReviewSummary> {
        self.inner.trail_review_summary(trail_id).await
    }
    async fn list_locations(&self, filter: &LocationFilter) -> RepoResult<Vec<Location>> {
        self.inner.list_locations(filter).await
    }
    async fn get_location(&self, location_id: i32) -> RepoResult<Option<Location>> {
        self.inner.get_location(location_id).await
    }
    async fn create_location(&self, fields: &LocationFields) -> RepoResult<Location> {
        self.inner.create_location(fields).await
    }
    async fn update_location(&self, location_id: i32, fields: &LocationFields) -> RepoResult<Option<Location>> {
        self.inner.update_location(location_id, fields).await
    }
    async fn delete_location(&self, location_id: i32) -> RepoResult<bool> {
        self.inner.delete_location(location_id).await
    }
    async fn list_countries(&self, name: Option<&str>) -> RepoResult<Vec<Country>> {
        self.inner.list_countries(name).await
    }
    async fn get_country(&self, country_id: i32) -> RepoResult<Option<Country>> {
        self.inner.get_country(country_id).await
    }
    async fn list_cities(&self, country_id: Option<i32>, name: Option<&str>) -> RepoResult<Vec<City>> {
        self.inner.list_cities(country_id, name).await
    }
    async fn get_city(&self, city_id: i32) -> RepoResult<Option<City>> {
        self.inner.get_city(city_id).await
    }
    async fn get_user(&self, user_id: i32) -> RepoResult<Option<User>> {
        self.inner.get_user(user_id).await
    }
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        self.inner.get_user_by_email(email).await
    }
    async fn create_user(&self, user: &NewUser) -> RepoResult<User> {
        self.inner.create_user(user).await
    }
    async fn touch_last_login(&self, user_id: i32) -> RepoResult<()> {
        self.inner.touch_last_login(user_id).await
    }
    async fn list_users(&self, filter: &UserFilter) -> RepoResult<Vec<User>> {
        self.inner.list_users(filter).await
    }
    async fn set_user_role(&self, user_id: i32, role: Role) -> RepoResult<Option<User>> {
        self.inner.set_user_role(user_id, role).await
    }
    async fn log_action(&self, _entry: &NewLogEntry) -> RepoResult<()> {
        self.audit_attempts.fetch_add(1, Ordering::SeqCst);
        Err(RepoError::Unavailable)
    }
    async fn recent_activity(&self, user_id: i32, limit: i64) -> RepoResult<Vec<ActivityEntry>> {
        self.inner.recent_activity(user_id, limit).await
    }
}

// --- Helpers ---

fn state_with(repo: RepositoryState) -> AppState {
    AppState::new(repo, Arc::new(MockAuthenticator::new()), AppConfig::default())
}

fn caller(user: &User) -> AuthUser {
    user.clone().into()
}

fn easy_trail(name: &str, is_public: bool) -> CreateTrailRequest {
    CreateTrailRequest {
        trail_name: Some(name.to_string()),
        difficulty: Some("Easy".to_string()),
        length: Some(2.1),
        route_type: Some("Out & back".to_string()),
        is_public: Some(is_public),
        ..Default::default()
    }
}

// --- Tests ---

#[tokio::test]
async fn test_create_trail_succeeds_when_audit_log_fails() {
    let repo = Arc::new(AuditFailingRepo::default());
    let ada = repo.inner.seed_user("Ada Lovelace", "ada@plymouth.ac.uk", Role::User);
    let state = state_with(repo.clone());

    let (status, trail) = handlers::trails::create_trail(
        caller(&ada),
        State(state),
        AppJson(easy_trail("Central Park Stroll", true)),
    )
    .await
    .unwrap();

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(trail.0.route_type.as_str(), "Out-and-back");
    assert_eq!(repo.audit_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_list_trails_for_anonymous_viewer() {
    let repo = Arc::new(InMemoryRepository::new());
    let ada = repo.seed_user("Ada Lovelace", "ada@plymouth.ac.uk", Role::User);
    let state = state_with(repo.clone());

    for (name, public) in [("Visible", true), ("Hidden", false)] {
        handlers::trails::create_trail(
            caller(&ada),
            State(state.clone()),
            AppJson(easy_trail(name, public)),
        )
        .await
        .unwrap();
    }

    let page = handlers::trails::list_trails(
        MaybeAuthUser(None),
        State(state.clone()),
        AppQuery(TrailListParams::default()),
    )
    .await
    .unwrap()
    .0;
    assert_eq!(page.total, 1);
    assert_eq!(page.trails[0].trail.trail_name, "Visible");
    assert!(!page.authenticated);
    assert!(!page.has_more);

    let page = handlers::trails::list_trails(
        MaybeAuthUser(Some(caller(&ada))),
        State(state),
        AppQuery(TrailListParams::default()),
    )
    .await
    .unwrap()
    .0;
    assert_eq!(page.total, 2);
}

#[tokio::test]
async fn test_get_private_trail_is_not_found_for_strangers() {
    let repo = Arc::new(InMemoryRepository::new());
    let ada = repo.seed_user("Ada Lovelace", "ada@plymouth.ac.uk", Role::User);
    let frost = repo.seed_user("William Frost", "frost@tsc.com", Role::User);
    let state = state_with(repo.clone());

    let (_, trail) = handlers::trails::create_trail(
        caller(&ada),
        State(state.clone()),
        AppJson(easy_trail("Hidden", false)),
    )
    .await
    .unwrap();
    let trail_id = trail.0.trail_id;

    let err = handlers::trails::get_trail(
        MaybeAuthUser(Some(caller(&frost))),
        State(state.clone()),
        AppPath(trail_id),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));

    let detail = handlers::trails::get_trail(MaybeAuthUser(Some(caller(&ada))), State(state), AppPath(trail_id))
        .await
        .unwrap()
        .0;
    assert_eq!(detail.trail.trail_id, trail_id);
    assert!(detail.location.is_none());
}

#[tokio::test]
async fn test_trail_detail_carries_features_and_reviews() {
    let repo = Arc::new(InMemoryRepository::new());
    let tim = repo.seed_user("Tim Berners-Lee", "tim@plymouth.ac.uk", Role::Admin);
    let ada = repo.seed_user("Ada Lovelace", "ada@plymouth.ac.uk", Role::User);
    let frost = repo.seed_user("William Frost", "frost@tsc.com", Role::User);
    let view = repo.seed_feature("Mountain View", Some("Panoramic mountain vistas"));
    let wildlife = repo.seed_feature("Wildlife", None);
    let state = state_with(repo.clone());

    let (_, trail) = handlers::trails::create_trail(
        caller(&tim),
        State(state.clone()),
        AppJson(CreateTrailRequest {
            feature_ids: Some(vec![wildlife.feature_id, view.feature_id]),
            ..easy_trail("Dartmoor Challenge Route", true)
        }),
    )
    .await
    .unwrap();
    let trail_id = trail.0.trail_id;
    repo.seed_review(trail_id, ada.user_id, 5).unwrap();
    repo.seed_review(trail_id, frost.user_id, 3).unwrap();
    assert!(repo.seed_review(trail_id, frost.user_id, 6).is_err());

    let detail = handlers::trails::get_trail(MaybeAuthUser(None), State(state.clone()), AppPath(trail_id))
        .await
        .unwrap()
        .0;
    assert_eq!(detail.features, vec![view.clone(), wildlife.clone()]);
    assert_eq!(detail.reviews.total_reviews, 2);
    assert_eq!(detail.reviews.average_rating, Some(4.0));
    assert_eq!((detail.reviews.five_star, detail.reviews.three_star), (1, 1));

    // A supplied feature list replaces the tags.
    handlers::trails::update_trail(
        caller(&tim),
        State(state.clone()),
        AppPath(trail_id),
        AppJson(UpdateTrailRequest {
            feature_ids: Some(vec![view.feature_id]),
            ..Default::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(repo.list_trail_features(trail_id).await.unwrap(), vec![view]);

    // Deleting the trail drops its tags and reviews.
    handlers::trails::delete_trail(caller(&tim), State(state), AppPath(trail_id))
        .await
        .unwrap();
    assert!(repo.list_trail_features(trail_id).await.unwrap().is_empty());
    assert_eq!(repo.trail_review_summary(trail_id).await.unwrap(), ReviewSummary::default());
}

#[tokio::test]
async fn test_admin_cannot_change_own_role() {
    let repo = Arc::new(InMemoryRepository::new());
    let grace = repo.seed_user("Grace Hopper", "grace@plymouth.ac.uk", Role::Admin);
    let state = state_with(repo.clone());

    let err = handlers::users::update_user_role(
        caller(&grace),
        State(state),
        AppPath(grace.user_id),
        AppJson(RoleUpdateRequest {
            role: Some("user".to_string()),
        }),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, ApiError::BadRequest(_)));
    assert_eq!(repo.get_user(grace.user_id).await.unwrap().unwrap().role, Role::Admin);
}

#[tokio::test]
async fn test_admin_handlers_recheck_the_role() {
    let repo = Arc::new(InMemoryRepository::new());
    let ada = repo.seed_user("Ada Lovelace", "ada@plymouth.ac.uk", Role::User);
    let state = state_with(repo.clone());

    let err = handlers::locations::create_location(
        caller(&ada),
        State(state),
        AppJson(LocationRequest {
            location_name: Some("Sydney Harbour".to_string()),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)));
}

#[tokio::test]
async fn test_location_with_unknown_city_is_a_field_error() {
    let repo = Arc::new(InMemoryRepository::new());
    let grace = repo.seed_user("Grace Hopper", "grace@plymouth.ac.uk", Role::Admin);
    let state = state_with(repo.clone());

    let err = handlers::locations::create_location(
        caller(&grace),
        State(state),
        AppJson(LocationRequest {
            location_name: Some("Sydney Harbour".to_string()),
            city_id: Some(404),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();

    match err {
        ApiError::Validation { field_errors, .. } => assert!(field_errors.contains_key("city_id")),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_logout_and_status() {
    let repo = Arc::new(InMemoryRepository::new());
    let ada = repo.seed_user("Ada Lovelace", "ada@plymouth.ac.uk", Role::User);
    let state = state_with(repo);

    let body = handlers::session::logout(caller(&ada)).await.0;
    assert_eq!(body["user_id"], ada.user_id);

    let status = handlers::system::status(State(state)).await.0;
    assert_eq!(status["status"], "operational");
    assert_eq!(status["api"], "TrailService");
}
