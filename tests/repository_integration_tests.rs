//! Runs against a real SQL Server. Set DATABASE_URL and run with `--ignored`.

use chrono::Utc;
use serial_test::serial;
use trail_service::{
    error::RepoError,
    models::{
        Coordinates, Difficulty, LocationFields, LocationFilter, LogAction, NewLogEntry, NewTrail,
        NewTrailPoint, NewUser, Role, RouteType, TrailFields, TrailFilter, TrailUpdate, User,
        UserFilter,
    },
    repository::{Repository, SqlPool, SqlServerRepository, connect_pool},
    seed::{self, SCHEMA_SQL, SeedOptions},
};

// --- Test Context and Setup ---

struct DbTestContext {
    repo: SqlServerRepository,
}

impl DbTestContext {
    async fn setup() -> Self {
        let pool = test_pool(2).await;

        seed::apply_schema(&pool, SCHEMA_SQL)
            .await
            .expect("Failed to apply schema.");
        seed::seed(&pool, &SeedOptions::default())
            .await
            .expect("Failed to seed reference data.");

        DbTestContext {
            repo: SqlServerRepository::new(pool),
        }
    }
}

async fn test_pool(max_size: u32) -> SqlPool {
    dotenv::dotenv().ok();

    let db_url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL must be set to run integration tests");

    connect_pool(&db_url, max_size)
        .await
        .expect("Failed to connect to database for integration tests.")
}

async fn open_transactions(pool: &SqlPool) -> i32 {
    let mut conn = pool.get().await.unwrap();
    let row = conn
        .simple_query("SELECT @@TRANCOUNT AS Depth")
        .await
        .unwrap()
        .into_row()
        .await
        .unwrap()
        .unwrap();
    row.get::<i32, _>("Depth").unwrap()
}

// --- Test Data Helpers ---

/// Distinct suffix so reruns never collide on unique names.
fn unique(prefix: &str) -> String {
    format!("{prefix} {}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

async fn create_test_user(repo: &SqlServerRepository, role: Role) -> User {
    let name = unique("tester");
    let email = format!("{}@test.example", name.replace(' ', "."));
    repo.create_user(&NewUser {
        username: name,
        email,
        role,
    })
    .await
    .expect("Failed to insert test user")
}

fn trail_fields(name: &str, is_public: bool) -> TrailFields {
    TrailFields {
        trail_name: name.to_string(),
        location_id: None,
        difficulty: Difficulty::Moderate,
        length: 6.4,
        elevation_gain: Some(120),
        est_time_min: 90,
        est_time_max: 120,
        route_type: RouteType::Loop,
        description: Some("Integration test trail".to_string()),
        is_public,
    }
}

fn point(latitude: f64, longitude: f64) -> NewTrailPoint {
    NewTrailPoint {
        latitude,
        longitude,
        description: None,
        elevation: None,
    }
}

fn all_trails_for(viewer: Option<i32>) -> TrailFilter {
    TrailFilter {
        viewer,
        limit: 100,
        ..Default::default()
    }
}

// --- Tests ---

#[tokio::test]
#[ignore]
#[serial]
async fn test_ping_and_seeded_geography() {
    let ctx = DbTestContext::setup().await;
    ctx.repo.ping().await.unwrap();

    let countries = ctx.repo.list_countries(Some("United")).await.unwrap();
    let uk = countries
        .iter()
        .find(|c| c.country_name == "United Kingdom")
        .expect("seeded country");

    let cities = ctx.repo.list_cities(Some(uk.country_id), None).await.unwrap();
    assert!(cities.iter().any(|c| c.city_name == "Plymouth"));
    assert!(cities.iter().all(|c| c.country_id == uk.country_id));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_trail_lifecycle_with_points() {
    let ctx = DbTestContext::setup().await;
    let owner = create_test_user(&ctx.repo, Role::User).await;

    let name = unique("Tamar Valley Loop");
    let created = ctx
        .repo
        .create_trail(
            owner.user_id,
            &NewTrail {
                fields: trail_fields(&name, true),
                points: vec![point(50.40, -4.10), point(50.41, -4.11)],
                feature_ids: vec![],
            },
        )
        .await
        .unwrap();
    assert_eq!(created.user_id, owner.user_id);
    assert_eq!(created.route_type, RouteType::Loop);

    let points = ctx.repo.list_trail_points(created.trail_id).await.unwrap();
    let orders: Vec<i32> = points.iter().map(|p| p.point_order).collect();
    assert_eq!(orders, vec![1, 2]);

    let appended = ctx
        .repo
        .add_trail_point(created.trail_id, &point(50.42, -4.12))
        .await
        .unwrap();
    assert_eq!(appended.point_order, 3);

    let mut fields = trail_fields(&name, false);
    fields.difficulty = Difficulty::Hard;
    let updated = ctx
        .repo
        .update_trail(
            created.trail_id,
            owner.user_id,
            &TrailUpdate {
                fields,
                feature_ids: None,
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.difficulty, Difficulty::Hard);
    assert!(!updated.is_public);
    assert!(updated.updated_at >= created.updated_at);

    // Private now: hidden from anonymous listings, visible to the owner.
    let anonymous = ctx.repo.list_trails(&all_trails_for(None)).await.unwrap();
    assert!(!anonymous.iter().any(|t| t.trail.trail_id == created.trail_id));
    let own = ctx
        .repo
        .list_trails(&all_trails_for(Some(owner.user_id)))
        .await
        .unwrap();
    let summary = own
        .iter()
        .find(|t| t.trail.trail_id == created.trail_id)
        .expect("owner sees private trail");
    assert_eq!(summary.username.as_deref(), Some(owner.username.as_str()));

    let stats = ctx.repo.user_trail_stats(owner.user_id).await.unwrap();
    assert_eq!(stats.total_trails, 1);
    assert_eq!(stats.private_trails, 1);

    assert!(ctx.repo.delete_trail(created.trail_id).await.unwrap());
    assert!(ctx.repo.get_trail(created.trail_id).await.unwrap().is_none());
    assert!(ctx.repo.list_trail_points(created.trail_id).await.unwrap().is_empty());
    assert!(!ctx.repo.delete_trail(created.trail_id).await.unwrap());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_count_matches_listing() {
    let ctx = DbTestContext::setup().await;
    let filter = TrailFilter {
        difficulty: Some(Difficulty::Easy),
        limit: 100,
        ..Default::default()
    };

    let trails = ctx.repo.list_trails(&filter).await.unwrap();
    let total = ctx.repo.count_trails(&filter).await.unwrap();
    assert_eq!(total, trails.len() as i64);
    assert!(trails.iter().all(|t| t.trail.difficulty == Difficulty::Easy && t.trail.is_public));
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_location_constraints() {
    let ctx = DbTestContext::setup().await;
    let owner = create_test_user(&ctx.repo, Role::User).await;

    let name = unique("Burrator Reservoir");
    let location = ctx
        .repo
        .create_location(&LocationFields {
            location_name: name.clone(),
            city_id: None,
            country_id: None,
            coordinates: Some(Coordinates::new(50.49, -4.03).unwrap()),
        })
        .await
        .unwrap();
    assert_eq!(location.coordinates, Some(Coordinates::new(50.49, -4.03).unwrap()));

    // Duplicate names violate the unique key.
    let duplicate = ctx
        .repo
        .create_location(&LocationFields {
            location_name: name.clone(),
            city_id: None,
            country_id: None,
            coordinates: None,
        })
        .await;
    assert!(matches!(duplicate, Err(RepoError::Conflict(_))));

    let found = ctx
        .repo
        .list_locations(&LocationFilter {
            name: Some("Burrator".to_string()),
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(found.iter().any(|l| l.location_id == location.location_id));

    let mut fields = trail_fields(&unique("Reservoir Path"), true);
    fields.location_id = Some(location.location_id);
    let trail = ctx
        .repo
        .create_trail(
            owner.user_id,
            &NewTrail {
                fields,
                points: vec![],
                feature_ids: vec![],
            },
        )
        .await
        .unwrap();

    // Referenced locations cannot be removed.
    let referenced = ctx.repo.delete_location(location.location_id).await;
    assert!(matches!(referenced, Err(RepoError::Conflict(_))));

    ctx.repo.delete_trail(trail.trail_id).await.unwrap();
    assert!(ctx.repo.delete_location(location.location_id).await.unwrap());
    assert!(ctx.repo.get_location(location.location_id).await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_users_roles_and_activity() {
    let ctx = DbTestContext::setup().await;
    let user = create_test_user(&ctx.repo, Role::User).await;

    let by_email = ctx
        .repo
        .get_user_by_email(&user.email)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_email.user_id, user.user_id);
    assert!(by_email.last_login.is_none());

    let duplicate = ctx
        .repo
        .create_user(&NewUser {
            username: "someone else".to_string(),
            email: user.email.clone(),
            role: Role::User,
        })
        .await;
    assert!(matches!(duplicate, Err(RepoError::Conflict(_))));

    ctx.repo.touch_last_login(user.user_id).await.unwrap();
    let promoted = ctx
        .repo
        .set_user_role(user.user_id, Role::Admin)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(promoted.role, Role::Admin);
    assert!(promoted.last_login.is_some());
    assert!(ctx.repo.set_user_role(i32::MAX, Role::User).await.unwrap().is_none());

    let admins = ctx
        .repo
        .list_users(&UserFilter {
            role: Some(Role::Admin),
            limit: 1000,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(admins.iter().any(|u| u.user_id == user.user_id));

    for action in [LogAction::Login, LogAction::Create] {
        ctx.repo
            .log_action(&NewLogEntry {
                trail_id: None,
                user_id: user.user_id,
                action,
                details: format!("{} from integration test", action.as_str()),
            })
            .await
            .unwrap();
    }
    let activity = ctx.repo.recent_activity(user.user_id, 10).await.unwrap();
    let actions: Vec<&str> = activity.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec!["CREATE", "LOGIN"]);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_checkout_rolls_back_an_abandoned_transaction() {
    // One connection, so the second checkout reuses the first.
    let pool = test_pool(1).await;
    {
        let mut conn = pool.get().await.unwrap();
        conn.simple_query("BEGIN TRANSACTION")
            .await
            .unwrap()
            .into_results()
            .await
            .unwrap();
        // Dropped without COMMIT, as when a request future is cancelled.
    }
    assert_eq!(open_transactions(&pool).await, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_failed_create_writes_nothing() {
    let ctx = DbTestContext::setup().await;
    let owner = create_test_user(&ctx.repo, Role::User).await;

    let result = ctx
        .repo
        .create_trail(
            owner.user_id,
            &NewTrail {
                fields: trail_fields(&unique("Doomed Walk"), true),
                points: vec![point(50.40, -4.10)],
                feature_ids: vec![i32::MAX],
            },
        )
        .await;
    assert!(matches!(result, Err(RepoError::Conflict(_))));
    assert!(ctx.repo.list_user_trails(owner.user_id, true).await.unwrap().is_empty());

    let pool = test_pool(1).await;
    assert_eq!(open_transactions(&pool).await, 0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_features_and_reviews() {
    let ctx = DbTestContext::setup().await;
    let owner = create_test_user(&ctx.repo, Role::User).await;

    let features = ctx.repo.list_features().await.unwrap();
    let id_of = |name: &str| {
        features
            .iter()
            .find(|f| f.feature_name == name)
            .map(|f| f.feature_id)
            .expect("seeded feature")
    };

    // Seeded trail: five tags, ratings 5 and 4.
    let seeded = ctx
        .repo
        .list_trails(&all_trails_for(None))
        .await
        .unwrap()
        .into_iter()
        .find(|t| t.trail.trail_name == "Plymbridge Circular Walk")
        .expect("seeded trail");
    let tags = ctx.repo.list_trail_features(seeded.trail.trail_id).await.unwrap();
    assert_eq!(tags.len(), 5);
    let summary = ctx.repo.trail_review_summary(seeded.trail.trail_id).await.unwrap();
    assert_eq!(summary.total_reviews, 2);
    assert_eq!(summary.average_rating, Some(4.5));
    assert_eq!((summary.five_star, summary.four_star), (1, 1));

    let created = ctx
        .repo
        .create_trail(
            owner.user_id,
            &NewTrail {
                fields: trail_fields(&unique("Tagged Walk"), true),
                points: vec![],
                feature_ids: vec![id_of("Forest"), id_of("Parking")],
            },
        )
        .await
        .unwrap();
    let names: Vec<String> = ctx
        .repo
        .list_trail_features(created.trail_id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.feature_name)
        .collect();
    assert_eq!(names, vec!["Forest", "Parking"]);

    let replaced = ctx
        .repo
        .update_trail(
            created.trail_id,
            owner.user_id,
            &TrailUpdate {
                fields: trail_fields(&created.trail_name, true),
                feature_ids: Some(vec![id_of("Parking"), id_of("Camping")]),
            },
        )
        .await
        .unwrap();
    assert!(replaced.is_some());
    let names: Vec<String> = ctx
        .repo
        .list_trail_features(created.trail_id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.feature_name)
        .collect();
    assert_eq!(names, vec!["Camping", "Parking"]);

    let empty = ctx.repo.trail_review_summary(created.trail_id).await.unwrap();
    assert_eq!(empty.total_reviews, 0);
    assert_eq!(empty.average_rating, None);

    let missing = ctx
        .repo
        .update_trail(
            i32::MAX,
            owner.user_id,
            &TrailUpdate {
                fields: trail_fields("Nowhere", true),
                feature_ids: Some(vec![id_of("Parking")]),
            },
        )
        .await
        .unwrap();
    assert!(missing.is_none());

    assert!(ctx.repo.delete_trail(created.trail_id).await.unwrap());
    assert!(ctx.repo.list_trail_features(created.trail_id).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_name_search_treats_wildcards_literally() {
    let ctx = DbTestContext::setup().await;
    let literal = unique("100% Moorland");
    let lookalike = unique("1000 Moorland");
    for name in [&literal, &lookalike] {
        ctx.repo
            .create_location(&LocationFields {
                location_name: name.clone(),
                city_id: None,
                country_id: None,
                coordinates: None,
            })
            .await
            .unwrap();
    }

    let found = ctx
        .repo
        .list_locations(&LocationFilter {
            name: Some("100% Moor".to_string()),
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(found.iter().any(|l| l.location_name == literal));
    assert!(!found.iter().any(|l| l.location_name == lookalike));

    let underscore = ctx
        .repo
        .list_locations(&LocationFilter {
            name: Some("100_ Moor".to_string()),
            limit: 100,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(underscore.is_empty());
}
