use std::fmt;

use crate::{
    error::RepoError,
    models::{Difficulty, Role, RouteType},
    repository::{PooledConn, RepoResult, SqlPool},
};

/// The schema script applied by `seed --schema`.
pub const SCHEMA_SQL: &str = include_str!("../sql/schema.sql");

// Children before parents.
const RESET_ORDER: [&str; 10] = [
    "Trail_Log",
    "Review",
    "Trail_Feature",
    "Trail_Point",
    "Trail",
    "Feature",
    "Location",
    "City",
    "Country",
    "[User]",
];

// --- Seed Data ---

struct SeedCity {
    name: &'static str,
    country: &'static str,
}

struct SeedLocation {
    name: &'static str,
    city: Option<&'static str>,
    country: &'static str,
    coordinates: &'static str,
}

struct SeedUser {
    username: String,
    email: String,
    role: Role,
}

struct SeedPoint {
    latitude: f64,
    longitude: f64,
    description: &'static str,
    elevation: f64,
}

struct SeedReview {
    // Index into the seeded users.
    reviewer: usize,
    rating: i32,
    text: &'static str,
}

struct SeedTrail {
    name: &'static str,
    location: &'static str,
    difficulty: Difficulty,
    length: f64,
    elevation_gain: i32,
    est_time: (i32, i32),
    route_type: RouteType,
    description: &'static str,
    // Index into the seeded users.
    owner: usize,
    is_public: bool,
    points: &'static [SeedPoint],
    // Feature names, tagged by the owner.
    features: &'static [&'static str],
    reviews: &'static [SeedReview],
}

const COUNTRIES: [&str; 5] = [
    "United Kingdom",
    "United States",
    "Australia",
    "Canada",
    "Germany",
];

const CITIES: [SeedCity; 6] = [
    SeedCity { name: "Plymouth", country: "United Kingdom" },
    SeedCity { name: "London", country: "United Kingdom" },
    SeedCity { name: "New York", country: "United States" },
    SeedCity { name: "Sydney", country: "Australia" },
    SeedCity { name: "Toronto", country: "Canada" },
    SeedCity { name: "Berlin", country: "Germany" },
];

const LOCATIONS: [SeedLocation; 6] = [
    SeedLocation {
        name: "Plymbridge Woods",
        city: Some("Plymouth"),
        country: "United Kingdom",
        coordinates: "50.3964,-4.0916",
    },
    SeedLocation {
        name: "Central Park",
        city: Some("New York"),
        country: "United States",
        coordinates: "40.7851,-73.9683",
    },
    SeedLocation {
        name: "Dartmoor National Park",
        city: Some("Plymouth"),
        country: "United Kingdom",
        coordinates: "50.5700,-3.9200",
    },
    SeedLocation {
        name: "Sydney Harbour",
        city: Some("Sydney"),
        country: "Australia",
        coordinates: "-33.8568,151.2153",
    },
    SeedLocation {
        name: "Rocky Mountains",
        city: None,
        country: "Canada",
        coordinates: "51.1784,-115.5708",
    },
    SeedLocation {
        name: "Black Forest",
        city: Some("Berlin"),
        country: "Germany",
        coordinates: "48.3325,8.1667",
    },
];

const FEATURES: [(&str, &str); 10] = [
    ("Waterfall", "Trail passes by or includes a waterfall"),
    ("Forest", "Mainly through wooded areas"),
    ("River View", "Scenic views of rivers or streams"),
    ("Mountain View", "Panoramic mountain vistas"),
    ("Wildlife", "Good spot for animal watching"),
    ("Picnic Area", "Designated picnic spots"),
    ("Parking", "Available parking at trailhead"),
    ("Toilets", "Public toilets available"),
    ("Camping", "Camping facilities available"),
    ("Historic Site", "Historical landmarks along trail"),
];

// These accounts exist at the Authenticator API.
const USERS: [(&str, &str, Role); 4] = [
    ("Grace Hopper", "grace@plymouth.ac.uk", Role::Admin),
    ("Tim Berners-Lee", "tim@plymouth.ac.uk", Role::Admin),
    ("Ada Lovelace", "ada@plymouth.ac.uk", Role::User),
    ("William Frost", "frost@tsc.com", Role::User),
];

const PLYMBRIDGE_POINTS: [SeedPoint; 5] = [
    SeedPoint { latitude: 50.3964, longitude: -4.0916, description: "Trail Start - Plymbridge Car Park", elevation: 50.0 },
    SeedPoint { latitude: 50.3972, longitude: -4.0923, description: "River Viewpoint - Great photo spot", elevation: 48.5 },
    SeedPoint { latitude: 50.3985, longitude: -4.0938, description: "Woodland Section - Ancient trees", elevation: 52.0 },
    SeedPoint { latitude: 50.3991, longitude: -4.0952, description: "Highest Point - View over valley", elevation: 55.5 },
    SeedPoint { latitude: 50.3964, longitude: -4.0916, description: "Trail End - Return to car park", elevation: 50.0 },
];

const DARTMOOR_POINTS: [SeedPoint; 4] = [
    SeedPoint { latitude: 50.5700, longitude: -3.9200, description: "Start - Princetown", elevation: 450.0 },
    SeedPoint { latitude: 50.5750, longitude: -3.9150, description: "Great Mis Tor", elevation: 520.0 },
    SeedPoint { latitude: 50.5800, longitude: -3.9100, description: "North Hessary Tor", elevation: 510.0 },
    SeedPoint { latitude: 50.5850, longitude: -3.9050, description: "Finish - Postbridge", elevation: 440.0 },
];

const TRAILS: [SeedTrail; 4] = [
    SeedTrail {
        name: "Plymbridge Circular Walk",
        location: "Plymbridge Woods",
        difficulty: Difficulty::Easy,
        length: 3.5,
        elevation_gain: 120,
        est_time: (90, 120),
        route_type: RouteType::Loop,
        description: "A circular walk through Plymbridge Woods along the River Plym. \
                      River views and ancient woodland, suitable for families.",
        owner: 0,
        is_public: true,
        points: &PLYMBRIDGE_POINTS,
        features: &["Forest", "River View", "Picnic Area", "Parking", "Toilets"],
        reviews: &[
            SeedReview {
                reviewer: 2,
                rating: 5,
                text: "Beautiful walk! Perfect for a sunny afternoon. The river views are stunning.",
            },
            SeedReview {
                reviewer: 3,
                rating: 4,
                text: "Great trail for beginners. Would be 5 stars if there were more signposts.",
            },
        ],
    },
    SeedTrail {
        name: "Dartmoor Challenge Route",
        location: "Dartmoor National Park",
        difficulty: Difficulty::Hard,
        length: 15.8,
        elevation_gain: 650,
        est_time: (300, 420),
        route_type: RouteType::PointToPoint,
        description: "A demanding crossing of Dartmoor with open moorland views. \
                      Hiking gear and navigation skills required.",
        owner: 1,
        is_public: true,
        points: &DARTMOOR_POINTS,
        features: &["Mountain View", "Wildlife", "Camping"],
        reviews: &[
            SeedReview {
                reviewer: 0,
                rating: 5,
                text: "Challenging but rewarding! Bring a map and compass.",
            },
            SeedReview {
                reviewer: 3,
                rating: 3,
                text: "Very difficult trail. Not for casual hikers. Views were amazing though.",
            },
        ],
    },
    SeedTrail {
        name: "Central Park Stroll",
        location: "Central Park",
        difficulty: Difficulty::Easy,
        length: 2.1,
        elevation_gain: 25,
        est_time: (45, 60),
        route_type: RouteType::OutAndBack,
        description: "A gentle stroll through Central Park. Family and wheelchair friendly.",
        owner: 2,
        is_public: true,
        points: &[],
        features: &["Forest", "Picnic Area", "Parking", "Toilets", "Historic Site"],
        reviews: &[SeedReview {
            reviewer: 1,
            rating: 4,
            text: "Perfect escape in the middle of the city. Busy on weekends but worth it.",
        }],
    },
    SeedTrail {
        name: "Private Test Trail",
        location: "Rocky Mountains",
        difficulty: Difficulty::Moderate,
        length: 8.5,
        elevation_gain: 320,
        est_time: (180, 240),
        route_type: RouteType::Loop,
        description: "A private trail used to check visibility rules. Hidden from other users.",
        owner: 3,
        is_public: false,
        points: &[],
        features: &[],
        reviews: &[],
    },
];

// --- Options & Report ---

/// SeedOptions
///
/// `admin_email` / `admin_username` replace the first seeded administrator,
/// so a deployment can seed an account that exists at its Authenticator API.
#[derive(Debug, Clone, Default)]
pub struct SeedOptions {
    pub admin_email: Option<String>,
    pub admin_username: Option<String>,
}

/// Rows touched per table, in the order the tables were processed.
#[derive(Debug, Default, PartialEq)]
pub struct SeedReport {
    pub tables: Vec<(&'static str, u64)>,
}

impl SeedReport {
    fn record(&mut self, table: &'static str, rows: u64) {
        match self.tables.iter_mut().find(|(name, _)| *name == table) {
            Some((_, total)) => *total += rows,
            None => self.tables.push((table, rows)),
        }
    }

    pub fn total(&self) -> u64 {
        self.tables.iter().map(|(_, rows)| rows).sum()
    }
}

impl fmt::Display for SeedReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (table, rows) in &self.tables {
            writeln!(f, "  CW2.{table:<14} {rows}")?;
        }
        write!(f, "  {:<18} {}", "total", self.total())
    }
}

fn seed_users(options: &SeedOptions) -> Vec<SeedUser> {
    let mut users: Vec<SeedUser> = USERS
        .iter()
        .map(|(username, email, role)| SeedUser {
            username: username.to_string(),
            email: email.to_string(),
            role: *role,
        })
        .collect();

    if let Some(admin) = users.iter_mut().find(|user| user.role == Role::Admin) {
        if let Some(email) = &options.admin_email {
            admin.email = email.trim().to_lowercase();
        }
        if let Some(username) = &options.admin_username {
            admin.username = username.trim().to_string();
        }
    }
    users
}

/// split_batches
///
/// Splits a T-SQL script on `GO` separator lines (case-insensitive, alone on
/// their line). Blank batches are dropped.
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();

    for line in script.lines() {
        if line.trim().eq_ignore_ascii_case("go") {
            if !current.trim().is_empty() {
                batches.push(current.trim().to_string());
            }
            current.clear();
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    if !current.trim().is_empty() {
        batches.push(current.trim().to_string());
    }
    batches
}

async fn conn(pool: &SqlPool) -> RepoResult<PooledConn<'_>> {
    pool.get().await.map_err(|e| RepoError::Pool(e.to_string()))
}

/// apply_schema
///
/// Runs each batch of `script` in order. Returns the number of batches executed.
pub async fn apply_schema(pool: &SqlPool, script: &str) -> RepoResult<usize> {
    let mut conn = conn(pool).await?;
    let batches = split_batches(script);
    for (index, batch) in batches.iter().enumerate() {
        tracing::debug!(batch = index + 1, "Applying schema batch");
        conn.simple_query(batch.as_str())
            .await?
            .into_results()
            .await?;
    }
    Ok(batches.len())
}

/// reset
///
/// Deletes every row, children first. Returns rows deleted per table.
pub async fn reset(pool: &SqlPool) -> RepoResult<SeedReport> {
    let mut conn = conn(pool).await?;
    let mut report = SeedReport::default();
    for table in RESET_ORDER {
        let deleted = conn
            .execute(format!("DELETE FROM CW2.{table}"), &[])
            .await?
            .total();
        tracing::info!(table, deleted, "Cleared table");
        report.record(table, deleted);
    }
    Ok(report)
}

/// seed
///
/// Inserts the reference and sample data. Every insert is guarded by its
/// natural key, so running it twice inserts nothing the second time.
///
/// 1. Countries by name, cities by name + country.
/// 2. Locations by name, features by name.
/// 3. Users by e-mail.
/// 4. Trails by name + owner, then their points by order, feature tags by
///    feature and reviews by reviewer.
pub async fn seed(pool: &SqlPool, options: &SeedOptions) -> RepoResult<SeedReport> {
    let mut conn = conn(pool).await?;
    let mut report = SeedReport::default();

    // 1. Geography
    for country in COUNTRIES {
        let inserted = conn
            .execute(
                "INSERT INTO CW2.Country (CountryName) \
                 SELECT @P1 WHERE NOT EXISTS (SELECT 1 FROM CW2.Country WHERE CountryName = @P1)",
                &[&country],
            )
            .await?
            .total();
        report.record("Country", inserted);
    }

    for city in &CITIES {
        let inserted = conn
            .execute(
                "INSERT INTO CW2.City (CityName, CountryID) \
                 SELECT @P1, co.CountryID FROM CW2.Country co \
                 WHERE co.CountryName = @P2 \
                   AND NOT EXISTS (SELECT 1 FROM CW2.City c \
                                   WHERE c.CityName = @P1 AND c.CountryID = co.CountryID)",
                &[&city.name, &city.country],
            )
            .await?
            .total();
        report.record("City", inserted);
    }

    // 2. Locations
    for location in &LOCATIONS {
        let inserted = conn
            .execute(
                "INSERT INTO CW2.Location (LocationName, CityID, CountryID, Coordinates) \
                 SELECT @P1, \
                        (SELECT c.CityID FROM CW2.City c \
                         WHERE c.CityName = @P2 AND c.CountryID = co.CountryID), \
                        co.CountryID, @P4 \
                 FROM CW2.Country co \
                 WHERE co.CountryName = @P3 \
                   AND NOT EXISTS (SELECT 1 FROM CW2.Location WHERE LocationName = @P1)",
                &[
                    &location.name,
                    &location.city,
                    &location.country,
                    &location.coordinates,
                ],
            )
            .await?
            .total();
        report.record("Location", inserted);
    }

    for (name, description) in FEATURES {
        let inserted = conn
            .execute(
                "INSERT INTO CW2.Feature (FeatureName, Description) \
                 SELECT @P1, @P2 WHERE NOT EXISTS (SELECT 1 FROM CW2.Feature WHERE FeatureName = @P1)",
                &[&name, &description],
            )
            .await?
            .total();
        report.record("Feature", inserted);
    }

    // 3. Users
    let users = seed_users(options);
    for user in &users {
        let inserted = conn
            .execute(
                "INSERT INTO CW2.[User] (Username, Email, Role, CreatedAt) \
                 SELECT @P1, @P2, @P3, SYSUTCDATETIME() \
                 WHERE NOT EXISTS (SELECT 1 FROM CW2.[User] WHERE Email = @P2)",
                &[&user.username.as_str(), &user.email.as_str(), &user.role.as_str()],
            )
            .await?
            .total();
        if inserted > 0 {
            tracing::info!(email = %user.email, role = %user.role, "Seeded user");
        }
        report.record("User", inserted);
    }

    // 4. Trails and points
    for trail in &TRAILS {
        let owner = users
            .get(trail.owner)
            .ok_or_else(|| RepoError::Decode(format!("No seed user for trail {}", trail.name)))?;

        let inserted = conn
            .execute(
                "INSERT INTO CW2.Trail (TrailName, LocationID, Difficulty, Length, ElevationGain, \
                 EstTimeMin, EstTimeMax, RouteType, Description, UserID, IsPublic, CreatedAt, UpdatedAt) \
                 SELECT @P1, (SELECT LocationID FROM CW2.Location WHERE LocationName = @P2), \
                        @P3, @P4, @P5, @P6, @P7, @P8, @P9, u.UserID, @P11, \
                        SYSUTCDATETIME(), SYSUTCDATETIME() \
                 FROM CW2.[User] u \
                 WHERE u.Email = @P10 \
                   AND NOT EXISTS (SELECT 1 FROM CW2.Trail t \
                                   WHERE t.TrailName = @P1 AND t.UserID = u.UserID)",
                &[
                    &trail.name,
                    &trail.location,
                    &trail.difficulty.as_str(),
                    &trail.length,
                    &trail.elevation_gain,
                    &trail.est_time.0,
                    &trail.est_time.1,
                    &trail.route_type.as_str(),
                    &trail.description,
                    &owner.email.as_str(),
                    &trail.is_public,
                ],
            )
            .await?
            .total();
        report.record("Trail", inserted);

        let row = conn
            .query(
                "SELECT t.TrailID FROM CW2.Trail t \
                 JOIN CW2.[User] u ON t.UserID = u.UserID \
                 WHERE t.TrailName = @P1 AND u.Email = @P2",
                &[&trail.name, &owner.email.as_str()],
            )
            .await?
            .into_row()
            .await?;
        let trail_id = match row {
            Some(row) => row.try_get::<i32, _>("TrailID")?,
            None => None,
        }
        .ok_or_else(|| RepoError::Decode(format!("Seeded trail {} not found", trail.name)))?;

        for (index, point) in trail.points.iter().enumerate() {
            let point_order = index as i32 + 1;
            let inserted = conn
                .execute(
                    "INSERT INTO CW2.Trail_Point \
                     (TrailID, PointOrder, Latitude, Longitude, Description, Elevation, CreatedAt) \
                     SELECT @P1, @P2, @P3, @P4, @P5, @P6, SYSUTCDATETIME() \
                     WHERE NOT EXISTS (SELECT 1 FROM CW2.Trail_Point \
                                       WHERE TrailID = @P1 AND PointOrder = @P2)",
                    &[
                        &trail_id,
                        &point_order,
                        &point.latitude,
                        &point.longitude,
                        &point.description,
                        &point.elevation,
                    ],
                )
                .await?
                .total();
            report.record("Trail_Point", inserted);
        }

        for feature in trail.features {
            let inserted = conn
                .execute(
                    "INSERT INTO CW2.Trail_Feature (TrailID, FeatureID, AddedBy, AddedAt) \
                     SELECT @P1, f.FeatureID, u.UserID, SYSUTCDATETIME() \
                     FROM CW2.Feature f CROSS JOIN CW2.[User] u \
                     WHERE f.FeatureName = @P2 AND u.Email = @P3 \
                       AND NOT EXISTS (SELECT 1 FROM CW2.Trail_Feature tf \
                                       WHERE tf.TrailID = @P1 AND tf.FeatureID = f.FeatureID)",
                    &[&trail_id, feature, &owner.email.as_str()],
                )
                .await?
                .total();
            report.record("Trail_Feature", inserted);
        }

        for review in trail.reviews {
            let reviewer = users.get(review.reviewer).ok_or_else(|| {
                RepoError::Decode(format!("No seed user for a review of {}", trail.name))
            })?;
            let inserted = conn
                .execute(
                    "INSERT INTO CW2.Review (TrailID, UserID, Rating, ReviewText, DateReviewed) \
                     SELECT @P1, u.UserID, @P2, @P3, SYSUTCDATETIME() FROM CW2.[User] u \
                     WHERE u.Email = @P4 \
                       AND NOT EXISTS (SELECT 1 FROM CW2.Review r \
                                       WHERE r.TrailID = @P1 AND r.UserID = u.UserID)",
                    &[&trail_id, &review.rating, &review.text, &reviewer.email.as_str()],
                )
                .await?
                .total();
            report.record("Review", inserted);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_script_splits_into_guarded_batches() {
        let batches = split_batches(SCHEMA_SQL);
        assert_eq!(batches.len(), 12);
        assert!(batches[0].contains("CREATE SCHEMA CW2"));
        assert!(batches.iter().all(|batch| !batch.lines().any(|l| l.trim().eq_ignore_ascii_case("go"))));
    }

    #[test]
    fn admin_override_replaces_first_admin_only() {
        let users = seed_users(&SeedOptions {
            admin_email: Some(" Ops@Example.COM ".to_string()),
            admin_username: Some("Ops".to_string()),
        });
        assert_eq!(users[0].email, "ops@example.com");
        assert_eq!(users[0].username, "Ops");
        assert_eq!(users[1].email, "tim@plymouth.ac.uk");
        assert_eq!(users.len(), USERS.len());
    }

    #[test]
    fn seed_trails_respect_validation_rules() {
        for trail in &TRAILS {
            assert!(trail.owner < USERS.len(), "{}", trail.name);
            assert!(trail.est_time.0 >= 1 && trail.est_time.0 <= trail.est_time.1, "{}", trail.name);
            assert!(LOCATIONS.iter().any(|l| l.name == trail.location), "{}", trail.name);
            for feature in trail.features {
                assert!(FEATURES.iter().any(|(name, _)| name == feature), "{feature}");
            }
            for review in trail.reviews {
                assert!(review.reviewer < USERS.len(), "{}", trail.name);
                assert_ne!(review.reviewer, trail.owner, "{}", trail.name);
                assert!((1..=5).contains(&review.rating), "{}", trail.name);
            }
        }
    }

    #[test]
    fn reset_clears_children_before_parents() {
        let position = |table: &str| RESET_ORDER.iter().position(|t| *t == table).unwrap();
        assert!(position("Review") < position("Trail"));
        assert!(position("Trail_Feature") < position("Feature"));
        assert!(position("Trail_Feature") < position("[User]"));
        assert!(position("Trail") < position("Location"));
    }

    #[test]
    fn report_accumulates_per_table() {
        let mut report = SeedReport::default();
        report.record("Trail_Point", 2);
        report.record("Trail", 1);
        report.record("Trail_Point", 3);
        assert_eq!(report.tables, vec![("Trail_Point", 5), ("Trail", 1)]);
        assert_eq!(report.total(), 6);
    }
}
