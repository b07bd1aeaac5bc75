use std::{
    collections::BTreeMap,
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use super::{RepoResult, Repository};
use crate::{
    error::RepoError,
    models::{
        ActivityEntry, City, Country, Feature, Location, LocationFields, LocationFilter,
        NewLogEntry, NewTrail, NewTrailPoint, NewUser, ReviewSummary, Role, Trail, TrailFields,
        TrailFilter, TrailPoint, TrailStats, TrailSummary, TrailUpdate, User, UserFilter,
    },
};

#[derive(Clone)]
struct LogRow {
    user_id: i32,
    entry: ActivityEntry,
}

#[derive(Clone, Copy)]
struct ReviewRow {
    trail_id: i32,
    rating: i32,
}

#[derive(Default)]
struct Store {
    countries: BTreeMap<i32, Country>,
    cities: BTreeMap<i32, City>,
    locations: BTreeMap<i32, (String, LocationFields)>,
    users: BTreeMap<i32, User>,
    trails: BTreeMap<i32, Trail>,
    points: BTreeMap<i32, TrailPoint>,
    features: BTreeMap<i32, Feature>,
    // (trail_id, feature_id) -> added_by
    trail_features: BTreeMap<(i32, i32), Option<i32>>,
    reviews: Vec<ReviewRow>,
    logs: Vec<LogRow>,
    last_id: i32,
    last_timestamp: Option<DateTime<Utc>>,
}

impl Store {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    // Strictly increasing so "newest first" ordering is stable within a test.
    fn now(&mut self) -> DateTime<Utc> {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp
            && now <= last
        {
            now = last + Duration::microseconds(1);
        }
        self.last_timestamp = Some(now);
        now
    }

    fn location(&self, location_id: i32) -> Option<Location> {
        let (_, fields) = self.locations.get(&location_id)?;
        Some(Location {
            location_id,
            location_name: fields.location_name.clone(),
            city_id: fields.city_id,
            city_name: fields
                .city_id
                .and_then(|id| self.cities.get(&id))
                .map(|c| c.city_name.clone()),
            country_id: fields.country_id,
            country_name: fields
                .country_id
                .and_then(|id| self.countries.get(&id))
                .map(|c| c.country_name.clone()),
            coordinates: fields.coordinates,
        })
    }

    fn check_location_refs(&self, fields: &LocationFields, exclude: Option<i32>) -> RepoResult<()> {
        if let Some(city_id) = fields.city_id
            && !self.cities.contains_key(&city_id)
        {
            return Err(RepoError::Conflict(format!("City {city_id} does not exist")));
        }
        if let Some(country_id) = fields.country_id
            && !self.countries.contains_key(&country_id)
        {
            return Err(RepoError::Conflict(format!("Country {country_id} does not exist")));
        }
        let key = fields.location_name.to_lowercase();
        let duplicate = self
            .locations
            .iter()
            .any(|(id, (name, _))| Some(*id) != exclude && *name == key);
        if duplicate {
            return Err(RepoError::Conflict(format!(
                "Location {:?} already exists",
                fields.location_name
            )));
        }
        Ok(())
    }

    fn check_trail_refs(&self, fields: &TrailFields) -> RepoResult<()> {
        match fields.location_id {
            Some(location_id) if !self.locations.contains_key(&location_id) => Err(
                RepoError::Conflict(format!("Location {location_id} does not exist")),
            ),
            _ => Ok(()),
        }
    }

    fn check_feature_refs(&self, feature_ids: &[i32]) -> RepoResult<()> {
        match feature_ids.iter().find(|id| !self.features.contains_key(id)) {
            Some(feature_id) => Err(RepoError::Conflict(format!(
                "Feature {feature_id} does not exist"
            ))),
            None => Ok(()),
        }
    }

    fn attach_features(&mut self, trail_id: i32, feature_ids: &[i32], added_by: i32) {
        for feature_id in feature_ids {
            self.trail_features
                .entry((trail_id, *feature_id))
                .or_insert(Some(added_by));
        }
    }

    fn visible(&self, trail: &Trail, filter: &TrailFilter) -> bool {
        let visible = trail.is_public || filter.viewer == Some(trail.user_id);
        visible
            && filter.difficulty.is_none_or(|d| trail.difficulty == d)
            && filter.min_length.is_none_or(|min| trail.length >= min)
            && filter.max_length.is_none_or(|max| trail.length <= max)
            && filter.location_id.is_none_or(|id| trail.location_id == Some(id))
    }

    fn matching_trails(&self, filter: &TrailFilter) -> Vec<&Trail> {
        let mut trails: Vec<&Trail> = self
            .trails
            .values()
            .filter(|t| self.visible(t, filter))
            .collect();
        trails.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.trail_id.cmp(&a.trail_id))
        });
        trails
    }

    fn insert_point(&mut self, trail_id: i32, point_order: i32, point: &NewTrailPoint) -> TrailPoint {
        let point = TrailPoint {
            point_id: self.next_id(),
            trail_id,
            point_order,
            latitude: point.latitude,
            longitude: point.longitude,
            description: point.description.clone(),
            elevation: point.elevation,
            created_at: self.now(),
        };
        self.points.insert(point.point_id, point.clone());
        point
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn page<T>(items: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    items
        .into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

/// InMemoryRepository
///
/// A `Repository` held entirely in process memory. It enforces the same
/// foreign-key, uniqueness and ordering rules as the SQL Server schema, so the
/// HTTP layer can be exercised end to end without a database.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
    unavailable: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates a lost database: every operation fails with `RepoError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn seed_country(&self, country_name: &str) -> Country {
        let mut store = self.lock();
        let country = Country {
            country_id: store.next_id(),
            country_name: country_name.to_string(),
        };
        store.countries.insert(country.country_id, country.clone());
        country
    }

    pub fn seed_city(&self, city_name: &str, country_id: i32) -> City {
        let mut store = self.lock();
        let city = City {
            city_id: store.next_id(),
            city_name: city_name.to_string(),
            country_id,
        };
        store.cities.insert(city.city_id, city.clone());
        city
    }

    pub fn seed_user(&self, username: &str, email: &str, role: Role) -> User {
        let mut store = self.lock();
        let user = User {
            user_id: store.next_id(),
            username: username.to_string(),
            email: email.to_lowercase(),
            role,
            created_at: store.now(),
            last_login: None,
        };
        store.users.insert(user.user_id, user.clone());
        user
    }

    pub fn seed_feature(&self, feature_name: &str, description: Option<&str>) -> Feature {
        let mut store = self.lock();
        let feature = Feature {
            feature_id: store.next_id(),
            feature_name: feature_name.to_string(),
            description: description.map(str::to_string),
            icon_url: None,
        };
        store.features.insert(feature.feature_id, feature.clone());
        feature
    }

    /// Records a review. Ratings outside 1-5 and unknown trails or users are
    /// rejected like the table's CHECK and foreign keys would.
    pub fn seed_review(&self, trail_id: i32, user_id: i32, rating: i32) -> RepoResult<()> {
        let mut store = self.lock();
        if !(1..=5).contains(&rating) {
            return Err(RepoError::Conflict(format!("Rating {rating} is outside 1-5")));
        }
        if !store.trails.contains_key(&trail_id) || !store.users.contains_key(&user_id) {
            return Err(RepoError::Conflict(format!(
                "Review references missing trail {trail_id} or user {user_id}"
            )));
        }
        store.reviews.push(ReviewRow { trail_id, rating });
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> RepoResult<MutexGuard<'_, Store>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(RepoError::Unavailable);
        }
        Ok(self.lock())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn ping(&self) -> RepoResult<()> {
        self.open().map(|_| ())
    }

    async fn list_trails(&self, filter: &TrailFilter) -> RepoResult<Vec<TrailSummary>> {
        let store = self.open()?;
        let summaries = store
            .matching_trails(filter)
            .into_iter()
            .map(|trail| TrailSummary {
                trail: trail.clone(),
                username: store.users.get(&trail.user_id).map(|u| u.username.clone()),
                location_name: trail
                    .location_id
                    .and_then(|id| store.locations.get(&id))
                    .map(|(_, fields)| fields.location_name.clone()),
            })
            .collect();
        Ok(page(summaries, filter.offset, filter.limit))
    }

    async fn count_trails(&self, filter: &TrailFilter) -> RepoResult<i64> {
        let store = self.open()?;
        Ok(store.matching_trails(filter).len() as i64)
    }

    async fn get_trail(&self, trail_id: i32) -> RepoResult<Option<Trail>> {
        Ok(self.open()?.trails.get(&trail_id).cloned())
    }

    async fn create_trail(&self, owner_id: i32, trail: &NewTrail) -> RepoResult<Trail> {
        let mut store = self.open()?;
        if !store.users.contains_key(&owner_id) {
            return Err(RepoError::Conflict(format!("User {owner_id} does not exist")));
        }
        store.check_trail_refs(&trail.fields)?;
        store.check_feature_refs(&trail.feature_ids)?;

        let f = &trail.fields;
        let now = store.now();
        let created = Trail {
            trail_id: store.next_id(),
            trail_name: f.trail_name.clone(),
            location_id: f.location_id,
            difficulty: f.difficulty,
            length: f.length,
            elevation_gain: f.elevation_gain,
            est_time_min: f.est_time_min,
            est_time_max: f.est_time_max,
            route_type: f.route_type,
            description: f.description.clone(),
            user_id: owner_id,
            is_public: f.is_public,
            created_at: now,
            updated_at: now,
        };
        store.trails.insert(created.trail_id, created.clone());
        for (index, point) in trail.points.iter().enumerate() {
            store.insert_point(created.trail_id, index as i32 + 1, point);
        }
        store.attach_features(created.trail_id, &trail.feature_ids, owner_id);
        Ok(created)
    }

    async fn update_trail(&self, trail_id: i32, editor_id: i32, update: &TrailUpdate) -> RepoResult<Option<Trail>> {
        let mut store = self.open()?;
        if !store.trails.contains_key(&trail_id) {
            return Ok(None);
        }
        let fields: &TrailFields = &update.fields;
        store.check_trail_refs(fields)?;
        if let Some(feature_ids) = &update.feature_ids {
            store.check_feature_refs(feature_ids)?;
            // Kept tags keep their original tagger.
            store
                .trail_features
                .retain(|(trail, feature), _| *trail != trail_id || feature_ids.contains(feature));
            store.attach_features(trail_id, feature_ids, editor_id);
        }
        let now = store.now();

        let Some(trail) = store.trails.get_mut(&trail_id) else {
            return Ok(None);
        };
        trail.trail_name = fields.trail_name.clone();
        trail.location_id = fields.location_id;
        trail.difficulty = fields.difficulty;
        trail.length = fields.length;
        trail.elevation_gain = fields.elevation_gain;
        trail.est_time_min = fields.est_time_min;
        trail.est_time_max = fields.est_time_max;
        trail.route_type = fields.route_type;
        trail.description = fields.description.clone();
        trail.is_public = fields.is_public;
        trail.updated_at = now;
        Ok(Some(trail.clone()))
    }

    async fn delete_trail(&self, trail_id: i32) -> RepoResult<bool> {
        let mut store = self.open()?;
        let removed = store.trails.remove(&trail_id).is_some();
        if removed {
            store.points.retain(|_, p| p.trail_id != trail_id);
            store.trail_features.retain(|(trail, _), _| *trail != trail_id);
            store.reviews.retain(|r| r.trail_id != trail_id);
        }
        Ok(removed)
    }

    async fn list_user_trails(&self, user_id: i32, include_private: bool) -> RepoResult<Vec<Trail>> {
        let store = self.open()?;
        let mut trails: Vec<Trail> = store
            .trails
            .values()
            .filter(|t| t.user_id == user_id && (include_private || t.is_public))
            .cloned()
            .collect();
        trails.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(b.trail_id.cmp(&a.trail_id))
        });
        Ok(trails)
    }

    async fn user_trail_stats(&self, user_id: i32) -> RepoResult<TrailStats> {
        let store = self.open()?;
        let (total, public) = store
            .trails
            .values()
            .filter(|t| t.user_id == user_id)
            .fold((0, 0), |(total, public), t| (total + 1, public + i64::from(t.is_public)));
        Ok(TrailStats {
            total_trails: total,
            public_trails: public,
            private_trails: total - public,
        })
    }

    async fn list_trail_points(&self, trail_id: i32) -> RepoResult<Vec<TrailPoint>> {
        let store = self.open()?;
        let mut points: Vec<TrailPoint> = store
            .points
            .values()
            .filter(|p| p.trail_id == trail_id)
            .cloned()
            .collect();
        points.sort_by_key(|p| (p.point_order, p.point_id));
        Ok(points)
    }

    async fn add_trail_point(&self, trail_id: i32, point: &NewTrailPoint) -> RepoResult<TrailPoint> {
        let mut store = self.open()?;
        if !store.trails.contains_key(&trail_id) {
            return Err(RepoError::Conflict(format!("Trail {trail_id} does not exist")));
        }
        let next_order = store
            .points
            .values()
            .filter(|p| p.trail_id == trail_id)
            .map(|p| p.point_order)
            .max()
            .unwrap_or(0)
            + 1;
        Ok(store.insert_point(trail_id, next_order, point))
    }

    async fn list_features(&self) -> RepoResult<Vec<Feature>> {
        let store = self.open()?;
        let mut features: Vec<Feature> = store.features.values().cloned().collect();
        features.sort_by_cached_key(|f| (f.feature_name.to_lowercase(), f.feature_id));
        Ok(features)
    }

    async fn list_trail_features(&self, trail_id: i32) -> RepoResult<Vec<Feature>> {
        let store = self.open()?;
        let mut features: Vec<Feature> = store
            .trail_features
            .keys()
            .filter(|(trail, _)| *trail == trail_id)
            .filter_map(|(_, feature_id)| store.features.get(feature_id).cloned())
            .collect();
        features.sort_by_cached_key(|f| (f.feature_name.to_lowercase(), f.feature_id));
        Ok(features)
    }

    async fn trail_review_summary(&self, trail_id: i32) -> RepoResult<ReviewSummary> {
        let store = self.open()?;
        Ok(ReviewSummary::from_ratings(
            store
                .reviews
                .iter()
                .filter(|r| r.trail_id == trail_id)
                .map(|r| r.rating),
        ))
    }

    async fn list_locations(&self, filter: &LocationFilter) -> RepoResult<Vec<Location>> {
        let store = self.open()?;
        let mut locations: Vec<Location> = store
            .locations
            .keys()
            .filter_map(|id| store.location(*id))
            .filter(|l| filter.city_id.is_none_or(|id| l.city_id == Some(id)))
            .filter(|l| filter.country_id.is_none_or(|id| l.country_id == Some(id)))
            .filter(|l| {
                filter
                    .name
                    .as_deref()
                    .is_none_or(|name| contains_ci(&l.location_name, name))
            })
            .collect();
        // Case-insensitive, like the database's default collation.
        locations.sort_by_cached_key(|l| (l.location_name.to_lowercase(), l.location_id));
        Ok(page(locations, filter.offset, filter.limit))
    }

    async fn get_location(&self, location_id: i32) -> RepoResult<Option<Location>> {
        Ok(self.open()?.location(location_id))
    }

    async fn create_location(&self, fields: &LocationFields) -> RepoResult<Location> {
        let mut store = self.open()?;
        store.check_location_refs(fields, None)?;
        let location_id = store.next_id();
        store.locations.insert(
            location_id,
            (fields.location_name.to_lowercase(), fields.clone()),
        );
        store.location(location_id).ok_or(RepoError::NotFound)
    }

    async fn update_location(&self, location_id: i32, fields: &LocationFields) -> RepoResult<Option<Location>> {
        let mut store = self.open()?;
        if !store.locations.contains_key(&location_id) {
            return Ok(None);
        }
        store.check_location_refs(fields, Some(location_id))?;
        store.locations.insert(
            location_id,
            (fields.location_name.to_lowercase(), fields.clone()),
        );
        Ok(store.location(location_id))
    }

    async fn delete_location(&self, location_id: i32) -> RepoResult<bool> {
        let mut store = self.open()?;
        if store
            .trails
            .values()
            .any(|t| t.location_id == Some(location_id))
        {
            return Err(RepoError::Conflict(format!(
                "Location {location_id} is referenced by trails"
            )));
        }
        Ok(store.locations.remove(&location_id).is_some())
    }

    async fn list_countries(&self, name: Option<&str>) -> RepoResult<Vec<Country>> {
        let store = self.open()?;
        let mut countries: Vec<Country> = store
            .countries
            .values()
            .filter(|c| name.is_none_or(|n| contains_ci(&c.country_name, n)))
            .cloned()
            .collect();
        countries.sort_by_cached_key(|c| (c.country_name.to_lowercase(), c.country_id));
        Ok(countries)
    }

    async fn get_country(&self, country_id: i32) -> RepoResult<Option<Country>> {
        Ok(self.open()?.countries.get(&country_id).cloned())
    }

    async fn list_cities(&self, country_id: Option<i32>, name: Option<&str>) -> RepoResult<Vec<City>> {
        let store = self.open()?;
        let mut cities: Vec<City> = store
            .cities
            .values()
            .filter(|c| country_id.is_none_or(|id| c.country_id == id))
            .filter(|c| name.is_none_or(|n| contains_ci(&c.city_name, n)))
            .cloned()
            .collect();
        cities.sort_by_cached_key(|c| (c.city_name.to_lowercase(), c.city_id));
        Ok(cities)
    }

    async fn get_city(&self, city_id: i32) -> RepoResult<Option<City>> {
        Ok(self.open()?.cities.get(&city_id).cloned())
    }

    async fn get_user(&self, user_id: i32) -> RepoResult<Option<User>> {
        Ok(self.open()?.users.get(&user_id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let email = email.to_lowercase();
        Ok(self
            .open()?
            .users
            .values()
            .find(|u| u.email == email)
            .cloned())
    }

    async fn create_user(&self, user: &NewUser) -> RepoResult<User> {
        let mut store = self.open()?;
        let email = user.email.to_lowercase();
        if store.users.values().any(|u| u.email == email) {
            return Err(RepoError::Conflict(format!("User {email} already exists")));
        }
        let created = User {
            user_id: store.next_id(),
            username: user.username.clone(),
            email,
            role: user.role,
            created_at: store.now(),
            last_login: None,
        };
        store.users.insert(created.user_id, created.clone());
        Ok(created)
    }

    async fn touch_last_login(&self, user_id: i32) -> RepoResult<()> {
        let mut store = self.open()?;
        let now = store.now();
        let user = store.users.get_mut(&user_id).ok_or(RepoError::NotFound)?;
        user.last_login = Some(now);
        Ok(())
    }

    async fn list_users(&self, filter: &UserFilter) -> RepoResult<Vec<User>> {
        let store = self.open()?;
        let users: Vec<User> = store
            .users
            .values()
            .filter(|u| filter.role.is_none_or(|role| u.role == role))
            .filter(|u| {
                filter.search.as_deref().is_none_or(|term| {
                    contains_ci(&u.username, term) || contains_ci(&u.email, term)
                })
            })
            .cloned()
            .collect();
        Ok(page(users, filter.offset, filter.limit))
    }

    async fn set_user_role(&self, user_id: i32, role: Role) -> RepoResult<Option<User>> {
        let mut store = self.open()?;
        Ok(store.users.get_mut(&user_id).map(|user| {
            user.role = role;
            user.clone()
        }))
    }

    async fn log_action(&self, entry: &NewLogEntry) -> RepoResult<()> {
        let mut store = self.open()?;
        let row = LogRow {
            user_id: entry.user_id,
            entry: ActivityEntry {
                log_id: store.next_id(),
                trail_id: entry.trail_id,
                action: entry.action.as_str().to_string(),
                action_date: store.now(),
                details: Some(entry.details.clone()),
            },
        };
        store.logs.push(row);
        Ok(())
    }

    async fn recent_activity(&self, user_id: i32, limit: i64) -> RepoResult<Vec<ActivityEntry>> {
        let store = self.open()?;
        let mut entries: Vec<ActivityEntry> = store
            .logs
            .iter()
            .filter(|row| row.user_id == user_id)
            .map(|row| row.entry.clone())
            .collect();
        entries.sort_by(|a, b| {
            b.action_date
                .cmp(&a.action_date)
                .then(b.log_id.cmp(&a.log_id))
        });
        entries.truncate(limit.max(0) as usize);
        Ok(entries)
    }
}
