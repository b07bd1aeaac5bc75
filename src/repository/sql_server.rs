use std::time::Duration;

use async_trait::async_trait;
use bb8::ManageConnection;
use bb8_tiberius::ConnectionManager;

use super::{
    RepoResult, Repository,
    query::QueryBuilder,
    rows::{
        FEATURE_COLUMNS, FromRow, LOCATION_SELECT, POINT_OUTPUT, TRAIL_COLUMNS, USER_COLUMNS,
        USER_OUTPUT, collect, count,
    },
};
use crate::{
    error::RepoError,
    models::{
        ActivityEntry, City, Country, Feature, Location, LocationFields, LocationFilter,
        NewLogEntry, NewTrail, NewTrailPoint, NewUser, ReviewSummary, Role, Trail, TrailFilter,
        TrailPoint, TrailStats, TrailSummary, TrailUpdate, User, UserFilter,
    },
};

/// Connection pool handle shared by the repository and the seeding binary.
pub type SqlPool = bb8::Pool<SessionResetManager>;

/// A connection checked out of [`SqlPool`].
pub type PooledConn<'a> = bb8::PooledConnection<'a, SessionResetManager>;

// Runs on every checkout: a borrower dropped mid-transaction must not hand
// the open transaction to the next one.
const RESET_SESSION: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION; SELECT 1";

/// SessionResetManager
///
/// bb8 manager around the tiberius one. Its checkout test rolls back any
/// transaction still open on the connection, so each borrower starts in
/// autocommit mode.
pub struct SessionResetManager {
    inner: ConnectionManager,
}

impl SessionResetManager {
    pub fn new(config: tiberius::Config) -> Self {
        Self {
            inner: ConnectionManager::new(config),
        }
    }
}

#[async_trait]
impl ManageConnection for SessionResetManager {
    type Connection = <ConnectionManager as ManageConnection>::Connection;
    type Error = <ConnectionManager as ManageConnection>::Error;

    async fn connect(&self) -> Result<Self::Connection, Self::Error> {
        self.inner.connect().await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.simple_query(RESET_SESSION).await?.into_results().await?;
        Ok(())
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        self.inner.has_broken(conn)
    }
}

const POINT_COLUMNS: &str =
    "PointID, TrailID, PointOrder, Latitude, Longitude, Description, Elevation, CreatedAt";

/// connect_pool
///
/// Builds the SQL Server connection pool from an ADO.NET connection string,
/// e.g. `server=tcp:localhost,1433;database=TrailService;user=sa;password=...;TrustServerCertificate=true`.
pub async fn connect_pool(connection_string: &str, max_size: u32) -> RepoResult<SqlPool> {
    let config = tiberius::Config::from_ado_string(connection_string)?;
    bb8::Pool::builder()
        .max_size(max_size)
        .connection_timeout(Duration::from_secs(10))
        .test_on_check_out(true)
        .build(SessionResetManager::new(config))
        .await
        .map_err(|e| RepoError::Pool(e.to_string()))
}

/// SqlServerRepository
///
/// `Repository` backed by SQL Server through a bb8 pool of tiberius clients.
/// Each operation checks a connection out for its own duration only.
pub struct SqlServerRepository {
    pool: SqlPool,
}

impl SqlServerRepository {
    pub fn new(pool: SqlPool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> RepoResult<PooledConn<'_>> {
        self.pool
            .get()
            .await
            .map_err(|e| RepoError::Pool(e.to_string()))
    }

    async fn fetch_all<T: FromRow + Send>(&self, query: &QueryBuilder) -> RepoResult<Vec<T>> {
        let mut conn = self.conn().await?;
        let params = query.params();
        let rows = conn
            .query(query.sql(), &params)
            .await?
            .into_first_result()
            .await?;
        collect(rows)
    }
}

// --- Write batches ---
//
// Multi-statement writes go to the server as one batch under XACT_ABORT, so
// any error rolls the whole transaction back server-side and no transaction
// stays open on the connection between requests.

const TRAIL_INSERT_COLUMNS: &str = "TrailName, LocationID, Difficulty, Length, ElevationGain, \
     EstTimeMin, EstTimeMax, RouteType, Description, UserID, IsPublic, CreatedAt, UpdatedAt";

/// Declares `@Features` and fills it with `feature_ids`.
fn push_feature_table(query: &mut QueryBuilder, feature_ids: &[i32]) {
    query.push(" DECLARE @Features TABLE (FeatureID INT NOT NULL PRIMARY KEY);");
    if feature_ids.is_empty() {
        return;
    }
    query.push(" INSERT INTO @Features (FeatureID) VALUES ");
    for (index, feature_id) in feature_ids.iter().enumerate() {
        if index > 0 {
            query.push(", ");
        }
        query.push("(").push_bind(*feature_id).push(")");
    }
    query.push(";");
}

// Unknown ids fail FK_Trail_Feature_Feature, which aborts the batch.
const ATTACH_FEATURES: &str = " INSERT INTO CW2.Trail_Feature (TrailID, FeatureID, AddedBy, AddedAt) \
     SELECT @TrailID, f.FeatureID, @UserID, SYSUTCDATETIME() FROM @Features f \
     WHERE NOT EXISTS (SELECT 1 FROM CW2.Trail_Feature tf \
                       WHERE tf.TrailID = @TrailID AND tf.FeatureID = f.FeatureID);";

/// create_trail_batch
///
/// Trail row, points numbered 1..n and feature tags in one transaction,
/// finishing with a SELECT of the stored trail.
fn create_trail_batch(owner_id: i32, trail: &NewTrail) -> QueryBuilder {
    let f = &trail.fields;
    let mut query = QueryBuilder::new("SET XACT_ABORT ON; SET NOCOUNT ON; DECLARE @TrailID INT, @UserID INT = ");
    query.push_bind(owner_id).push(";");
    push_feature_table(&mut query, &trail.feature_ids);

    query.push(format!(" BEGIN TRANSACTION; INSERT INTO CW2.Trail ({TRAIL_INSERT_COLUMNS}) VALUES (").as_str());
    query
        .push_bind(f.trail_name.clone())
        .push(", ")
        .push_bind(f.location_id)
        .push(", ")
        .push_bind(f.difficulty.as_str())
        .push(", ")
        .push_bind(f.length)
        .push(", ")
        .push_bind(f.elevation_gain)
        .push(", ")
        .push_bind(f.est_time_min)
        .push(", ")
        .push_bind(f.est_time_max)
        .push(", ")
        .push_bind(f.route_type.as_str())
        .push(", ")
        .push_bind(f.description.clone())
        .push(", @UserID, ")
        .push_bind(f.is_public)
        .push(", SYSUTCDATETIME(), SYSUTCDATETIME()); SET @TrailID = CAST(SCOPE_IDENTITY() AS INT);");

    if !trail.points.is_empty() {
        query.push(
            " INSERT INTO CW2.Trail_Point \
             (TrailID, PointOrder, Latitude, Longitude, Description, Elevation, CreatedAt) VALUES ",
        );
        for (index, point) in trail.points.iter().enumerate() {
            if index > 0 {
                query.push(", ");
            }
            query
                .push("(@TrailID, ")
                .push_bind(index as i32 + 1)
                .push(", ")
                .push_bind(point.latitude)
                .push(", ")
                .push_bind(point.longitude)
                .push(", ")
                .push_bind(point.description.clone())
                .push(", ")
                .push_bind(point.elevation)
                .push(", SYSUTCDATETIME())");
        }
        query.push(";");
    }

    query.push(ATTACH_FEATURES);
    query.push(
        format!(" COMMIT TRANSACTION; SELECT {TRAIL_COLUMNS} FROM CW2.Trail t WHERE t.TrailID = @TrailID")
            .as_str(),
    );
    query
}

/// update_trail_batch
///
/// Full-row update plus, when requested, replacement of the feature tags.
/// Tags kept across the update keep their original `AddedBy`. A missing trail
/// updates nothing and the final SELECT returns no row.
fn update_trail_batch(trail_id: i32, editor_id: i32, update: &TrailUpdate) -> QueryBuilder {
    let f = &update.fields;
    let mut query = QueryBuilder::new("SET XACT_ABORT ON; SET NOCOUNT ON; DECLARE @TrailID INT = ");
    query
        .push_bind(trail_id)
        .push(", @UserID INT = ")
        .push_bind(editor_id)
        .push(", @Updated INT;");
    if let Some(feature_ids) = &update.feature_ids {
        push_feature_table(&mut query, feature_ids);
    }

    query
        .push(" BEGIN TRANSACTION; UPDATE CW2.Trail SET TrailName = ")
        .push_bind(f.trail_name.clone())
        .push(", LocationID = ")
        .push_bind(f.location_id)
        .push(", Difficulty = ")
        .push_bind(f.difficulty.as_str())
        .push(", Length = ")
        .push_bind(f.length)
        .push(", ElevationGain = ")
        .push_bind(f.elevation_gain)
        .push(", EstTimeMin = ")
        .push_bind(f.est_time_min)
        .push(", EstTimeMax = ")
        .push_bind(f.est_time_max)
        .push(", RouteType = ")
        .push_bind(f.route_type.as_str())
        .push(", Description = ")
        .push_bind(f.description.clone())
        .push(", IsPublic = ")
        .push_bind(f.is_public)
        .push(", UpdatedAt = SYSUTCDATETIME() WHERE TrailID = @TrailID; SET @Updated = @@ROWCOUNT;");

    if update.feature_ids.is_some() {
        query.push(
            " IF @Updated > 0 BEGIN \
             DELETE FROM CW2.Trail_Feature WHERE TrailID = @TrailID \
             AND FeatureID NOT IN (SELECT FeatureID FROM @Features);",
        );
        query.push(ATTACH_FEATURES);
        query.push(" END");
    }

    query.push(
        format!(" COMMIT TRANSACTION; SELECT {TRAIL_COLUMNS} FROM CW2.Trail t WHERE t.TrailID = @TrailID")
            .as_str(),
    );
    query
}

fn push_trail_filter(query: &mut QueryBuilder, filter: &TrailFilter) {
    // Anonymous callers see public trails; a known viewer also sees their own.
    match filter.viewer {
        Some(viewer) => {
            query
                .push(" AND (t.IsPublic = 1 OR t.UserID = ")
                .push_bind(viewer)
                .push(")");
        }
        None => {
            query.push(" AND t.IsPublic = 1");
        }
    }
    if let Some(difficulty) = filter.difficulty {
        query
            .push(" AND t.Difficulty = ")
            .push_bind(difficulty.as_str().to_string());
    }
    if let Some(min_length) = filter.min_length {
        query.push(" AND t.Length >= ").push_bind(min_length);
    }
    if let Some(max_length) = filter.max_length {
        query.push(" AND t.Length <= ").push_bind(max_length);
    }
    if let Some(location_id) = filter.location_id {
        query.push(" AND t.LocationID = ").push_bind(location_id);
    }
}

async fn location_by_id(conn: &mut PooledConn<'_>, location_id: i32) -> RepoResult<Option<Location>> {
    let row = conn
        .query(format!("{LOCATION_SELECT} WHERE l.LocationID = @P1"), &[&location_id])
        .await?
        .into_row()
        .await?;
    row.as_ref().map(Location::from_row).transpose()
}

#[async_trait]
impl Repository for SqlServerRepository {
    async fn ping(&self) -> RepoResult<()> {
        let mut conn = self.conn().await?;
        conn.simple_query("SELECT 1").await?.into_results().await?;
        Ok(())
    }

    async fn list_trails(&self, filter: &TrailFilter) -> RepoResult<Vec<TrailSummary>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {TRAIL_COLUMNS}, u.Username, l.LocationName \
             FROM CW2.Trail t \
             LEFT JOIN CW2.[User] u ON t.UserID = u.UserID \
             LEFT JOIN CW2.Location l ON t.LocationID = l.LocationID \
             WHERE 1 = 1"
        ));
        push_trail_filter(&mut query, filter);
        query
            .push(" ORDER BY t.CreatedAt DESC, t.TrailID DESC OFFSET ")
            .push_bind(filter.offset)
            .push(" ROWS FETCH NEXT ")
            .push_bind(filter.limit)
            .push(" ROWS ONLY");

        self.fetch_all(&query).await
    }

    async fn count_trails(&self, filter: &TrailFilter) -> RepoResult<i64> {
        let mut query = QueryBuilder::new("SELECT COUNT(*) AS Total FROM CW2.Trail t WHERE 1 = 1");
        push_trail_filter(&mut query, filter);

        let mut conn = self.conn().await?;
        let params = query.params();
        let row = conn
            .query(query.sql(), &params)
            .await?
            .into_row()
            .await?
            .ok_or_else(|| RepoError::Decode("COUNT returned no row".to_string()))?;
        count(&row, "Total")
    }

    async fn get_trail(&self, trail_id: i32) -> RepoResult<Option<Trail>> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                format!("SELECT {TRAIL_COLUMNS} FROM CW2.Trail t WHERE t.TrailID = @P1"),
                &[&trail_id],
            )
            .await?
            .into_row()
            .await?;
        row.as_ref().map(Trail::from_row).transpose()
    }

    async fn create_trail(&self, owner_id: i32, trail: &NewTrail) -> RepoResult<Trail> {
        let query = create_trail_batch(owner_id, trail);
        let mut conn = self.conn().await?;
        let params = query.params();
        let row = conn
            .query(query.sql(), &params)
            .await?
            .into_row()
            .await?
            .ok_or_else(|| RepoError::Decode("INSERT returned no row".to_string()))?;
        Trail::from_row(&row)
    }

    async fn update_trail(&self, trail_id: i32, editor_id: i32, update: &TrailUpdate) -> RepoResult<Option<Trail>> {
        let query = update_trail_batch(trail_id, editor_id, update);
        let mut conn = self.conn().await?;
        let params = query.params();
        let row = conn
            .query(query.sql(), &params)
            .await?
            .into_row()
            .await?;
        row.as_ref().map(Trail::from_row).transpose()
    }

    async fn delete_trail(&self, trail_id: i32) -> RepoResult<bool> {
        let mut conn = self.conn().await?;
        // Points, feature tags and reviews are removed by ON DELETE CASCADE.
        let result = conn
            .execute("DELETE FROM CW2.Trail WHERE TrailID = @P1", &[&trail_id])
            .await?;
        Ok(result.total() > 0)
    }

    async fn list_user_trails(&self, user_id: i32, include_private: bool) -> RepoResult<Vec<Trail>> {
        let mut query = QueryBuilder::new(format!("SELECT {TRAIL_COLUMNS} FROM CW2.Trail t WHERE t.UserID = "));
        query.push_bind(user_id);
        if !include_private {
            query.push(" AND t.IsPublic = 1");
        }
        query.push(" ORDER BY t.CreatedAt DESC, t.TrailID DESC");
        self.fetch_all(&query).await
    }

    async fn user_trail_stats(&self, user_id: i32) -> RepoResult<TrailStats> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                "SELECT COUNT(*) AS TotalTrails, \
                 SUM(CASE WHEN IsPublic = 1 THEN 1 ELSE 0 END) AS PublicTrails \
                 FROM CW2.Trail WHERE UserID = @P1",
                &[&user_id],
            )
            .await?
            .into_row()
            .await?
            .ok_or_else(|| RepoError::Decode("COUNT returned no row".to_string()))?;

        let total_trails = count(&row, "TotalTrails")?;
        let public_trails = count(&row, "PublicTrails")?;
        Ok(TrailStats {
            total_trails,
            public_trails,
            private_trails: total_trails - public_trails,
        })
    }

    async fn list_trail_points(&self, trail_id: i32) -> RepoResult<Vec<TrailPoint>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {POINT_COLUMNS} FROM CW2.Trail_Point WHERE TrailID = "
        ));
        query.push_bind(trail_id).push(" ORDER BY PointOrder, PointID");
        self.fetch_all(&query).await
    }

    async fn add_trail_point(&self, trail_id: i32, point: &NewTrailPoint) -> RepoResult<TrailPoint> {
        // MAX over an empty set yields one NULL row, so the first point gets order 1.
        let sql = format!(
            "INSERT INTO CW2.Trail_Point \
             (TrailID, PointOrder, Latitude, Longitude, Description, Elevation, CreatedAt) \
             OUTPUT {POINT_OUTPUT} \
             SELECT @P1, ISNULL(MAX(PointOrder), 0) + 1, @P2, @P3, @P4, @P5, SYSUTCDATETIME() \
             FROM CW2.Trail_Point WHERE TrailID = @P1"
        );
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                sql,
                &[
                    &trail_id,
                    &point.latitude,
                    &point.longitude,
                    &point.description.as_deref(),
                    &point.elevation,
                ],
            )
            .await?
            .into_row()
            .await?
            .ok_or_else(|| RepoError::Decode("INSERT returned no row".to_string()))?;
        TrailPoint::from_row(&row)
    }

    async fn list_features(&self) -> RepoResult<Vec<Feature>> {
        let query = QueryBuilder::new(format!(
            "SELECT {FEATURE_COLUMNS} FROM CW2.Feature f ORDER BY f.FeatureName, f.FeatureID"
        ));
        self.fetch_all(&query).await
    }

    async fn list_trail_features(&self, trail_id: i32) -> RepoResult<Vec<Feature>> {
        let mut query = QueryBuilder::new(format!(
            "SELECT {FEATURE_COLUMNS} FROM CW2.Feature f \
             JOIN CW2.Trail_Feature tf ON tf.FeatureID = f.FeatureID \
             WHERE tf.TrailID = "
        ));
        query.push_bind(trail_id).push(" ORDER BY f.FeatureName, f.FeatureID");
        self.fetch_all(&query).await
    }

    async fn trail_review_summary(&self, trail_id: i32) -> RepoResult<ReviewSummary> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                "SELECT COUNT(*) AS TotalReviews, AVG(CAST(Rating AS FLOAT)) AS AverageRating, \
                 SUM(CASE WHEN Rating = 5 THEN 1 ELSE 0 END) AS FiveStar, \
                 SUM(CASE WHEN Rating = 4 THEN 1 ELSE 0 END) AS FourStar, \
                 SUM(CASE WHEN Rating = 3 THEN 1 ELSE 0 END) AS ThreeStar, \
                 SUM(CASE WHEN Rating = 2 THEN 1 ELSE 0 END) AS TwoStar, \
                 SUM(CASE WHEN Rating = 1 THEN 1 ELSE 0 END) AS OneStar \
                 FROM CW2.Review WHERE TrailID = @P1",
                &[&trail_id],
            )
            .await?
            .into_row()
            .await?
            .ok_or_else(|| RepoError::Decode("COUNT returned no row".to_string()))?;
        ReviewSummary::from_row(&row)
    }

    async fn list_locations(&self, filter: &LocationFilter) -> RepoResult<Vec<Location>> {
        let mut query = QueryBuilder::new(format!("{LOCATION_SELECT} WHERE 1 = 1"));
        if let Some(city_id) = filter.city_id {
            query.push(" AND l.CityID = ").push_bind(city_id);
        }
        if let Some(country_id) = filter.country_id {
            query.push(" AND l.CountryID = ").push_bind(country_id);
        }
        if let Some(name) = &filter.name {
            query.push(" AND ").push_contains("l.LocationName", name);
        }
        query
            .push(" ORDER BY l.LocationName, l.LocationID OFFSET ")
            .push_bind(filter.offset)
            .push(" ROWS FETCH NEXT ")
            .push_bind(filter.limit)
            .push(" ROWS ONLY");

        self.fetch_all(&query).await
    }

    async fn get_location(&self, location_id: i32) -> RepoResult<Option<Location>> {
        let mut conn = self.conn().await?;
        location_by_id(&mut conn, location_id).await
    }

    async fn create_location(&self, fields: &LocationFields) -> RepoResult<Location> {
        let coordinates = fields.coordinates.map(|c| c.to_string());
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                "INSERT INTO CW2.Location (LocationName, CityID, CountryID, Coordinates) \
                 OUTPUT INSERTED.LocationID \
                 VALUES (@P1, @P2, @P3, @P4)",
                &[
                    &fields.location_name,
                    &fields.city_id,
                    &fields.country_id,
                    &coordinates.as_deref(),
                ],
            )
            .await?
            .into_row()
            .await?
            .ok_or_else(|| RepoError::Decode("INSERT returned no row".to_string()))?;
        let location_id: i32 = row
            .try_get("LocationID")?
            .ok_or_else(|| RepoError::Decode("LocationID is NULL".to_string()))?;

        location_by_id(&mut conn, location_id)
            .await?
            .ok_or(RepoError::NotFound)
    }

    async fn update_location(&self, location_id: i32, fields: &LocationFields) -> RepoResult<Option<Location>> {
        let coordinates = fields.coordinates.map(|c| c.to_string());
        let mut conn = self.conn().await?;
        let result = conn
            .execute(
                "UPDATE CW2.Location SET LocationName = @P2, CityID = @P3, CountryID = @P4, \
                 Coordinates = @P5 WHERE LocationID = @P1",
                &[
                    &location_id,
                    &fields.location_name,
                    &fields.city_id,
                    &fields.country_id,
                    &coordinates.as_deref(),
                ],
            )
            .await?;
        if result.total() == 0 {
            return Ok(None);
        }
        location_by_id(&mut conn, location_id).await
    }

    async fn delete_location(&self, location_id: i32) -> RepoResult<bool> {
        let mut conn = self.conn().await?;
        let result = conn
            .execute("DELETE FROM CW2.Location WHERE LocationID = @P1", &[&location_id])
            .await?;
        Ok(result.total() > 0)
    }

    async fn list_countries(&self, name: Option<&str>) -> RepoResult<Vec<Country>> {
        let mut query = QueryBuilder::new("SELECT CountryID, CountryName FROM CW2.Country WHERE 1 = 1");
        if let Some(name) = name {
            query.push(" AND ").push_contains("CountryName", name);
        }
        query.push(" ORDER BY CountryName, CountryID");
        self.fetch_all(&query).await
    }

    async fn get_country(&self, country_id: i32) -> RepoResult<Option<Country>> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                "SELECT CountryID, CountryName FROM CW2.Country WHERE CountryID = @P1",
                &[&country_id],
            )
            .await?
            .into_row()
            .await?;
        row.as_ref().map(Country::from_row).transpose()
    }

    async fn list_cities(&self, country_id: Option<i32>, name: Option<&str>) -> RepoResult<Vec<City>> {
        let mut query = QueryBuilder::new("SELECT CityID, CityName, CountryID FROM CW2.City WHERE 1 = 1");
        if let Some(country_id) = country_id {
            query.push(" AND CountryID = ").push_bind(country_id);
        }
        if let Some(name) = name {
            query.push(" AND ").push_contains("CityName", name);
        }
        query.push(" ORDER BY CityName, CityID");
        self.fetch_all(&query).await
    }

    async fn get_city(&self, city_id: i32) -> RepoResult<Option<City>> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                "SELECT CityID, CityName, CountryID FROM CW2.City WHERE CityID = @P1",
                &[&city_id],
            )
            .await?
            .into_row()
            .await?;
        row.as_ref().map(City::from_row).transpose()
    }

    async fn get_user(&self, user_id: i32) -> RepoResult<Option<User>> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                format!("SELECT {USER_COLUMNS} FROM CW2.[User] WHERE UserID = @P1"),
                &[&user_id],
            )
            .await?
            .into_row()
            .await?;
        row.as_ref().map(User::from_row).transpose()
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                format!("SELECT {USER_COLUMNS} FROM CW2.[User] WHERE Email = @P1"),
                &[&email],
            )
            .await?
            .into_row()
            .await?;
        row.as_ref().map(User::from_row).transpose()
    }

    async fn create_user(&self, user: &NewUser) -> RepoResult<User> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                format!(
                    "INSERT INTO CW2.[User] (Username, Email, Role, CreatedAt) \
                     OUTPUT {USER_OUTPUT} \
                     VALUES (@P1, @P2, @P3, SYSUTCDATETIME())"
                ),
                &[&user.username, &user.email, &user.role.as_str()],
            )
            .await?
            .into_row()
            .await?
            .ok_or_else(|| RepoError::Decode("INSERT returned no row".to_string()))?;
        User::from_row(&row)
    }

    async fn touch_last_login(&self, user_id: i32) -> RepoResult<()> {
        let mut conn = self.conn().await?;
        let result = conn
            .execute(
                "UPDATE CW2.[User] SET LastLogin = SYSUTCDATETIME() WHERE UserID = @P1",
                &[&user_id],
            )
            .await?;
        if result.total() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn list_users(&self, filter: &UserFilter) -> RepoResult<Vec<User>> {
        let mut query = QueryBuilder::new(format!("SELECT {USER_COLUMNS} FROM CW2.[User] WHERE 1 = 1"));
        if let Some(role) = filter.role {
            query.push(" AND Role = ").push_bind(role.as_str().to_string());
        }
        if let Some(search) = &filter.search {
            query
                .push(" AND (")
                .push_contains("Username", search)
                .push(" OR ")
                .push_contains("Email", search)
                .push(")");
        }
        query
            .push(" ORDER BY UserID OFFSET ")
            .push_bind(filter.offset)
            .push(" ROWS FETCH NEXT ")
            .push_bind(filter.limit)
            .push(" ROWS ONLY");

        self.fetch_all(&query).await
    }

    async fn set_user_role(&self, user_id: i32, role: Role) -> RepoResult<Option<User>> {
        let mut conn = self.conn().await?;
        let row = conn
            .query(
                format!("UPDATE CW2.[User] SET Role = @P2 OUTPUT {USER_OUTPUT} WHERE UserID = @P1"),
                &[&user_id, &role.as_str()],
            )
            .await?
            .into_row()
            .await?;
        row.as_ref().map(User::from_row).transpose()
    }

    async fn log_action(&self, entry: &NewLogEntry) -> RepoResult<()> {
        let mut conn = self.conn().await?;
        conn.execute(
            "INSERT INTO CW2.Trail_Log (TrailID, UserID, Action, ActionDate, Details) \
             VALUES (@P1, @P2, @P3, SYSUTCDATETIME(), @P4)",
            &[
                &entry.trail_id,
                &entry.user_id,
                &entry.action.as_str(),
                &entry.details,
            ],
        )
        .await?;
        Ok(())
    }

    async fn recent_activity(&self, user_id: i32, limit: i64) -> RepoResult<Vec<ActivityEntry>> {
        let mut query = QueryBuilder::new("SELECT TOP (");
        query
            .push_bind(limit)
            .push(") LogID, TrailID, Action, ActionDate, Details FROM CW2.Trail_Log WHERE UserID = ")
            .push_bind(user_id)
            .push(" ORDER BY ActionDate DESC, LogID DESC");
        self.fetch_all(&query).await
    }
}
