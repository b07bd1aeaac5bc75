use chrono::{DateTime, NaiveDateTime, Utc};
use tiberius::{FromSql, Row};

use crate::{
    error::RepoError,
    models::{
        ActivityEntry, City, Country, Feature, Location, ReviewSummary, Trail, TrailPoint,
        TrailSummary, User,
    },
};

// Column lists shared by SELECTs (aliased table) and OUTPUT clauses.
pub(crate) const TRAIL_COLUMNS: &str = "t.TrailID, t.TrailName, t.LocationID, t.Difficulty, t.Length, \
     t.ElevationGain, t.EstTimeMin, t.EstTimeMax, t.RouteType, t.Description, t.UserID, t.IsPublic, \
     t.CreatedAt, t.UpdatedAt";

pub(crate) const FEATURE_COLUMNS: &str = "f.FeatureID, f.FeatureName, f.Description, f.IconURL";

pub(crate) const POINT_OUTPUT: &str = "INSERTED.PointID, INSERTED.TrailID, INSERTED.PointOrder, \
     INSERTED.Latitude, INSERTED.Longitude, INSERTED.Description, INSERTED.Elevation, INSERTED.CreatedAt";

pub(crate) const USER_COLUMNS: &str = "UserID, Username, Email, Role, CreatedAt, LastLogin";

pub(crate) const USER_OUTPUT: &str = "INSERTED.UserID, INSERTED.Username, INSERTED.Email, \
     INSERTED.Role, INSERTED.CreatedAt, INSERTED.LastLogin";

pub(crate) const LOCATION_SELECT: &str = "SELECT l.LocationID, l.LocationName, l.CityID, c.CityName, \
     l.CountryID, co.CountryName, l.Coordinates \
     FROM CW2.Location l \
     LEFT JOIN CW2.City c ON l.CityID = c.CityID \
     LEFT JOIN CW2.Country co ON l.CountryID = co.CountryID";

/// Maps one result row onto a model.
pub(crate) trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, RepoError>;
}

pub(crate) fn collect<T: FromRow>(rows: Vec<Row>) -> Result<Vec<T>, RepoError> {
    rows.iter().map(T::from_row).collect()
}

fn required<'a, T: FromSql<'a>>(row: &'a Row, column: &str) -> Result<T, RepoError> {
    row.try_get::<T, _>(column)?
        .ok_or_else(|| RepoError::Decode(format!("{column} is NULL")))
}

fn optional<'a, T: FromSql<'a>>(row: &'a Row, column: &str) -> Result<Option<T>, RepoError> {
    Ok(row.try_get::<T, _>(column)?)
}

fn text(row: &Row, column: &str) -> Result<String, RepoError> {
    required::<&str>(row, column).map(str::to_owned)
}

fn optional_text(row: &Row, column: &str) -> Result<Option<String>, RepoError> {
    Ok(optional::<&str>(row, column)?.map(str::to_owned))
}

// DATETIME2 columns hold UTC wall-clock time (written with SYSUTCDATETIME()).
fn timestamp(row: &Row, column: &str) -> Result<DateTime<Utc>, RepoError> {
    required::<NaiveDateTime>(row, column).map(|t| t.and_utc())
}

fn optional_timestamp(row: &Row, column: &str) -> Result<Option<DateTime<Utc>>, RepoError> {
    Ok(optional::<NaiveDateTime>(row, column)?.map(|t| t.and_utc()))
}

fn parsed<T>(row: &Row, column: &str) -> Result<T, RepoError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = text(row, column)?;
    raw.parse()
        .map_err(|e: T::Err| RepoError::Decode(format!("{column}: {e}")))
}

/// Reads an integer aggregate (COUNT/SUM), treating NULL as zero.
pub(crate) fn count(row: &Row, column: &str) -> Result<i64, RepoError> {
    Ok(optional::<i32>(row, column)?.map(i64::from).unwrap_or(0))
}

impl FromRow for Trail {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(Trail {
            trail_id: required(row, "TrailID")?,
            trail_name: text(row, "TrailName")?,
            location_id: optional(row, "LocationID")?,
            difficulty: parsed(row, "Difficulty")?,
            length: required(row, "Length")?,
            elevation_gain: optional(row, "ElevationGain")?,
            est_time_min: required(row, "EstTimeMin")?,
            est_time_max: required(row, "EstTimeMax")?,
            route_type: parsed(row, "RouteType")?,
            description: optional_text(row, "Description")?,
            user_id: required(row, "UserID")?,
            is_public: required(row, "IsPublic")?,
            created_at: timestamp(row, "CreatedAt")?,
            updated_at: timestamp(row, "UpdatedAt")?,
        })
    }
}

impl FromRow for TrailSummary {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(TrailSummary {
            trail: Trail::from_row(row)?,
            username: optional_text(row, "Username")?,
            location_name: optional_text(row, "LocationName")?,
        })
    }
}

impl FromRow for TrailPoint {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(TrailPoint {
            point_id: required(row, "PointID")?,
            trail_id: required(row, "TrailID")?,
            point_order: required(row, "PointOrder")?,
            latitude: required(row, "Latitude")?,
            longitude: required(row, "Longitude")?,
            description: optional_text(row, "Description")?,
            elevation: optional(row, "Elevation")?,
            created_at: timestamp(row, "CreatedAt")?,
        })
    }
}

impl FromRow for Feature {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(Feature {
            feature_id: required(row, "FeatureID")?,
            feature_name: text(row, "FeatureName")?,
            description: optional_text(row, "Description")?,
            icon_url: optional_text(row, "IconURL")?,
        })
    }
}

// AVG over no rows is NULL, which stays `None`.
impl FromRow for ReviewSummary {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(ReviewSummary {
            total_reviews: count(row, "TotalReviews")?,
            average_rating: optional(row, "AverageRating")?,
            five_star: count(row, "FiveStar")?,
            four_star: count(row, "FourStar")?,
            three_star: count(row, "ThreeStar")?,
            two_star: count(row, "TwoStar")?,
            one_star: count(row, "OneStar")?,
        })
    }
}

impl FromRow for Location {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        let coordinates = optional_text(row, "Coordinates")?
            .filter(|raw| !raw.trim().is_empty())
            .map(|raw| {
                raw.parse()
                    .map_err(|e| RepoError::Decode(format!("Coordinates {raw:?}: {e}")))
            })
            .transpose()?;

        Ok(Location {
            location_id: required(row, "LocationID")?,
            location_name: text(row, "LocationName")?,
            city_id: optional(row, "CityID")?,
            city_name: optional_text(row, "CityName")?,
            country_id: optional(row, "CountryID")?,
            country_name: optional_text(row, "CountryName")?,
            coordinates,
        })
    }
}

impl FromRow for Country {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(Country {
            country_id: required(row, "CountryID")?,
            country_name: text(row, "CountryName")?,
        })
    }
}

impl FromRow for City {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(City {
            city_id: required(row, "CityID")?,
            city_name: text(row, "CityName")?,
            country_id: required(row, "CountryID")?,
        })
    }
}

impl FromRow for User {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(User {
            user_id: required(row, "UserID")?,
            username: text(row, "Username")?,
            email: text(row, "Email")?,
            role: parsed(row, "Role")?,
            created_at: timestamp(row, "CreatedAt")?,
            last_login: optional_timestamp(row, "LastLogin")?,
        })
    }
}

impl FromRow for ActivityEntry {
    fn from_row(row: &Row) -> Result<Self, RepoError> {
        Ok(ActivityEntry {
            log_id: required(row, "LogID")?,
            trail_id: optional(row, "TrailID")?,
            action: text(row, "Action")?,
            action_date: timestamp(row, "ActionDate")?,
            details: optional_text(row, "Details")?,
        })
    }
}
