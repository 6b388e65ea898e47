use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Outlet coordinates as stored in the warehouse.
#[derive(Debug, Clone, Copy, PartialEq, FromRow, Serialize, Deserialize)]
pub struct Location {
    pub outlet_id: i64,
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    /// (0, 0) marks an outlet whose coordinates were never filled in.
    pub fn is_unset(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

/// One hourly reading for one outlet.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub outlet_id: i64,
    #[sqlx(rename = "datetime")]
    pub timestamp: NaiveDateTime,
    #[sqlx(rename = "temperature_2m")]
    pub temperature_celsius: Option<f64>,
    #[sqlx(rename = "relative_humidity_2m")]
    pub relative_humidity_pct: Option<f64>,
    #[sqlx(rename = "wind_speed_10m")]
    pub wind_speed_kmh: Option<f64>,
}

/// Aggregate counts over the stored weather table, computed in a single scan.
#[derive(Debug, Clone, Default, PartialEq, FromRow)]
pub struct WeatherTableStats {
    pub total_rows: i64,
    pub null_outlet_id: i64,
    pub null_datetime: i64,
    pub null_temperature: i64,
    pub null_humidity: i64,
    pub null_wind_speed: i64,
    pub bad_temperature: i64,
    pub bad_humidity: i64,
    pub bad_wind_speed: i64,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
    pub min_datetime: Option<NaiveDateTime>,
    pub max_datetime: Option<NaiveDateTime>,
    pub unique_outlets: i64,
}
