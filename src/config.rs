use std::env;
use std::time::Duration;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::fetcher::WeatherMetric;

pub const DEFAULT_API_URL: &str = "https://archive-api.open-meteo.com/v1/archive";
pub const DEFAULT_START_DATE: &str = "2023-01-01";
pub const DEFAULT_END_DATE: &str = "2024-12-31";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("Invalid date range: start {start} is after end {end}")]
    InvertedDateRange { start: NaiveDate, end: NaiveDate },
}

/// Inclusive range of calendar days to ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ConfigError> {
        if start > end {
            return Err(ConfigError::InvertedDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Number of hourly observations the archive returns per location.
    pub fn expected_hours(&self) -> usize {
        let days = (self.end - self.start).num_days() + 1;
        days as usize * 24
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    pub schema: String,
    pub pool_size: u32,
    pub max_overflow: u32,
}

impl DatabaseConfig {
    pub fn max_connections(&self) -> u32 {
        self.pool_size + self.max_overflow
    }
}

#[derive(Debug, Clone)]
pub struct WeatherApiConfig {
    pub base_url: String,
    pub metrics: Vec<WeatherMetric>,
    pub timezone: String,
    pub timeout: Duration,
    pub retry_attempts: usize,
    pub retry_delay: Duration,
    pub inter_request_delay: Duration,
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            metrics: WeatherMetric::ALL.to_vec(),
            timezone: "UTC".to_string(),
            timeout: Duration::from_secs(30),
            retry_attempts: 3,
            retry_delay: Duration::from_secs(5),
            inter_request_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub weather_api: WeatherApiConfig,
    pub date_range: DateRange,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let schema = or_default("WAREHOUSE_SCHEMA", "raw");
        if !is_sql_identifier(&schema) {
            return Err(ConfigError::Invalid {
                key: "WAREHOUSE_SCHEMA",
                value: schema,
                reason: "must be a plain SQL identifier".to_string(),
            });
        }

        let database = DatabaseConfig {
            url: lookup("DATABASE_URL").filter(|url| !url.is_empty()),
            host: or_default("POSTGRES_HOST", "localhost"),
            port: parse_number("POSTGRES_PORT", &or_default("POSTGRES_PORT", "5432"))?,
            user: or_default("POSTGRES_USER", "dataeng"),
            password: or_default("POSTGRES_PASSWORD", "dataeng123"),
            database: or_default("POSTGRES_DB", "business_db"),
            schema,
            pool_size: parse_number("DB_POOL_SIZE", &or_default("DB_POOL_SIZE", "5"))?,
            max_overflow: parse_number("DB_MAX_OVERFLOW", &or_default("DB_MAX_OVERFLOW", "10"))?,
        };

        let retry_attempts: usize =
            parse_number("RETRY_ATTEMPTS", &or_default("RETRY_ATTEMPTS", "3"))?;
        if retry_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "RETRY_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        let weather_api = WeatherApiConfig {
            base_url: or_default("WEATHER_API_URL", DEFAULT_API_URL),
            metrics: parse_metrics(&or_default(
                "WEATHER_METRICS",
                "temperature_2m,relative_humidity_2m,wind_speed_10m",
            ))?,
            timezone: or_default("WEATHER_TIMEZONE", "UTC"),
            timeout: Duration::from_secs(parse_number(
                "HTTP_TIMEOUT_SECS",
                &or_default("HTTP_TIMEOUT_SECS", "30"),
            )?),
            retry_attempts,
            retry_delay: Duration::from_secs(parse_number(
                "RETRY_DELAY_SECS",
                &or_default("RETRY_DELAY_SECS", "5"),
            )?),
            inter_request_delay: Duration::from_millis(parse_number(
                "INTER_REQUEST_DELAY_MS",
                &or_default("INTER_REQUEST_DELAY_MS", "500"),
            )?),
        };

        let date_range = DateRange::new(
            parse_date(
                "WEATHER_START_DATE",
                &or_default("WEATHER_START_DATE", DEFAULT_START_DATE),
            )?,
            parse_date(
                "WEATHER_END_DATE",
                &or_default("WEATHER_END_DATE", DEFAULT_END_DATE),
            )?,
        )?;

        Ok(Config {
            database,
            weather_api,
            date_range,
        })
    }
}

pub fn parse_date(key: &'static str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|e| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_metrics(value: &str) -> Result<Vec<WeatherMetric>, ConfigError> {
    let mut metrics = Vec::new();
    for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        let metric = WeatherMetric::from_api_name(name).ok_or_else(|| ConfigError::Invalid {
            key: "WEATHER_METRICS",
            value: value.to_string(),
            reason: format!("unknown metric '{name}'"),
        })?;
        if !metrics.contains(&metric) {
            metrics.push(metric);
        }
    }

    if metrics.is_empty() {
        return Err(ConfigError::Invalid {
            key: "WEATHER_METRICS",
            value: value.to_string(),
            reason: "at least one metric is required".to_string(),
        });
    }
    Ok(metrics)
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.database.schema, "raw");
        assert_eq!(config.database.max_connections(), 15);
        assert_eq!(config.weather_api.base_url, DEFAULT_API_URL);
        assert_eq!(config.weather_api.metrics.len(), 3);
        assert_eq!(config.weather_api.retry_attempts, 3);
        assert_eq!(config.weather_api.retry_delay, Duration::from_secs(5));
        assert_eq!(config.weather_api.inter_request_delay, Duration::from_millis(500));
        assert_eq!(config.weather_api.timeout, Duration::from_secs(30));
        assert_eq!(
            config.date_range.start,
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap()
        );
        assert_eq!(
            config.date_range.end,
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()
        );
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://u:p@db:5433/weather"),
            ("WEATHER_METRICS", "temperature_2m, wind_speed_10m"),
            ("RETRY_ATTEMPTS", "5"),
            ("WEATHER_START_DATE", "2023-06-01"),
            ("WEATHER_END_DATE", "2023-06-30"),
        ])
        .unwrap();

        assert_eq!(
            config.database.url.as_deref(),
            Some("postgres://u:p@db:5433/weather")
        );
        assert_eq!(
            config.weather_api.metrics,
            vec![WeatherMetric::Temperature, WeatherMetric::WindSpeed]
        );
        assert_eq!(config.weather_api.retry_attempts, 5);
        assert_eq!(config.date_range.expected_hours(), 30 * 24);
    }

    #[test]
    fn test_rejects_unknown_metric() {
        let result = config_from(&[("WEATHER_METRICS", "temperature_2m,precipitation")]);
        assert!(matches!(
            result,
            Err(ConfigError::Invalid { key: "WEATHER_METRICS", .. })
        ));
    }

    #[test]
    fn test_rejects_inverted_range() {
        let result = config_from(&[
            ("WEATHER_START_DATE", "2024-01-02"),
            ("WEATHER_END_DATE", "2024-01-01"),
        ]);
        assert!(matches!(result, Err(ConfigError::InvertedDateRange { .. })));
    }

    #[test]
    fn test_rejects_malformed_values() {
        assert!(config_from(&[("RETRY_ATTEMPTS", "0")]).is_err());
        assert!(config_from(&[("HTTP_TIMEOUT_SECS", "thirty")]).is_err());
        assert!(config_from(&[("WEATHER_START_DATE", "01/01/2023")]).is_err());
        assert!(config_from(&[("WAREHOUSE_SCHEMA", "raw; DROP TABLE outlet")]).is_err());
    }

    #[test]
    fn test_single_day_range_is_24_hours() {
        let day = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let range = DateRange::new(day, day).unwrap();
        assert_eq!(range.expected_hours(), 24);
    }
}
