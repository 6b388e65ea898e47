use std::collections::HashMap;
use std::time::Duration;

use backon::{ConstantBuilder, Retryable};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DateRange, WeatherApiConfig};
use crate::db::{Location, WeatherObservation};
use crate::fetch_error::FetchError;

const BODY_PREVIEW_LEN: usize = 200;

/// Hourly variables requested from the archive API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeatherMetric {
    Temperature,
    RelativeHumidity,
    WindSpeed,
}

impl WeatherMetric {
    pub const ALL: [WeatherMetric; 3] = [
        WeatherMetric::Temperature,
        WeatherMetric::RelativeHumidity,
        WeatherMetric::WindSpeed,
    ];

    pub fn api_name(&self) -> &'static str {
        match self {
            WeatherMetric::Temperature => "temperature_2m",
            WeatherMetric::RelativeHumidity => "relative_humidity_2m",
            WeatherMetric::WindSpeed => "wind_speed_10m",
        }
    }

    pub fn from_api_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.api_name() == name)
    }
}

/// A single hour of weather at one coordinate, not yet tied to an outlet.
#[derive(Debug, Clone, PartialEq)]
pub struct HourlyWeather {
    pub timestamp: NaiveDateTime,
    pub temperature_celsius: Option<f64>,
    pub relative_humidity_pct: Option<f64>,
    pub wind_speed_kmh: Option<f64>,
}

impl HourlyWeather {
    pub fn for_outlet(self, outlet_id: i64) -> WeatherObservation {
        WeatherObservation {
            outlet_id,
            timestamp: self.timestamp,
            temperature_celsius: self.temperature_celsius,
            relative_humidity_pct: self.relative_humidity_pct,
            wind_speed_kmh: self.wind_speed_kmh,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocationStatus {
    Fetched { records: usize },
    Skipped,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocationOutcome {
    pub outlet_id: i64,
    pub status: LocationStatus,
}

/// Combined result of a multi-location fetch, with one outcome per input location.
#[derive(Debug, Clone, Default)]
pub struct FetchReport {
    pub observations: Vec<WeatherObservation>,
    pub outcomes: Vec<LocationOutcome>,
}

impl FetchReport {
    fn count(&self, pred: impl Fn(&LocationStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }

    pub fn fetched_locations(&self) -> usize {
        self.count(|s| matches!(s, LocationStatus::Fetched { .. }))
    }

    pub fn skipped_locations(&self) -> usize {
        self.count(|s| matches!(s, LocationStatus::Skipped))
    }

    pub fn failed_locations(&self) -> usize {
        self.count(|s| matches!(s, LocationStatus::Failed { .. }))
    }
}

#[derive(Debug, Deserialize)]
struct ArchiveResponse {
    #[serde(default)]
    hourly: HourlyBlock,
}

#[derive(Debug, Default, Deserialize)]
struct HourlyBlock {
    #[serde(default)]
    time: Vec<String>,
    #[serde(flatten)]
    series: HashMap<String, Value>,
}

pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(), FetchError> {
    if (-90.0..=90.0).contains(&latitude) && (-180.0..=180.0).contains(&longitude) {
        Ok(())
    } else {
        Err(FetchError::InvalidCoordinates {
            latitude,
            longitude,
        })
    }
}

/// True when timestamps advance by exactly one hour with no gaps or repeats.
pub fn is_hourly_sequence(readings: &[HourlyWeather]) -> bool {
    readings
        .windows(2)
        .all(|pair| pair[1].timestamp - pair[0].timestamp == chrono::Duration::hours(1))
}

fn parse_timestamp(value: &str) -> Result<NaiveDateTime, FetchError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .map_err(|e| FetchError::DateTimeError(format!("'{value}': {e}")))
}

/// Client for the historical weather archive.
///
/// Built once per run and shared by reference; the underlying HTTP client
/// pools connections across requests.
#[derive(Clone)]
pub struct WeatherFetcher {
    client: reqwest::Client,
    base_url: String,
    metrics: Vec<WeatherMetric>,
    timezone: String,
    retry_attempts: usize,
    retry_delay: Duration,
}

impl WeatherFetcher {
    pub fn new(config: &WeatherApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            metrics: config.metrics.clone(),
            timezone: config.timezone.clone(),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: config.retry_delay,
        })
    }

    /// Fetch hourly weather for one coordinate over `range`.
    #[instrument(skip(self, range), fields(url = %self.base_url, start = %range.start, end = %range.end))]
    pub async fn fetch_one(
        &self,
        latitude: f64,
        longitude: f64,
        range: &DateRange,
    ) -> Result<Vec<HourlyWeather>, FetchError> {
        validate_coordinates(latitude, longitude)?;

        // Build request parameters
        let hourly = self
            .metrics
            .iter()
            .map(WeatherMetric::api_name)
            .collect::<Vec<_>>()
            .join(",");
        let params = [
            ("latitude", latitude.to_string()),
            ("longitude", longitude.to_string()),
            ("start_date", range.start.format("%Y-%m-%d").to_string()),
            ("end_date", range.end.format("%Y-%m-%d").to_string()),
            ("hourly", hourly),
            ("timezone", self.timezone.clone()),
        ];

        debug!(
            "Fetching weather data for ({}, {}) from {} to {}",
            latitude, longitude, range.start, range.end
        );
        let body = self.request_with_retry(&params).await?;

        // Parse response
        let readings = self.parse_response(&body)?;

        if !is_hourly_sequence(&readings) {
            warn!("Archive returned a non-contiguous hourly sequence");
        }
        debug!("Fetched {} hourly records", readings.len());

        Ok(readings)
    }

    /// Fetch every location in order, one request at a time.
    ///
    /// Locations at (0, 0) are skipped and per-location failures are recorded in the
    /// report rather than returned; an empty report is not an error here.
    #[instrument(skip(self, locations, range), fields(locations = locations.len()))]
    pub async fn fetch_many(
        &self,
        locations: &[Location],
        range: &DateRange,
        inter_request_delay: Duration,
    ) -> FetchReport {
        let total = locations.len();
        let mut report = FetchReport::default();
        let mut attempted = false;

        info!("Fetching weather for {} locations", total);

        for (idx, location) in locations.iter().enumerate() {
            let position = idx + 1;

            if location.is_unset() {
                warn!(
                    "[{}/{}] Skipping outlet {}: invalid coordinates (0, 0)",
                    position, total, location.outlet_id
                );
                report.outcomes.push(LocationOutcome {
                    outlet_id: location.outlet_id,
                    status: LocationStatus::Skipped,
                });
                continue;
            }

            // Rate limit between requests
            if attempted && !inter_request_delay.is_zero() {
                tokio::time::sleep(inter_request_delay).await;
            }
            attempted = true;

            info!("[{}/{}] Outlet {}", position, total, location.outlet_id);

            let status = match self
                .fetch_one(location.latitude, location.longitude, range)
                .await
            {
                Ok(readings) => {
                    let records = readings.len();
                    report.observations.extend(
                        readings
                            .into_iter()
                            .map(|r| r.for_outlet(location.outlet_id)),
                    );
                    LocationStatus::Fetched { records }
                }
                Err(e) => {
                    error!(
                        outlet_id = location.outlet_id,
                        error = %e,
                        "Failed to fetch weather for outlet"
                    );
                    LocationStatus::Failed {
                        reason: e.to_string(),
                    }
                }
            };

            report.outcomes.push(LocationOutcome {
                outlet_id: location.outlet_id,
                status,
            });
        }

        if report.observations.is_empty() {
            warn!("No weather data fetched for any location");
        } else {
            info!(
                fetched = report.fetched_locations(),
                skipped = report.skipped_locations(),
                failed = report.failed_locations(),
                "Total records fetched: {}",
                report.observations.len()
            );
        }

        report
    }

    async fn request_with_retry(&self, params: &[(&str, String)]) -> Result<String, FetchError> {
        let backoff = ConstantBuilder::default()
            .with_delay(self.retry_delay)
            .with_max_times(self.retry_attempts - 1);
        let mut retries = 0usize;
        let attempts = self.retry_attempts;

        let result = (|| self.send_once(params))
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(FetchError::is_transient)
            .notify(|err: &FetchError, delay: Duration| {
                retries += 1;
                warn!(
                    "Request failed (attempt {}/{}): {}. Retrying in {:?}",
                    retries, attempts, err, delay
                );
            })
            .await;

        match result {
            Ok(body) => Ok(body),
            Err(e) if e.is_transient() => {
                error!("Request failed after {} attempts", retries + 1);
                Err(FetchError::SourceUnavailable {
                    attempts: retries + 1,
                    last_error: Box::new(e),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn send_once(&self, params: &[(&str, String)]) -> Result<String, FetchError> {
        let response = self.client.get(&self.base_url).query(params).send().await?;
        let status = response.status();
        debug!("Received HTTP response with status: {}", status);

        let body = response.text().await?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: body.chars().take(BODY_PREVIEW_LEN).collect(),
            });
        }

        Ok(body)
    }

    /// Parse an archive response into hourly readings.
    ///
    /// Metric arrays are index-aligned with `hourly.time`. A requested metric that is
    /// missing from the response, or shorter than the time array, yields `None`.
    pub fn parse_response(&self, body: &str) -> Result<Vec<HourlyWeather>, FetchError> {
        let response: ArchiveResponse = serde_json::from_str(body)?;
        let hourly = response.hourly;

        let column = |metric: WeatherMetric| {
            if !self.metrics.contains(&metric) {
                return None;
            }
            let values = hourly.series.get(metric.api_name()).and_then(Value::as_array);
            if values.is_none() {
                warn!("Metric {} missing from response", metric.api_name());
            }
            values
        };
        let temperature = column(WeatherMetric::Temperature);
        let humidity = column(WeatherMetric::RelativeHumidity);
        let wind_speed = column(WeatherMetric::WindSpeed);

        let value_at = |values: Option<&Vec<Value>>, idx: usize| {
            values.and_then(|v| v.get(idx)).and_then(Value::as_f64)
        };

        hourly
            .time
            .iter()
            .enumerate()
            .map(|(idx, time)| {
                Ok::<_, FetchError>(HourlyWeather {
                    timestamp: parse_timestamp(time)?,
                    temperature_celsius: value_at(temperature, idx),
                    relative_humidity_pct: value_at(humidity, idx),
                    wind_speed_kmh: value_at(wind_speed, idx),
                })
            })
            .collect()
    }
}
