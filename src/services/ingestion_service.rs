use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::config::DateRange;
use crate::db::{DbError, DbPool, Location, OutletRepository, WeatherObservation, WeatherRepository};
use crate::fetcher::{LocationStatus, WeatherFetcher};
use crate::services::validation_service::{ValidationFailure, ValidationReport, ValidationService};

/// Error types for pipeline stages
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No outlets found in database; load outlet data first")]
    NoOutletsFound,

    #[error("None of the {total_outlets} outlets have valid coordinates")]
    NoValidCoordinates { total_outlets: i64 },

    #[error("No weather data fetched ({failed} of {attempted} location(s) failed)")]
    EmptyFetchResult { attempted: usize, failed: usize },

    #[error("Failed to persist weather data: {0}")]
    PersistenceError(#[source] DbError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Validation(#[from] ValidationFailure),
}

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid batch file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Pipeline progress. `Failed` is reachable from every other state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineState {
    Start,
    OutletsValidated,
    WeatherFetched,
    WeatherStored,
    Validated,
    Succeeded,
    Failed(String),
}

impl PipelineState {
    fn successor(&self) -> Option<PipelineState> {
        match self {
            PipelineState::Start => Some(PipelineState::OutletsValidated),
            PipelineState::OutletsValidated => Some(PipelineState::WeatherFetched),
            PipelineState::WeatherFetched => Some(PipelineState::WeatherStored),
            PipelineState::WeatherStored => Some(PipelineState::Validated),
            PipelineState::Validated => Some(PipelineState::Succeeded),
            PipelineState::Succeeded | PipelineState::Failed(_) => None,
        }
    }

    /// Move to the next state in the fixed stage order.
    pub fn advance(&mut self) {
        if let Some(next) = self.successor() {
            debug!(from = %self, to = %next, "Pipeline state transition");
            *self = next;
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        error!(from = %self, %reason, "Pipeline failed");
        *self = PipelineState::Failed(reason);
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Succeeded | PipelineState::Failed(_))
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Start => write!(f, "Start"),
            PipelineState::OutletsValidated => write!(f, "OutletsValidated"),
            PipelineState::WeatherFetched => write!(f, "WeatherFetched"),
            PipelineState::WeatherStored => write!(f, "WeatherStored"),
            PipelineState::Validated => write!(f, "Validated"),
            PipelineState::Succeeded => write!(f, "Succeeded"),
            PipelineState::Failed(reason) => write!(f, "Failed({reason})"),
        }
    }
}

/// Output of the outlet validation stage.
#[derive(Debug, Clone)]
pub struct OutletCheck {
    pub total_outlets: i64,
    pub locations: Vec<Location>,
}

impl OutletCheck {
    pub fn valid_count(&self) -> usize {
        self.locations.len()
    }
}

/// Weather fetched for every valid outlet, handed from the fetch stage to the store stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchedBatch {
    pub valid_outlets: usize,
    pub observations: Vec<WeatherObservation>,
}

impl FetchedBatch {
    pub fn fetched_count(&self) -> usize {
        self.observations.len()
    }

    pub fn write_to(&self, path: &Path) -> Result<(), ArtifactError> {
        let json = serde_json::to_vec(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> Result<Self, ArtifactError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Counts from one full pipeline run.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub valid_outlets: usize,
    pub records_fetched: usize,
    pub records_stored: u64,
    pub report: ValidationReport,
    pub duration_secs: f64,
}

/// Weather ingestion pipeline: validate outlets, fetch, store, validate.
///
/// Each stage runs once per invocation and in order. Only the archive requests
/// inside the fetch stage are retried.
#[derive(Clone)]
pub struct IngestionService {
    outlet_repo: OutletRepository,
    weather_repo: WeatherRepository,
    validation: ValidationService,
    fetcher: WeatherFetcher,
    date_range: DateRange,
    inter_request_delay: Duration,
}

impl IngestionService {
    pub fn new(
        db: DbPool,
        fetcher: WeatherFetcher,
        date_range: DateRange,
        inter_request_delay: Duration,
    ) -> Self {
        let weather_repo = WeatherRepository::new(db.clone());
        Self {
            outlet_repo: OutletRepository::new(db),
            validation: ValidationService::new(weather_repo.clone()),
            weather_repo,
            fetcher,
            date_range,
            inter_request_delay,
        }
    }

    /// Stage 1: make sure there are outlets with usable coordinates.
    #[instrument(skip(self))]
    pub async fn validate_outlets(&self) -> Result<OutletCheck, PipelineError> {
        let total_outlets = self.outlet_repo.count().await?;
        info!("Total outlets in database: {}", total_outlets);

        if total_outlets == 0 {
            return Err(PipelineError::NoOutletsFound);
        }

        let with_coordinates = self.outlet_repo.list_locations().await?;
        let candidates = with_coordinates.len();
        let locations: Vec<Location> = with_coordinates
            .into_iter()
            .filter(|loc| !loc.is_unset())
            .collect();

        info!("Outlets with valid coordinates: {}", locations.len());
        info!(
            "Outlets with invalid (0,0) coordinates: {}",
            candidates - locations.len()
        );

        if locations.is_empty() {
            return Err(PipelineError::NoValidCoordinates { total_outlets });
        }

        Ok(OutletCheck {
            total_outlets,
            locations,
        })
    }

    /// Stage 2: fetch weather for every location.
    ///
    /// Individual outlet failures are tolerated; an entirely empty result is not.
    #[instrument(skip(self, locations), fields(locations = locations.len()))]
    pub async fn fetch_weather(&self, locations: &[Location]) -> Result<FetchedBatch, PipelineError> {
        info!(
            "Fetching weather for {} outlets from {} to {}",
            locations.len(),
            self.date_range.start,
            self.date_range.end
        );

        let report = self
            .fetcher
            .fetch_many(locations, &self.date_range, self.inter_request_delay)
            .await;

        if report.observations.is_empty() {
            return Err(PipelineError::EmptyFetchResult {
                attempted: report.outcomes.len() - report.skipped_locations(),
                failed: report.failed_locations(),
            });
        }

        let expected_hours = self.date_range.expected_hours();
        for outcome in &report.outcomes {
            match &outcome.status {
                LocationStatus::Fetched { records } if *records != expected_hours => warn!(
                    outlet_id = outcome.outlet_id,
                    "Received {} hourly records, expected {}", records, expected_hours
                ),
                LocationStatus::Failed { reason } => {
                    warn!(outlet_id = outcome.outlet_id, %reason, "Outlet excluded from batch")
                }
                _ => {}
            }
        }

        log_batch_summary(&report.observations);

        Ok(FetchedBatch {
            valid_outlets: locations.iter().filter(|loc| !loc.is_unset()).count(),
            observations: report.observations,
        })
    }

    /// Stage 3: replace the weather table with the batch. Returns rows inserted.
    #[instrument(skip(self, batch), fields(count = batch.fetched_count()))]
    pub async fn store_weather(&self, batch: &FetchedBatch) -> Result<u64, PipelineError> {
        if batch.observations.is_empty() {
            return Err(PipelineError::EmptyFetchResult {
                attempted: 0,
                failed: 0,
            });
        }

        info!("Saving {} weather records to database", batch.fetched_count());
        let stored = self
            .weather_repo
            .replace_all(&batch.observations)
            .await
            .map_err(PipelineError::PersistenceError)?;

        Ok(stored)
    }

    /// Stage 4: run every validation check against the stored table.
    ///
    /// `expected_rows` is the size of the batch handed to the store stage.
    #[instrument(skip(self))]
    pub async fn validate_weather(&self, expected_rows: u64) -> Result<ValidationReport, PipelineError> {
        let report = self.validation.run_checks(expected_rows).await?;
        let report = report.into_result()?;
        info!("All validation checks passed");
        Ok(report)
    }

    /// Run all four stages in order.
    #[instrument(skip(self), fields(start = %self.date_range.start, end = %self.date_range.end))]
    pub async fn run(&self) -> Result<IngestionResult, PipelineError> {
        let started = Instant::now();
        let mut state = PipelineState::Start;

        match self.run_stages(&mut state).await {
            Ok((valid_outlets, records_fetched, records_stored, report)) => {
                state.advance();
                let duration_secs = started.elapsed().as_secs_f64();
                info!(
                    valid_outlets,
                    records_fetched,
                    records_stored,
                    duration_secs = %format!("{duration_secs:.2}"),
                    "Pipeline {}",
                    state
                );
                Ok(IngestionResult {
                    valid_outlets,
                    records_fetched,
                    records_stored,
                    report,
                    duration_secs,
                })
            }
            Err(e) => {
                state.fail(e.to_string());
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        state: &mut PipelineState,
    ) -> Result<(usize, usize, u64, ValidationReport), PipelineError> {
        let outlets = self.validate_outlets().await?;
        state.advance();

        let batch = self.fetch_weather(&outlets.locations).await?;
        state.advance();

        let stored = self.store_weather(&batch).await?;
        state.advance();

        let report = self
            .validate_weather(batch.fetched_count() as u64)
            .await?;
        state.advance();

        Ok((outlets.valid_count(), batch.fetched_count(), stored, report))
    }
}

fn log_batch_summary(observations: &[WeatherObservation]) {
    let mut per_outlet: BTreeMap<i64, usize> = BTreeMap::new();
    for obs in observations {
        *per_outlet.entry(obs.outlet_id).or_default() += 1;
    }
    let timestamps: BTreeSet<_> = observations.iter().map(|o| o.timestamp).collect();

    info!("Total records: {}", observations.len());
    info!("Unique outlets: {}", per_outlet.len());
    if let (Some(first), Some(last)) = (timestamps.first(), timestamps.last()) {
        info!("Date range: {} to {}", first, last);
    }
}
