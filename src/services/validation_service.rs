use std::fmt;

use chrono::NaiveDateTime;
use tracing::{error, info, instrument, warn};

use crate::db::weather_repository::{HUMIDITY_RANGE, TEMPERATURE_RANGE, WIND_SPEED_RANGE};
use crate::db::{DbError, WeatherRepository, WeatherTableStats};

/// Columns of the stored weather table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    OutletId,
    Timestamp,
    Temperature,
    RelativeHumidity,
    WindSpeed,
}

impl Column {
    pub fn name(&self) -> &'static str {
        match self {
            Column::OutletId => "outlet_id",
            Column::Timestamp => "datetime",
            Column::Temperature => "temperature_2m",
            Column::RelativeHumidity => "relative_humidity_2m",
            Column::WindSpeed => "wind_speed_10m",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    RecordCountMismatch,
    NullViolation(Column),
    RangeViolation(Column),
    OrphanReference,
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::RecordCountMismatch => write!(f, "RecordCountMismatch"),
            CheckKind::NullViolation(column) => write!(f, "NullViolation({})", column.name()),
            CheckKind::RangeViolation(column) => write!(f, "RangeViolation({})", column.name()),
            CheckKind::OrphanReference => write!(f, "OrphanReference"),
        }
    }
}

/// Hard checks fail the run; soft checks only warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Hard,
    Soft,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub kind: CheckKind,
    pub severity: Severity,
    pub description: String,
    /// Offending rows, or the absolute count difference for the row-count check.
    pub violations: i64,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.violations == 0
    }

    pub fn is_hard_failure(&self) -> bool {
        self.severity == Severity::Hard && !self.passed()
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.description)
    }
}

/// Informational summary of what was stored.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Coverage {
    pub min_datetime: Option<NaiveDateTime>,
    pub max_datetime: Option<NaiveDateTime>,
    pub unique_outlets: i64,
    pub min_temperature: Option<f64>,
    pub max_temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub expected_rows: u64,
    pub stored_rows: i64,
    pub checks: Vec<CheckResult>,
    pub coverage: Coverage,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", summarize(.failures))]
pub struct ValidationFailure {
    pub failures: Vec<CheckResult>,
}

impl ValidationFailure {
    /// The first failing check in evaluation order.
    pub fn primary(&self) -> Option<&CheckResult> {
        self.failures.first()
    }

    pub fn find(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.failures.iter().find(|c| c.kind == kind)
    }
}

fn summarize(failures: &[CheckResult]) -> String {
    let details = failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} validation check(s) failed: {details}", failures.len())
}

fn null_check(column: Column, severity: Severity, nulls: i64) -> CheckResult {
    CheckResult {
        kind: CheckKind::NullViolation(column),
        severity,
        description: format!("{nulls} records with NULL {}", column.name()),
        violations: nulls,
    }
}

fn range_check(column: Column, (min, max): (f64, f64), unit: &str, bad: i64) -> CheckResult {
    CheckResult {
        kind: CheckKind::RangeViolation(column),
        severity: Severity::Hard,
        description: format!(
            "{bad} records with {} outside [{min}, {max}] {unit}",
            column.name()
        ),
        violations: bad,
    }
}

impl ValidationReport {
    /// Evaluate every check against the gathered table statistics.
    ///
    /// All checks are always produced, in a fixed order, regardless of earlier failures.
    pub fn evaluate(expected_rows: u64, stats: &WeatherTableStats, orphans: i64) -> Self {
        let stored = stats.total_rows;
        let difference = i128::from(expected_rows) - i128::from(stored);
        let count_description = match difference {
            0 => format!("expected {expected_rows} records, stored {stored}"),
            d if d > 0 => format!(
                "fetched {expected_rows} records but stored {stored} (deficit of {d})"
            ),
            d => format!(
                "fetched {expected_rows} records but stored {stored} (surplus of {})",
                -d
            ),
        };

        let checks = vec![
            CheckResult {
                kind: CheckKind::RecordCountMismatch,
                severity: Severity::Hard,
                description: count_description,
                violations: i64::try_from(difference.unsigned_abs()).unwrap_or(i64::MAX),
            },
            null_check(Column::OutletId, Severity::Hard, stats.null_outlet_id),
            null_check(Column::Timestamp, Severity::Hard, stats.null_datetime),
            null_check(Column::Temperature, Severity::Hard, stats.null_temperature),
            null_check(Column::RelativeHumidity, Severity::Soft, stats.null_humidity),
            null_check(Column::WindSpeed, Severity::Soft, stats.null_wind_speed),
            range_check(
                Column::Temperature,
                TEMPERATURE_RANGE,
                "°C",
                stats.bad_temperature,
            ),
            range_check(
                Column::RelativeHumidity,
                HUMIDITY_RANGE,
                "%",
                stats.bad_humidity,
            ),
            range_check(
                Column::WindSpeed,
                WIND_SPEED_RANGE,
                "km/h",
                stats.bad_wind_speed,
            ),
            CheckResult {
                kind: CheckKind::OrphanReference,
                severity: Severity::Hard,
                description: format!(
                    "{orphans} weather records reference outlet_ids missing from the outlet table"
                ),
                violations: orphans,
            },
        ];

        Self {
            expected_rows,
            stored_rows: stored,
            checks,
            coverage: Coverage {
                min_datetime: stats.min_datetime,
                max_datetime: stats.max_datetime,
                unique_outlets: stats.unique_outlets,
                min_temperature: stats.min_temperature,
                max_temperature: stats.max_temperature,
            },
        }
    }

    pub fn hard_failures(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks.iter().filter(|c| c.is_hard_failure())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &CheckResult> {
        self.checks
            .iter()
            .filter(|c| c.severity == Severity::Soft && !c.passed())
    }

    pub fn is_success(&self) -> bool {
        self.hard_failures().next().is_none()
    }

    pub fn check(&self, kind: CheckKind) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    /// `Ok(self)` when no hard check failed, otherwise every hard failure.
    pub fn into_result(self) -> Result<Self, ValidationFailure> {
        let failures: Vec<CheckResult> = self.hard_failures().cloned().collect();
        if failures.is_empty() {
            Ok(self)
        } else {
            Err(ValidationFailure { failures })
        }
    }
}

/// Runs the post-persist data quality suite against the warehouse.
#[derive(Clone)]
pub struct ValidationService {
    weather_repo: WeatherRepository,
}

impl ValidationService {
    pub fn new(weather_repo: WeatherRepository) -> Self {
        Self { weather_repo }
    }

    /// Gather statistics, evaluate every check and log the outcome of each.
    ///
    /// Returns the full report; deciding whether it fails the run is up to the caller.
    #[instrument(skip(self))]
    pub async fn run_checks(&self, expected_rows: u64) -> Result<ValidationReport, DbError> {
        let stats = self.weather_repo.table_stats().await?;
        let orphans = self.weather_repo.count_orphans().await?;
        let report = ValidationReport::evaluate(expected_rows, &stats, orphans);

        info!("Weather records in database: {}", report.stored_rows);
        for check in &report.checks {
            if check.passed() {
                info!(check = %check.kind, "Passed: {}", check.description);
            } else if check.severity == Severity::Soft {
                warn!(check = %check.kind, violations = check.violations, "{}", check.description);
            } else {
                error!(check = %check.kind, violations = check.violations, "{}", check.description);
            }
        }

        let coverage = &report.coverage;
        info!(
            min = ?coverage.min_datetime,
            max = ?coverage.max_datetime,
            unique_outlets = coverage.unique_outlets,
            "Stored date range"
        );
        if let (Some(min), Some(max)) = (coverage.min_temperature, coverage.max_temperature) {
            info!("Temperature range: {:.1}°C to {:.1}°C", min, max);
        }

        Ok(report)
    }
}
