use chrono::NaiveDateTime;
use sqlx::{Postgres, QueryBuilder};
use tracing::{debug, error, info, instrument};

use crate::db::{DbError, DbPool, WeatherObservation, WeatherTableStats};

/// Rows per INSERT statement. Five binds per row keeps this well under the
/// Postgres limit of 65535 bind parameters.
pub const INSERT_BATCH_SIZE: usize = 1000;

pub const TEMPERATURE_RANGE: (f64, f64) = (-50.0, 60.0);
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);
pub const WIND_SPEED_RANGE: (f64, f64) = (0.0, 200.0);

#[derive(Clone)]
pub struct WeatherRepository {
    db: DbPool,
}

impl WeatherRepository {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Truncate the weather table and insert `observations` in its place.
    ///
    /// Both steps run in one transaction, so a failed insert leaves the previous
    /// contents untouched.
    #[instrument(skip(self, observations), fields(count = observations.len()))]
    pub async fn replace_all(&self, observations: &[WeatherObservation]) -> Result<u64, DbError> {
        let table = self.db.table("weather");
        debug!(
            "Beginning transaction to replace {} with {} observations",
            table,
            observations.len()
        );
        let mut tx = self.db.pool().begin().await?;

        sqlx::query(&format!("TRUNCATE TABLE {table}"))
            .execute(&mut *tx)
            .await?;
        debug!("Existing weather data truncated");

        let mut inserted = 0u64;
        for (batch, chunk) in observations.chunks(INSERT_BATCH_SIZE).enumerate() {
            let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
                "INSERT INTO {table} (outlet_id, datetime, temperature_2m, relative_humidity_2m, wind_speed_10m) "
            ));
            builder.push_values(chunk, |mut row, obs| {
                row.push_bind(obs.outlet_id)
                    .push_bind(obs.timestamp)
                    .push_bind(obs.temperature_celsius)
                    .push_bind(obs.relative_humidity_pct)
                    .push_bind(obs.wind_speed_kmh);
            });

            let result = builder.build().execute(&mut *tx).await.map_err(|e| {
                error!(batch, rows = chunk.len(), error = %e, "Failed to insert weather batch");
                e
            })?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        info!("Stored {} weather observations", inserted);
        Ok(inserted)
    }

    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            self.db.table("weather")
        ))
        .fetch_one(self.db.pool())
        .await?;

        Ok(count)
    }

    #[instrument(skip(self))]
    pub async fn find_observation(
        &self,
        outlet_id: i64,
        timestamp: NaiveDateTime,
    ) -> Result<Option<WeatherObservation>, DbError> {
        let observation = sqlx::query_as::<_, WeatherObservation>(&format!(
            r#"
            SELECT outlet_id, datetime, temperature_2m, relative_humidity_2m, wind_speed_10m
            FROM {}
            WHERE outlet_id = $1 AND datetime = $2
            "#,
            self.db.table("weather")
        ))
        .bind(outlet_id)
        .bind(timestamp)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(observation)
    }

    /// Null, range and coverage counts over the whole table.
    #[instrument(skip(self))]
    pub async fn table_stats(&self) -> Result<WeatherTableStats, DbError> {
        let (t_min, t_max) = TEMPERATURE_RANGE;
        let (h_min, h_max) = HUMIDITY_RANGE;
        let (w_min, w_max) = WIND_SPEED_RANGE;

        let stats = sqlx::query_as::<_, WeatherTableStats>(&format!(
            r#"
            SELECT
                COUNT(*) AS total_rows,
                COUNT(*) FILTER (WHERE outlet_id IS NULL) AS null_outlet_id,
                COUNT(*) FILTER (WHERE datetime IS NULL) AS null_datetime,
                COUNT(*) FILTER (WHERE temperature_2m IS NULL) AS null_temperature,
                COUNT(*) FILTER (WHERE relative_humidity_2m IS NULL) AS null_humidity,
                COUNT(*) FILTER (WHERE wind_speed_10m IS NULL) AS null_wind_speed,
                COUNT(*) FILTER (WHERE temperature_2m < $1 OR temperature_2m > $2) AS bad_temperature,
                COUNT(*) FILTER (WHERE relative_humidity_2m < $3 OR relative_humidity_2m > $4) AS bad_humidity,
                COUNT(*) FILTER (WHERE wind_speed_10m < $5 OR wind_speed_10m > $6) AS bad_wind_speed,
                MIN(temperature_2m) AS min_temperature,
                MAX(temperature_2m) AS max_temperature,
                MIN(datetime) AS min_datetime,
                MAX(datetime) AS max_datetime,
                COUNT(DISTINCT outlet_id) AS unique_outlets
            FROM {}
            "#,
            self.db.table("weather")
        ))
        .bind(t_min)
        .bind(t_max)
        .bind(h_min)
        .bind(h_max)
        .bind(w_min)
        .bind(w_max)
        .fetch_one(self.db.pool())
        .await?;

        debug!(?stats, "Computed weather table statistics");
        Ok(stats)
    }

    /// Observations whose outlet_id has no row in the outlet table.
    #[instrument(skip(self))]
    pub async fn count_orphans(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!(
            r#"
            SELECT COUNT(*)
            FROM {} w
            LEFT JOIN {} o ON w.outlet_id = o.id
            WHERE w.outlet_id IS NOT NULL
              AND o.id IS NULL
            "#,
            self.db.table("weather"),
            self.db.table("outlet")
        ))
        .fetch_one(self.db.pool())
        .await?;

        Ok(count)
    }
}
