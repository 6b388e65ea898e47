use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use tracing::{debug, info, instrument};

use crate::config::DatabaseConfig;
use crate::db::DbError;

/// Bounded connection pool shared by every pipeline stage.
#[derive(Clone)]
pub struct DbPool {
    pool: PgPool,
    schema: String,
}

impl DbPool {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Open the pool: `pool_size` connections stay warm, up to `max_overflow` more on demand.
    #[instrument(skip(config), fields(schema = %config.schema))]
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, DbError> {
        let options = match &config.url {
            Some(url) => url.parse::<PgConnectOptions>()?,
            None => PgConnectOptions::new()
                .host(&config.host)
                .port(config.port)
                .username(&config.user)
                .password(&config.password)
                .database(&config.database),
        };

        let pool = PgPoolOptions::new()
            .min_connections(config.pool_size)
            .max_connections(config.max_connections())
            .test_before_acquire(true)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        info!(
            max_connections = config.max_connections(),
            "Database pool created"
        );
        Ok(Self::new(pool, config.schema.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Schema-qualified name for `table`.
    pub fn table(&self, table: &str) -> String {
        format!("{}.{}", self.schema, table)
    }

    #[instrument(skip(self))]
    pub async fn ping(&self) -> Result<(), DbError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!("Database connection verified");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Check that the configured schema holds the outlet and weather tables.
    ///
    /// Migrations only create `raw.*`; any other schema must be provisioned beforehand.
    #[instrument(skip(self), fields(schema = %self.schema))]
    pub async fn verify_tables(&self) -> Result<(), DbError> {
        for name in ["outlet", "weather"] {
            let table = self.table(name);
            let found: Option<String> = sqlx::query_scalar("SELECT to_regclass($1)::text")
                .bind(&table)
                .fetch_one(&self.pool)
                .await?;

            if found.is_none() {
                return Err(DbError::MissingTable(table));
            }
        }
        debug!("Warehouse tables present");
        Ok(())
    }
}
