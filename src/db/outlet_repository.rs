use tracing::{debug, info, instrument};

use crate::db::{DbError, DbPool, Location};

#[derive(Clone)]
pub struct OutletRepository {
    db: DbPool,
}

impl OutletRepository {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn count(&self) -> Result<i64, DbError> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {}",
            self.db.table("outlet")
        ))
        .fetch_one(self.db.pool())
        .await?;

        debug!("Outlet table holds {} rows", count);
        Ok(count)
    }

    /// Outlets with non-null coordinates, ordered by id.
    ///
    /// (0, 0) coordinates are returned as-is; callers exclude them.
    #[instrument(skip(self))]
    pub async fn list_locations(&self) -> Result<Vec<Location>, DbError> {
        let locations = sqlx::query_as::<_, Location>(&format!(
            r#"
            SELECT id AS outlet_id, latitude, longitude
            FROM {}
            WHERE latitude IS NOT NULL
              AND longitude IS NOT NULL
            ORDER BY id
            "#,
            self.db.table("outlet")
        ))
        .fetch_all(self.db.pool())
        .await?;

        info!("Found {} outlets with coordinates", locations.len());
        Ok(locations)
    }
}
