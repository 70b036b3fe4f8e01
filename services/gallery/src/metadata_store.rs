use crate::config::DatabaseConfig;
use crate::error::GalleryError;
use crate::model::{DeleteStatus, ImageRecord, PHOTO_RECORD_TYPE};
use anyhow::Context;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info, instrument};

/// Photo metadata keyed by `(photo_id, owner)`, with owner and type lookups
#[async_trait]
pub trait PhotoRepository: Send + Sync {
    /// Insert or replace the record for `(photo_id, owner)`
    async fn upsert(&self, record: &ImageRecord) -> Result<(), GalleryError>;

    async fn get(&self, photo_id: &str, owner: &str) -> Result<Option<ImageRecord>, GalleryError>;

    /// Records of one owner, optionally restricted to a delete status
    async fn list_by_owner(
        &self,
        owner: &str,
        status: Option<DeleteStatus>,
    ) -> Result<Vec<ImageRecord>, GalleryError>;

    /// Every photo record, via the type index
    async fn list_all(&self) -> Result<Vec<ImageRecord>, GalleryError>;

    /// Move the record to a new location. Fails with [`GalleryError::NotFound`]
    /// when no record exists for `(photo_id, owner)`.
    async fn update_location(
        &self,
        photo_id: &str,
        owner: &str,
        storage_key: &str,
        status: DeleteStatus,
    ) -> Result<(), GalleryError>;

    /// Remove the record. Fails with [`GalleryError::NotFound`] when absent.
    async fn delete(&self, photo_id: &str, owner: &str) -> Result<(), GalleryError>;
}

const SELECT_COLUMNS: &str = r#"
    SELECT photo_id, owner, display_name, storage_key,
           upload_timestamp, delete_status, record_type
    FROM photos
"#;

/// Metadata store for photo records in PostgreSQL
pub struct PgPhotoRepository {
    pool: PgPool,
}

impl PgPhotoRepository {
    /// Create a new repository with connection pool
    pub async fn new(config: &DatabaseConfig) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.connect_timeout())
            .idle_timeout(Some(config.idle_timeout()))
            .connect(&config.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        info!("Connected to PostgreSQL database");

        Ok(Self { pool })
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl PhotoRepository for PgPhotoRepository {
    #[instrument(skip(self, record), fields(photo_id = %record.photo_id, owner = %record.owner))]
    async fn upsert(&self, record: &ImageRecord) -> Result<(), GalleryError> {
        sqlx::query(
            r#"
            INSERT INTO photos (
                photo_id, owner, display_name, storage_key,
                upload_timestamp, delete_status, record_type
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (photo_id, owner) DO UPDATE SET
                display_name = EXCLUDED.display_name,
                storage_key = EXCLUDED.storage_key,
                upload_timestamp = EXCLUDED.upload_timestamp,
                delete_status = EXCLUDED.delete_status,
                record_type = EXCLUDED.record_type
            "#,
        )
        .bind(&record.photo_id)
        .bind(&record.owner)
        .bind(&record.display_name)
        .bind(&record.storage_key)
        .bind(&record.upload_timestamp)
        .bind(i16::from(record.delete_status))
        .bind(&record.record_type)
        .execute(&self.pool)
        .await?;

        debug!(storage_key = %record.storage_key, "Photo record upserted");
        Ok(())
    }

    async fn get(&self, photo_id: &str, owner: &str) -> Result<Option<ImageRecord>, GalleryError> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE photo_id = $1 AND owner = $2"))
            .bind(photo_id)
            .bind(owner)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(skip(self))]
    async fn list_by_owner(
        &self,
        owner: &str,
        status: Option<DeleteStatus>,
    ) -> Result<Vec<ImageRecord>, GalleryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE owner = $1 AND ($2::smallint IS NULL OR delete_status = $2) \
             ORDER BY upload_timestamp DESC"
        ))
        .bind(owner)
        .bind(status.map(i16::from))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    async fn list_all(&self) -> Result<Vec<ImageRecord>, GalleryError> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE record_type = $1 ORDER BY upload_timestamp DESC"
        ))
        .bind(PHOTO_RECORD_TYPE)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn update_location(
        &self,
        photo_id: &str,
        owner: &str,
        storage_key: &str,
        status: DeleteStatus,
    ) -> Result<(), GalleryError> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET storage_key = $3, delete_status = $4
            WHERE photo_id = $1 AND owner = $2
            "#,
        )
        .bind(photo_id)
        .bind(owner)
        .bind(storage_key)
        .bind(i16::from(status))
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(GalleryError::NotFound(format!(
                "photo {photo_id} for owner {owner}"
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, photo_id: &str, owner: &str) -> Result<(), GalleryError> {
        let result = sqlx::query("DELETE FROM photos WHERE photo_id = $1 AND owner = $2")
            .bind(photo_id)
            .bind(owner)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(GalleryError::NotFound(format!(
                "photo {photo_id} for owner {owner}"
            )));
        }
        Ok(())
    }
}

/// Map a `photos` row onto an [`ImageRecord`]
fn record_from_row(row: &PgRow) -> Result<ImageRecord, GalleryError> {
    Ok(ImageRecord {
        photo_id: row.try_get("photo_id")?,
        owner: row.try_get("owner")?,
        display_name: row.try_get("display_name")?,
        storage_key: row.try_get("storage_key")?,
        upload_timestamp: row.try_get("upload_timestamp")?,
        delete_status: DeleteStatus::try_from(row.try_get::<i16, _>("delete_status")?)?,
        record_type: row.try_get("record_type")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: &str = include_str!("../migrations/20240101000000_create_photos.sql");

    #[test]
    fn test_selected_columns_exist_in_schema() {
        let columns = SELECT_COLUMNS
            .split("FROM")
            .next()
            .unwrap()
            .trim()
            .trim_start_matches("SELECT");

        for column in columns.split(',').map(str::trim) {
            assert!(SCHEMA.contains(column), "column {column} missing from schema");
        }
    }

    #[test]
    fn test_schema_keys_on_photo_and_owner() {
        assert!(SCHEMA.contains("PRIMARY KEY (photo_id, owner)"));
        assert!(SCHEMA.contains("(owner, delete_status)"));
    }
}
