//! PostgreSQL backend for the entities table.

use agency_sync::{Backend, BackendError, Payload, VersionedRecord};
use async_trait::async_trait;
use sqlx::{PgPool, Row};

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub id: String,
    pub collection: String,
    pub owner: Option<String>,
    pub payload: serde_json::Value,
    pub version: i64,
    pub last_modified: i64,
    pub modified_by: String,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEntity {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntity {
            id: row.try_get("id")?,
            collection: row.try_get("collection")?,
            owner: row.try_get("owner")?,
            payload: row.try_get("payload")?,
            version: row.try_get("version")?,
            last_modified: row.try_get("last_modified")?,
            modified_by: row.try_get("modified_by")?,
        })
    }
}

impl StoredEntity {
    /// Convert a database row to a versioned record.
    pub fn into_record(self) -> Result<VersionedRecord, BackendError> {
        let payload: Payload = match self.payload {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(BackendError::new(format!(
                    "entity {} has a non-object payload: {}",
                    self.id, other
                )))
            }
        };

        Ok(VersionedRecord {
            id: self.id,
            collection: self.collection,
            owner: self.owner,
            payload,
            version: self.version as u64,
            last_modified: self.last_modified as u64,
            modified_by: self.modified_by,
        })
    }
}

fn unavailable(err: sqlx::Error) -> BackendError {
    tracing::error!("Database error: {:?}", err);
    BackendError::new(err.to_string())
}

/// [`Backend`] over a Postgres pool.
///
/// Saves only ever move a row's version forward, so a writer holding an
/// outdated record cannot overwrite a newer row written by another process.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Backend for PgBackend {
    async fn load(&self, id: &str) -> Result<Option<VersionedRecord>, BackendError> {
        sqlx::query_as::<_, StoredEntity>(
            r#"
            SELECT id, collection, owner, payload, version, last_modified, modified_by
            FROM entities
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?
        .map(StoredEntity::into_record)
        .transpose()
    }

    async fn load_all(&self, collection: &str) -> Result<Vec<VersionedRecord>, BackendError> {
        sqlx::query_as::<_, StoredEntity>(
            r#"
            SELECT id, collection, owner, payload, version, last_modified, modified_by
            FROM entities
            WHERE collection = $1
            ORDER BY id
            "#,
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?
        .into_iter()
        .map(StoredEntity::into_record)
        .collect()
    }

    async fn save(&self, record: &VersionedRecord) -> Result<(), BackendError> {
        let result = sqlx::query(
            r#"
            INSERT INTO entities (
                id, collection, owner, payload, version, last_modified, modified_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE SET
                collection = EXCLUDED.collection,
                owner = EXCLUDED.owner,
                payload = EXCLUDED.payload,
                version = EXCLUDED.version,
                last_modified = EXCLUDED.last_modified,
                modified_by = EXCLUDED.modified_by
            WHERE entities.version < EXCLUDED.version
            "#,
        )
        .bind(&record.id)
        .bind(&record.collection)
        .bind(&record.owner)
        .bind(serde_json::Value::Object(record.payload.clone()))
        .bind(record.version as i64)
        .bind(record.last_modified as i64)
        .bind(&record.modified_by)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                entity_id = %record.id,
                version = record.version,
                "Stored row is already at or past this version"
            );
            return Err(BackendError::new(format!(
                "entity {} already stored at version {} or later",
                record.id, record.version
            )));
        }

        Ok(())
    }
}
