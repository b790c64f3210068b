use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eyre::Result;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    ML_COUNTER_ID, MlCounter, ReindexOperation, ReindexStatus, ReindexStep, Stored,
    StoredMlCounter, StoredOperation,
};
use crate::store::ReindexStore;

pub async fn connect_db(url: &str) -> Result<PgPool> {
    let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
    Ok(pool)
}

/// Postgres-backed store. Optimistic concurrency is a single conditional
/// `UPDATE ... WHERE id = $1 AND version = $2`; zero affected rows means the
/// caller lost the race.
pub struct PostgresStore {
    pool: PgPool,
}

const OPERATION_COLUMNS: &str = "id, version, index_name, new_index_name, status, \
     last_completed_step, locked, reindex_task_id, reindex_task_perc_complete, error_message";

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create tables and indexes if they don't exist.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reindex_operations (
                id TEXT PRIMARY KEY,
                version BIGINT NOT NULL,
                index_name TEXT NOT NULL,
                new_index_name TEXT NOT NULL,
                status TEXT NOT NULL,
                last_completed_step TEXT NOT NULL,
                locked TIMESTAMPTZ,
                reindex_task_id TEXT,
                reindex_task_perc_complete DOUBLE PRECISION,
                error_message TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reindex_operations_index_name \
             ON reindex_operations (index_name)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_reindex_operations_status \
             ON reindex_operations (status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ml_reindex_counter (
                id TEXT PRIMARY KEY,
                version BIGINT NOT NULL,
                ml_reindex_count INT NOT NULL,
                locked TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("store schema initialized");
        Ok(())
    }
}

fn row_to_operation(row: &PgRow) -> Result<StoredOperation, StoreError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let step: String = row.try_get("last_completed_step")?;

    let status = ReindexStatus::parse(&status).ok_or_else(|| StoreError::Corrupt {
        id: id.clone(),
        reason: format!("unknown status {status:?}"),
    })?;
    let last_completed_step = ReindexStep::parse(&step).ok_or_else(|| StoreError::Corrupt {
        id: id.clone(),
        reason: format!("unknown step {step:?}"),
    })?;

    Ok(Stored {
        version: row.try_get("version")?,
        attributes: ReindexOperation {
            index_name: row.try_get("index_name")?,
            new_index_name: row.try_get("new_index_name")?,
            status,
            last_completed_step,
            locked: row.try_get::<Option<DateTime<Utc>>, _>("locked")?,
            reindex_task_id: row.try_get("reindex_task_id")?,
            reindex_task_perc_complete: row.try_get("reindex_task_perc_complete")?,
            error_message: row.try_get("error_message")?,
        },
        id,
    })
}

fn row_to_counter(row: &PgRow) -> Result<StoredMlCounter, StoreError> {
    Ok(Stored {
        id: row.try_get("id")?,
        version: row.try_get("version")?,
        attributes: MlCounter {
            ml_reindex_count: row.try_get("ml_reindex_count")?,
            locked: row.try_get::<Option<DateTime<Utc>>, _>("locked")?,
        },
    })
}

#[async_trait]
impl ReindexStore for PostgresStore {
    async fn create_operation(&self, op: ReindexOperation) -> Result<StoredOperation, StoreError> {
        let id = Uuid::new_v4().to_string();
        let row = sqlx::query(&format!(
            "INSERT INTO reindex_operations ({OPERATION_COLUMNS}) \
             VALUES ($1, 1, $2, $3, $4, $5, $6, $7, $8, $9) \
             RETURNING {OPERATION_COLUMNS}"
        ))
        .bind(&id)
        .bind(&op.index_name)
        .bind(&op.new_index_name)
        .bind(op.status.as_str())
        .bind(op.last_completed_step.as_str())
        .bind(op.locked)
        .bind(&op.reindex_task_id)
        .bind(op.reindex_task_perc_complete)
        .bind(&op.error_message)
        .fetch_one(&self.pool)
        .await?;
        row_to_operation(&row)
    }

    async fn update_operation(&self, doc: StoredOperation) -> Result<StoredOperation, StoreError> {
        let op = &doc.attributes;
        let row = sqlx::query(&format!(
            "UPDATE reindex_operations SET \
                 version = version + 1, \
                 new_index_name = $3, \
                 status = $4, \
                 last_completed_step = $5, \
                 locked = $6, \
                 reindex_task_id = $7, \
                 reindex_task_perc_complete = $8, \
                 error_message = $9 \
             WHERE id = $1 AND version = $2 \
             RETURNING {OPERATION_COLUMNS}"
        ))
        .bind(&doc.id)
        .bind(doc.version)
        .bind(&op.new_index_name)
        .bind(op.status.as_str())
        .bind(op.last_completed_step.as_str())
        .bind(op.locked)
        .bind(&op.reindex_task_id)
        .bind(op.reindex_task_perc_complete)
        .bind(&op.error_message)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_operation(&row),
            None => Err(StoreError::Conflict(doc.id)),
        }
    }

    async fn delete_operation(&self, doc: &StoredOperation) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM reindex_operations WHERE id = $1")
            .bind(&doc.id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn operations_by_index(
        &self,
        index_name: &str,
    ) -> Result<Vec<StoredOperation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {OPERATION_COLUMNS} FROM reindex_operations WHERE index_name = $1"
        ))
        .bind(index_name)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_operation).collect()
    }

    async fn operations_by_status(
        &self,
        status: ReindexStatus,
    ) -> Result<Vec<StoredOperation>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {OPERATION_COLUMNS} FROM reindex_operations WHERE status = $1"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_operation).collect()
    }

    async fn ml_counter(&self) -> Result<StoredMlCounter, StoreError> {
        sqlx::query(
            "INSERT INTO ml_reindex_counter (id, version, ml_reindex_count, locked) \
             VALUES ($1, 1, 0, NULL) ON CONFLICT (id) DO NOTHING",
        )
        .bind(ML_COUNTER_ID)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query(
            "SELECT id, version, ml_reindex_count, locked FROM ml_reindex_counter WHERE id = $1",
        )
        .bind(ML_COUNTER_ID)
        .fetch_one(&self.pool)
        .await?;
        row_to_counter(&row)
    }

    async fn update_ml_counter(
        &self,
        doc: StoredMlCounter,
    ) -> Result<StoredMlCounter, StoreError> {
        let row = sqlx::query(
            "UPDATE ml_reindex_counter SET \
                 version = version + 1, ml_reindex_count = $3, locked = $4 \
             WHERE id = $1 AND version = $2 \
             RETURNING id, version, ml_reindex_count, locked",
        )
        .bind(&doc.id)
        .bind(doc.version)
        .bind(doc.attributes.ml_reindex_count)
        .bind(doc.attributes.locked)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_counter(&row),
            None => Err(StoreError::Conflict(doc.id)),
        }
    }
}
