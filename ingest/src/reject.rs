use async_trait::async_trait;
use sqlx::postgres::PgPool;
use thiserror::Error;

use crate::record::RawRecord;

/// A rejection write failure. Logged by the pipeline but never allowed to
/// abort processing of other records: audit completeness is best-effort
/// relative to the primary load path.
#[derive(Error, Debug)]
pub enum SinkWriteError {
    #[error("failed to record rejection: {error}")]
    QueryError { error: sqlx::Error },
}

#[async_trait]
pub trait RejectSink {
    async fn reject(&self, record: &RawRecord, reason: &str) -> Result<(), SinkWriteError>;
}

/// Appends rejected raw payloads to the rejected_records audit table,
/// preserved verbatim for reprocessing.
pub struct PgRejectionSink {
    pool: PgPool,
}

impl PgRejectionSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RejectSink for PgRejectionSink {
    async fn reject(&self, record: &RawRecord, reason: &str) -> Result<(), SinkWriteError> {
        sqlx::query(
            "INSERT INTO rejected_records (source_name, raw_payload, reason) VALUES ($1, $2, $3)",
        )
        .bind(&record.source)
        .bind(sqlx::types::Json(record.payload()))
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|error| SinkWriteError::QueryError { error })?;

        Ok(())
    }
}

/// Logs rejections instead of persisting them. For local runs and tests.
pub struct PrintSink {}

#[async_trait]
impl RejectSink for PrintSink {
    async fn reject(&self, record: &RawRecord, reason: &str) -> Result<(), SinkWriteError> {
        tracing::info!(source = %record.source, reason, "rejected record");

        Ok(())
    }
}
