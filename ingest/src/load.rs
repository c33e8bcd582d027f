use std::time;

use chrono::NaiveDateTime;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::Transaction;
use thiserror::Error;

use crate::clean::{
    BehavioralMetrics, CleanRecord, CognitiveMetrics, ExternalMetrics, Metrics, PersonAttributes,
};

/// Enumeration of errors for persistence operations. The expected
/// natural-key conflict path is not an error; anything else surfaces here
/// so the pipeline can retry or reject the record.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
}

fn query_error(command: &str) -> impl FnOnce(sqlx::Error) -> LoadError + '_ {
    move |error| LoadError::QueryError {
        command: command.to_owned(),
        error,
    }
}

/// Whether an upsert inserted a fresh measurement row or updated an
/// existing one under the (person, timestamp) uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Inserted,
    Updated,
}

/// Final row counts of the persistent tables, reported at end of run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableCounts {
    pub persons: i64,
    pub measurements: i64,
    pub rejected_records: i64,
}

/// Writes cleaned records into the relational store, one transaction per
/// record: resolve the owning person, then upsert the measurement row.
pub struct Loader {
    pool: PgPool,
}

impl Loader {
    pub async fn new(
        url: &str,
        max_connections: u32,
        acquire_timeout: time::Duration,
    ) -> Result<Self, LoadError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|error| LoadError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load one cleaned record. Re-running with the same (person, timestamp)
    /// updates the arriving source's columns rather than duplicating the
    /// row, so reprocessing a file is idempotent.
    pub async fn load(&self, record: &CleanRecord) -> Result<LoadOutcome, LoadError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|error| LoadError::ConnectionError { error })?;

        let person_id = resolve_person(&mut tx, &record.person).await?;
        let outcome = match &record.metrics {
            Metrics::Behavioral(metrics) => {
                upsert_behavioral(&mut tx, person_id, record.timestamp, metrics).await?
            }
            Metrics::Cognitive(metrics) => {
                upsert_cognitive(&mut tx, person_id, record.timestamp, metrics).await?
            }
            Metrics::External(metrics) => {
                upsert_external(&mut tx, person_id, record.timestamp, metrics).await?
            }
        };

        tx.commit().await.map_err(query_error("COMMIT"))?;

        Ok(outcome)
    }

    pub async fn table_counts(&self) -> Result<TableCounts, LoadError> {
        let (persons, measurements, rejected_records): (i64, i64, i64) = sqlx::query_as(
            r#"
SELECT
    (SELECT COUNT(*) FROM persons) AS persons,
    (SELECT COUNT(*) FROM measurements) AS measurements,
    (SELECT COUNT(*) FROM rejected_records) AS rejected_records
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .map_err(query_error("SELECT"))?;

        Ok(TableCounts {
            persons,
            measurements,
            rejected_records,
        })
    }
}

/// Look up or create the person named by the record's natural key.
/// Person attributes are first-write-wins: location and coordinates are
/// never overwritten on subsequent sightings, to avoid silent identity
/// drift.
async fn resolve_person(
    tx: &mut Transaction<'_, Postgres>,
    person: &PersonAttributes,
) -> Result<i64, LoadError> {
    let inserted: Option<i64> = sqlx::query_scalar(
        r#"
INSERT INTO persons (name, location_name, latitude, longitude)
VALUES ($1, $2, $3, $4)
ON CONFLICT (name) DO NOTHING
RETURNING person_id
        "#,
    )
    .bind(&person.name)
    .bind(&person.location_name)
    .bind(person.latitude)
    .bind(person.longitude)
    .fetch_optional(&mut **tx)
    .await
    .map_err(query_error("INSERT"))?;

    if let Some(person_id) = inserted {
        return Ok(person_id);
    }

    sqlx::query_scalar("SELECT person_id FROM persons WHERE name = $1")
        .bind(&person.name)
        .fetch_one(&mut **tx)
        .await
        .map_err(query_error("SELECT"))
}

async fn upsert_behavioral(
    tx: &mut Transaction<'_, Postgres>,
    person_id: i64,
    timestamp: NaiveDateTime,
    metrics: &BehavioralMetrics,
) -> Result<LoadOutcome, LoadError> {
    let inserted: bool = sqlx::query_scalar(
        r#"
INSERT INTO measurements (
    person_id, timestamp, sleep_hours, breakfast_skipped, lunch_skipped,
    phone_usage, caffeine_count, steps, water_glasses, exercise
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
ON CONFLICT (person_id, timestamp) DO UPDATE SET
    sleep_hours = EXCLUDED.sleep_hours,
    breakfast_skipped = EXCLUDED.breakfast_skipped,
    lunch_skipped = EXCLUDED.lunch_skipped,
    phone_usage = EXCLUDED.phone_usage,
    caffeine_count = EXCLUDED.caffeine_count,
    steps = EXCLUDED.steps,
    water_glasses = EXCLUDED.water_glasses,
    exercise = EXCLUDED.exercise
RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(person_id)
    .bind(timestamp)
    .bind(metrics.sleep_hours)
    .bind(metrics.breakfast_skipped)
    .bind(metrics.lunch_skipped)
    .bind(metrics.phone_usage)
    .bind(metrics.caffeine_count)
    .bind(metrics.steps)
    .bind(metrics.water_glasses)
    .bind(metrics.exercise)
    .fetch_one(&mut **tx)
    .await
    .map_err(query_error("INSERT"))?;

    Ok(outcome(inserted))
}

async fn upsert_cognitive(
    tx: &mut Transaction<'_, Postgres>,
    person_id: i64,
    timestamp: NaiveDateTime,
    metrics: &CognitiveMetrics,
) -> Result<LoadOutcome, LoadError> {
    let inserted: bool = sqlx::query_scalar(
        r#"
INSERT INTO measurements (
    person_id, timestamp, brain_fog_score, reaction_time_ms, verbal_memory_words
) VALUES ($1, $2, $3, $4, $5)
ON CONFLICT (person_id, timestamp) DO UPDATE SET
    brain_fog_score = EXCLUDED.brain_fog_score,
    reaction_time_ms = EXCLUDED.reaction_time_ms,
    verbal_memory_words = EXCLUDED.verbal_memory_words
RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(person_id)
    .bind(timestamp)
    .bind(metrics.brain_fog_score)
    .bind(metrics.reaction_time_ms)
    .bind(metrics.verbal_memory_words)
    .fetch_one(&mut **tx)
    .await
    .map_err(query_error("INSERT"))?;

    Ok(outcome(inserted))
}

async fn upsert_external(
    tx: &mut Transaction<'_, Postgres>,
    person_id: i64,
    timestamp: NaiveDateTime,
    metrics: &ExternalMetrics,
) -> Result<LoadOutcome, LoadError> {
    let inserted: bool = sqlx::query_scalar(
        r#"
INSERT INTO measurements (
    person_id, timestamp, pressure_hpa, pressure_change_24h, temperature,
    humidity, pm25, aqi
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
ON CONFLICT (person_id, timestamp) DO UPDATE SET
    pressure_hpa = EXCLUDED.pressure_hpa,
    pressure_change_24h = EXCLUDED.pressure_change_24h,
    temperature = EXCLUDED.temperature,
    humidity = EXCLUDED.humidity,
    pm25 = EXCLUDED.pm25,
    aqi = EXCLUDED.aqi
RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(person_id)
    .bind(timestamp)
    .bind(metrics.pressure_hpa)
    .bind(metrics.pressure_change_24h)
    .bind(metrics.temperature)
    .bind(metrics.humidity)
    .bind(metrics.pm25)
    .bind(metrics.aqi)
    .fetch_one(&mut **tx)
    .await
    .map_err(query_error("INSERT"))?;

    Ok(outcome(inserted))
}

fn outcome(inserted: bool) -> LoadOutcome {
    if inserted {
        LoadOutcome::Inserted
    } else {
        LoadOutcome::Updated
    }
}
