//! PostgreSQL record store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;

use crate::types::{Anchor, AtomRecord, AtomStatus, Envelope, Portal, StatusCodeError, Thread};
use super::{CasOutcome, RecordStore};

/// DDL for every table the kernel requires, idempotent.
pub const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS atoms (
        id TEXT PRIMARY KEY,
        content TEXT NOT NULL,
        domain TEXT NOT NULL,
        status SMALLINT NOT NULL,
        content_hash TEXT NOT NULL,
        last_validated TIMESTAMPTZ
    )",
    "CREATE TABLE IF NOT EXISTS geometry (
        atom_id TEXT PRIMARY KEY,
        x BIGINT NOT NULL,
        y BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS envelopes (
        id TEXT PRIMARY KEY,
        domain TEXT NOT NULL,
        x BIGINT NOT NULL,
        y BIGINT NOT NULL,
        w BIGINT NOT NULL,
        h BIGINT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS threads (
        source TEXT NOT NULL,
        target TEXT NOT NULL,
        PRIMARY KEY (source, target)
    )",
    "CREATE TABLE IF NOT EXISTS portals (
        atom_id TEXT NOT NULL,
        path TEXT NOT NULL,
        description TEXT
    )",
];

/// Error type for the PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresStoreError {
    /// Query or connection failure.
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    /// Persisted status code outside the enum.
    #[error(transparent)]
    Status(#[from] StatusCodeError),
}

/// Configuration for the PostgreSQL connection pool.
///
/// Production defaults balance concurrency with connection limits; timeouts
/// are aggressive to fail fast, idle connections are released, and a max
/// lifetime forces periodic reconnection for health.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables with production defaults.
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/sentinel".to_string()),
            max_connections: std::env::var("DB_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            min_connections: std::env::var("DB_MIN_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            connect_timeout_secs: std::env::var("DB_CONNECT_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),
            idle_timeout_secs: std::env::var("DB_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(300),
            max_lifetime_secs: std::env::var("DB_MAX_LIFETIME_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1800),
        }
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// PostgreSQL record store.
///
/// The status CAS is a conditional UPDATE checked via `rows_affected`, which
/// is the only synchronization the reservation protocol requires.
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, sqlx::Error> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            max_lifetime_secs = config.max_lifetime_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, sqlx::Error> {
        Self::new(PostgresConfig::from_env()).await
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    /// Create every required table if it does not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        for ddl in SCHEMA {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn row_to_atom(row: &sqlx::postgres::PgRow) -> Result<AtomRecord, PostgresStoreError> {
    let status = AtomStatus::from_code(row.try_get::<i16, _>("status")?)?;
    Ok(AtomRecord {
        id: row.try_get("id")?,
        content: row.try_get("content")?,
        domain: row.try_get("domain")?,
        status,
        content_hash: row.try_get("content_hash")?,
        last_validated: row.try_get::<Option<DateTime<Utc>>, _>("last_validated")?,
    })
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    type Error = PostgresStoreError;

    async fn get_atom(&self, id: &str) -> Result<Option<AtomRecord>, Self::Error> {
        let row = sqlx::query(
            "SELECT id, content, domain, status, content_hash, last_validated
             FROM atoms WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_atom).transpose()
    }

    async fn list_atoms(&self) -> Result<Vec<AtomRecord>, Self::Error> {
        let rows = sqlx::query(
            "SELECT id, content, domain, status, content_hash, last_validated
             FROM atoms ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_atom).collect()
    }

    async fn put_atom(&self, record: AtomRecord) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO atoms (id, content, domain, status, content_hash, last_validated)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                 content = excluded.content,
                 domain = excluded.domain,
                 status = excluded.status,
                 content_hash = excluded.content_hash,
                 last_validated = excluded.last_validated",
        )
        .bind(&record.id)
        .bind(&record.content)
        .bind(&record.domain)
        .bind(record.status.code())
        .bind(&record.content_hash)
        .bind(record.last_validated)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn compare_and_swap_status(
        &self,
        id: &str,
        expected: AtomStatus,
        next: AtomStatus,
    ) -> Result<CasOutcome, Self::Error> {
        let result = sqlx::query("UPDATE atoms SET status = $1 WHERE id = $2 AND status = $3")
            .bind(next.code())
            .bind(id)
            .bind(expected.code())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 1 {
            return Ok(CasOutcome::Swapped);
        }

        let row = sqlx::query("SELECT status FROM atoms WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            None => Ok(CasOutcome::Missing),
            Some(row) => Ok(CasOutcome::Mismatch(AtomStatus::from_code(
                row.try_get::<i16, _>("status")?,
            )?)),
        }
    }

    async fn set_last_validated(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, Self::Error> {
        let result = sqlx::query("UPDATE atoms SET last_validated = $1 WHERE id = $2")
            .bind(at)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn reset_busy(&self, fallback: AtomStatus) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query("UPDATE atoms SET status = $1 WHERE status = $2 RETURNING id")
            .bind(fallback.code())
            .bind(AtomStatus::Busy.code())
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("id").map_err(Into::into))
            .collect()
    }

    async fn get_anchor(&self, atom_id: &str) -> Result<Option<Anchor>, Self::Error> {
        let row = sqlx::query("SELECT atom_id, x, y FROM geometry WHERE atom_id = $1")
            .bind(atom_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            None => None,
            Some(row) => Some(Anchor::new(
                row.try_get::<String, _>("atom_id")?,
                row.try_get("x")?,
                row.try_get("y")?,
            )),
        })
    }

    async fn list_anchors(&self) -> Result<Vec<Anchor>, Self::Error> {
        let rows = sqlx::query("SELECT atom_id, x, y FROM geometry ORDER BY atom_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Anchor::new(
                    row.try_get::<String, _>("atom_id")?,
                    row.try_get("x")?,
                    row.try_get("y")?,
                ))
            })
            .collect()
    }

    async fn upsert_anchor(&self, anchor: Anchor) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO geometry (atom_id, x, y) VALUES ($1, $2, $3)
             ON CONFLICT (atom_id) DO UPDATE SET x = excluded.x, y = excluded.y",
        )
        .bind(&anchor.atom_id)
        .bind(anchor.x)
        .bind(anchor.y)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_envelopes(&self) -> Result<Vec<Envelope>, Self::Error> {
        let rows = sqlx::query("SELECT id, domain, x, y, w, h FROM envelopes ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Envelope::new(
                    row.try_get::<String, _>("id")?,
                    row.try_get::<String, _>("domain")?,
                    row.try_get("x")?,
                    row.try_get("y")?,
                    row.try_get("w")?,
                    row.try_get("h")?,
                ))
            })
            .collect()
    }

    async fn upsert_envelope(&self, envelope: Envelope) -> Result<(), Self::Error> {
        sqlx::query(
            "INSERT INTO envelopes (id, domain, x, y, w, h) VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (id) DO UPDATE SET
                 domain = excluded.domain,
                 x = excluded.x,
                 y = excluded.y,
                 w = excluded.w,
                 h = excluded.h",
        )
        .bind(&envelope.id)
        .bind(&envelope.domain)
        .bind(envelope.x)
        .bind(envelope.y)
        .bind(envelope.w)
        .bind(envelope.h)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_envelope(&self, id: &str) -> Result<bool, Self::Error> {
        let result = sqlx::query("DELETE FROM envelopes WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_threads(&self) -> Result<Vec<Thread>, Self::Error> {
        let rows = sqlx::query("SELECT source, target FROM threads ORDER BY source, target")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(Thread::new(
                    row.try_get::<String, _>("source")?,
                    row.try_get::<String, _>("target")?,
                ))
            })
            .collect()
    }

    async fn insert_thread(&self, thread: Thread) -> Result<bool, Self::Error> {
        let result = sqlx::query(
            "INSERT INTO threads (source, target) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(&thread.source)
        .bind(&thread.target)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn neighbors(&self, atom_id: &str) -> Result<Vec<String>, Self::Error> {
        let rows = sqlx::query(
            "SELECT target AS neighbor FROM threads WHERE source = $1
             UNION
             SELECT source AS neighbor FROM threads WHERE target = $1
             ORDER BY neighbor",
        )
        .bind(atom_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("neighbor").map_err(Into::into))
            .collect()
    }

    async fn list_portals(&self, atom_id: &str) -> Result<Vec<Portal>, Self::Error> {
        let rows = sqlx::query(
            "SELECT atom_id, path, description FROM portals WHERE atom_id = $1",
        )
        .bind(atom_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Portal::new(
                    row.try_get::<String, _>("atom_id")?,
                    row.try_get::<String, _>("path")?,
                    row.try_get::<Option<String>, _>("description")?,
                ))
            })
            .collect()
    }

    async fn add_portal(&self, portal: Portal) -> Result<(), Self::Error> {
        sqlx::query("INSERT INTO portals (atom_id, path, description) VALUES ($1, $2, $3)")
            .bind(&portal.atom_id)
            .bind(&portal.path)
            .bind(&portal.description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
