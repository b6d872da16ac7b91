use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::info;

use super::{
    AnalysisResultRecord, AnalysisStatus, AnalysisStatusRecord, AuditFields, CompositeScoreRecord,
    CompositeStatus, ProviderScore, Storage, Subject,
};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::scoring::DimensionScores;

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Owner column value for system-owned status records.
const SYSTEM_OWNER: &str = "";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Create an in-memory database on a single connection.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }
}

fn owner_key(owner_id: Option<&str>) -> &str {
    owner_id.unwrap_or(SYSTEM_OWNER)
}

fn parse_timestamp(column: &str, raw: &str) -> StorageResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| invalid_column(column, e))
}

fn audit_from(created_at: &str, updated_at: &str) -> StorageResult<AuditFields> {
    Ok(AuditFields {
        created_at: parse_timestamp("created_at", created_at)?,
        updated_at: parse_timestamp("updated_at", updated_at)?,
    })
}

fn invalid_column(column: &str, message: impl std::fmt::Display) -> StorageError {
    StorageError::Query {
        message: format!("Invalid {} value: {}", column, message),
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn upsert_status(&self, record: &AnalysisStatusRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_status (owner_id, item_id, analysis_id, status, composite_score,
                summary, raw_result_payload, error_message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (owner_id, item_id) DO UPDATE SET
                analysis_id = excluded.analysis_id,
                status = excluded.status,
                composite_score = excluded.composite_score,
                summary = excluded.summary,
                raw_result_payload = excluded.raw_result_payload,
                error_message = excluded.error_message,
                created_at = excluded.created_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(owner_key(record.owner_id.as_deref()))
        .bind(&record.item_id)
        .bind(&record.analysis_id)
        .bind(record.status.as_str())
        .bind(record.composite_score)
        .bind(&record.summary)
        .bind(&record.raw_result_payload)
        .bind(&record.error_message)
        .bind(record.audit.created_at.to_rfc3339())
        .bind(record.audit.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_status(
        &self,
        owner_id: Option<&str>,
        item_id: &str,
    ) -> StorageResult<Option<AnalysisStatusRecord>> {
        let row: Option<StatusRow> = sqlx::query_as(
            r#"
            SELECT owner_id, item_id, analysis_id, status, composite_score, summary,
                raw_result_payload, error_message, created_at, updated_at
            FROM analysis_status
            WHERE owner_id = ? AND item_id = ?
            "#,
        )
        .bind(owner_key(owner_id))
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AnalysisStatusRecord::try_from).transpose()
    }

    async fn list_statuses(&self, status: AnalysisStatus) -> StorageResult<Vec<AnalysisStatusRecord>> {
        let rows: Vec<StatusRow> = sqlx::query_as(
            r#"
            SELECT owner_id, item_id, analysis_id, status, composite_score, summary,
                raw_result_payload, error_message, created_at, updated_at
            FROM analysis_status
            WHERE status = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AnalysisStatusRecord::try_from).collect()
    }

    async fn delete_status(&self, owner_id: Option<&str>, item_id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM analysis_status WHERE owner_id = ? AND item_id = ?")
            .bind(owner_key(owner_id))
            .bind(item_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn upsert_result(&self, record: &AnalysisResultRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_results (subject_id, composite_score, summary, category,
                category_reason, claims, raw_payload, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (subject_id) DO UPDATE SET
                composite_score = excluded.composite_score,
                summary = excluded.summary,
                category = excluded.category,
                category_reason = excluded.category_reason,
                claims = excluded.claims,
                raw_payload = excluded.raw_payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.subject_id)
        .bind(record.composite_score)
        .bind(&record.summary)
        .bind(&record.category)
        .bind(&record.category_reason)
        .bind(&record.claims)
        .bind(&record.raw_payload)
        .bind(record.audit.created_at.to_rfc3339())
        .bind(record.audit.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_result(&self, subject_id: &str) -> StorageResult<Option<AnalysisResultRecord>> {
        let row: Option<ResultRow> = sqlx::query_as(
            r#"
            SELECT subject_id, composite_score, summary, category, category_reason, claims,
                raw_payload, created_at, updated_at
            FROM analysis_results
            WHERE subject_id = ?
            "#,
        )
        .bind(subject_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AnalysisResultRecord::try_from).transpose()
    }

    async fn list_results(&self) -> StorageResult<Vec<AnalysisResultRecord>> {
        let rows: Vec<ResultRow> = sqlx::query_as(
            r#"
            SELECT subject_id, composite_score, summary, category, category_reason, claims,
                raw_payload, created_at, updated_at
            FROM analysis_results
            ORDER BY subject_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AnalysisResultRecord::try_from).collect()
    }

    async fn save_composite(&self, record: &CompositeScoreRecord) -> StorageResult<()> {
        let provider_scores = serde_json::to_string(&record.provider_scores)
            .map_err(|e| invalid_column("provider_scores", e))?;
        let scores = &record.dimension_scores;

        sqlx::query(
            r#"
            INSERT INTO composite_scores (id, subject_id, analysis_date, analysis_period,
                overall_score, accuracy_score, objectivity_score, reliability_score,
                expertise_score, provider_scores, analysis_status, error_message, retry_count,
                created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (subject_id, analysis_date) DO UPDATE SET
                id = excluded.id,
                analysis_period = excluded.analysis_period,
                overall_score = excluded.overall_score,
                accuracy_score = excluded.accuracy_score,
                objectivity_score = excluded.objectivity_score,
                reliability_score = excluded.reliability_score,
                expertise_score = excluded.expertise_score,
                provider_scores = excluded.provider_scores,
                analysis_status = excluded.analysis_status,
                error_message = excluded.error_message,
                retry_count = excluded.retry_count,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(&record.subject_id)
        .bind(record.analysis_date.format(DATE_FORMAT).to_string())
        .bind(&record.analysis_period)
        .bind(record.overall_score)
        .bind(scores.accuracy)
        .bind(scores.objectivity)
        .bind(scores.reliability)
        .bind(scores.expertise)
        .bind(provider_scores)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(i64::from(record.retry_count))
        .bind(record.audit.created_at.to_rfc3339())
        .bind(record.audit.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_composite(
        &self,
        subject_id: &str,
        analysis_date: NaiveDate,
    ) -> StorageResult<Option<CompositeScoreRecord>> {
        let row: Option<CompositeRow> = sqlx::query_as(
            r#"
            SELECT id, subject_id, analysis_date, analysis_period, overall_score, accuracy_score,
                objectivity_score, reliability_score, expertise_score, provider_scores,
                analysis_status, error_message, retry_count, created_at, updated_at
            FROM composite_scores
            WHERE subject_id = ? AND analysis_date = ?
            "#,
        )
        .bind(subject_id)
        .bind(analysis_date.format(DATE_FORMAT).to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(CompositeScoreRecord::try_from).transpose()
    }

    async fn delete_composite(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM composite_scores WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_composites(&self, status: CompositeStatus) -> StorageResult<Vec<CompositeScoreRecord>> {
        let rows: Vec<CompositeRow> = sqlx::query_as(
            r#"
            SELECT id, subject_id, analysis_date, analysis_period, overall_score, accuracy_score,
                objectivity_score, reliability_score, expertise_score, provider_scores,
                analysis_status, error_message, retry_count, created_at, updated_at
            FROM composite_scores
            WHERE analysis_status = ?
            ORDER BY analysis_date ASC, subject_id ASC
            "#,
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(CompositeScoreRecord::try_from).collect()
    }

    async fn upsert_subject(&self, subject: &Subject) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subjects (id, name, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&subject.id)
        .bind(&subject.name)
        .bind(subject.active)
        .bind(subject.audit.created_at.to_rfc3339())
        .bind(subject.audit.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_subject(&self, id: &str) -> StorageResult<Option<Subject>> {
        let row: Option<SubjectRow> = sqlx::query_as(
            r#"
            SELECT id, name, active, created_at, updated_at
            FROM subjects
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Subject::try_from).transpose()
    }

    async fn list_active_subjects(&self) -> StorageResult<Vec<Subject>> {
        let rows: Vec<SubjectRow> = sqlx::query_as(
            r#"
            SELECT id, name, active, created_at, updated_at
            FROM subjects
            WHERE active = 1
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Subject::try_from).collect()
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct StatusRow {
    owner_id: String,
    item_id: String,
    analysis_id: String,
    status: String,
    composite_score: Option<i64>,
    summary: Option<String>,
    raw_result_payload: Option<String>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<StatusRow> for AnalysisStatusRecord {
    type Error = StorageError;

    fn try_from(row: StatusRow) -> Result<Self, Self::Error> {
        Ok(Self {
            owner_id: Some(row.owner_id).filter(|o| !o.is_empty()),
            item_id: row.item_id,
            analysis_id: row.analysis_id,
            status: row.status.parse().map_err(|e| invalid_column("status", e))?,
            composite_score: row.composite_score,
            summary: row.summary,
            raw_result_payload: row.raw_result_payload,
            error_message: row.error_message,
            audit: audit_from(&row.created_at, &row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    subject_id: String,
    composite_score: Option<i64>,
    summary: Option<String>,
    category: Option<String>,
    category_reason: Option<String>,
    claims: Option<String>,
    raw_payload: String,
    created_at: String,
    updated_at: String,
}

impl TryFrom<ResultRow> for AnalysisResultRecord {
    type Error = StorageError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        Ok(Self {
            subject_id: row.subject_id,
            composite_score: row.composite_score,
            summary: row.summary,
            category: row.category,
            category_reason: row.category_reason,
            claims: row.claims,
            raw_payload: row.raw_payload,
            audit: audit_from(&row.created_at, &row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CompositeRow {
    id: String,
    subject_id: String,
    analysis_date: String,
    analysis_period: String,
    overall_score: Option<i64>,
    accuracy_score: Option<i64>,
    objectivity_score: Option<i64>,
    reliability_score: Option<i64>,
    expertise_score: Option<i64>,
    provider_scores: String,
    analysis_status: String,
    error_message: Option<String>,
    retry_count: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<CompositeRow> for CompositeScoreRecord {
    type Error = StorageError;

    fn try_from(row: CompositeRow) -> Result<Self, Self::Error> {
        let provider_scores: BTreeMap<String, ProviderScore> =
            serde_json::from_str(&row.provider_scores)
                .map_err(|e| invalid_column("provider_scores", e))?;

        Ok(Self {
            id: row.id,
            subject_id: row.subject_id,
            analysis_date: NaiveDate::parse_from_str(&row.analysis_date, DATE_FORMAT)
                .map_err(|e| invalid_column("analysis_date", e))?,
            analysis_period: row.analysis_period,
            overall_score: row.overall_score,
            dimension_scores: DimensionScores {
                accuracy: row.accuracy_score,
                objectivity: row.objectivity_score,
                reliability: row.reliability_score,
                expertise: row.expertise_score,
            },
            provider_scores,
            status: row
                .analysis_status
                .parse()
                .map_err(|e| invalid_column("analysis_status", e))?,
            error_message: row.error_message,
            retry_count: u32::try_from(row.retry_count).unwrap_or(0),
            audit: audit_from(&row.created_at, &row.updated_at)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubjectRow {
    id: String,
    name: String,
    active: bool,
    created_at: String,
    updated_at: String,
}

impl TryFrom<SubjectRow> for Subject {
    type Error = StorageError;

    fn try_from(row: SubjectRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            name: row.name,
            active: row.active,
            audit: audit_from(&row.created_at, &row.updated_at)?,
        })
    }
}
