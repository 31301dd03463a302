use crate::config::PersistenceConfig;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::{error, info, warn};

/// Connection-pool owner for the registry, scan-result, and session tables.
/// Constructed once per process and cloned cheaply (the inner pool is an
/// `Arc`-backed handle).
#[derive(Clone)]
pub struct Persistence {
    pool: PgPool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PersistenceHealth {
    pub is_connected: bool,
    pub pool_size: u32,
    pub idle_connections: usize,
    pub error_message: Option<String>,
}

/// A persisted row from `agent_scan_results`, as returned to the status endpoint.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, sqlx::FromRow)]
pub struct AgentScanResultRow {
    pub task_id: uuid::Uuid,
    pub session_id: Option<uuid::Uuid>,
    pub entities_found: Value,
    pub tool_results: Value,
    pub risk_level: String,
    pub confidence: i32,
    pub reasoning_text: String,
    pub reasoning_method: String,
    pub processing_time_ms: i64,
    pub created_at: DateTime<Utc>,
}

impl Persistence {
    pub async fn connect(config: &PersistenceConfig) -> Result<Self> {
        let database_url = std::env::var(&config.database_url_env).map_err(|_| {
            Error::config(format!(
                "{} not set — persistence requires a database URL",
                config.database_url_env
            ))
        })?;

        let max_attempts = 3;
        for attempt in 1..=max_attempts {
            match PgPoolOptions::new()
                .max_connections(config.pool_size)
                .acquire_timeout(std::time::Duration::from_secs(10))
                .connect(&database_url)
                .await
            {
                Ok(pool) => {
                    let db = Self { pool };
                    db.initialize_schema().await?;
                    info!(attempt, "connected to persistence store");
                    return Ok(db);
                }
                Err(e) => {
                    error!(attempt, "persistence connection attempt failed: {e}");
                    if attempt < max_attempts {
                        tokio::time::sleep(std::time::Duration::from_secs(2 * attempt)).await;
                    } else {
                        return Err(Error::persistence(format!(
                            "failed to connect after {max_attempts} attempts: {e}"
                        )));
                    }
                }
            }
        }
        unreachable!()
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn initialize_schema(&self) -> Result<()> {
        for stmt in SCHEMA_STATEMENTS {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::persistence(format!("schema init failed: {e}")))?;
        }
        Ok(())
    }

    pub async fn health(&self) -> PersistenceHealth {
        if self.pool.is_closed() {
            return PersistenceHealth {
                is_connected: false,
                pool_size: 0,
                idle_connections: 0,
                error_message: Some("connection pool is closed".into()),
            };
        }
        match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => PersistenceHealth {
                is_connected: true,
                pool_size: self.pool.size(),
                idle_connections: self.pool.num_idle(),
                error_message: None,
            },
            Err(e) => PersistenceHealth {
                is_connected: false,
                pool_size: self.pool.size(),
                idle_connections: self.pool.num_idle(),
                error_message: Some(e.to_string()),
            },
        }
    }

    pub async fn insert_scan_result(
        &self,
        task_id: uuid::Uuid,
        session_id: Option<uuid::Uuid>,
        entities_found: &Value,
        tool_results: &Value,
        risk_level: &str,
        confidence: i32,
        reasoning_text: &str,
        reasoning_method: &str,
        processing_time_ms: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO agent_scan_results
                (task_id, session_id, entities_found, tool_results, risk_level,
                 confidence, reasoning_text, reasoning_method, processing_time_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now())
            ON CONFLICT (task_id) DO UPDATE SET
                risk_level = EXCLUDED.risk_level,
                confidence = EXCLUDED.confidence,
                reasoning_text = EXCLUDED.reasoning_text,
                reasoning_method = EXCLUDED.reasoning_method,
                processing_time_ms = EXCLUDED.processing_time_ms
            "#,
        )
        .bind(task_id)
        .bind(session_id)
        .bind(entities_found)
        .bind(tool_results)
        .bind(risk_level)
        .bind(confidence)
        .bind(reasoning_text)
        .bind(reasoning_method)
        .bind(processing_time_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::persistence(format!("insert agent_scan_results: {e}")))?;
        Ok(())
    }

    pub async fn get_scan_result(&self, task_id: uuid::Uuid) -> Result<Option<AgentScanResultRow>> {
        let row = sqlx::query_as::<_, AgentScanResultRow>(
            r#"
            SELECT task_id, session_id, entities_found, tool_results, risk_level,
                   confidence, reasoning_text, reasoning_method, processing_time_ms, created_at
            FROM agent_scan_results WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::persistence(format!("fetch agent_scan_results: {e}")))?;
        Ok(row)
    }

    /// Retention sweep: `agent_scan_results` rows older than 7 days are deleted.
    pub async fn sweep_expired_scan_results(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM agent_scan_results WHERE created_at < now() - interval '7 days'",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::persistence(format!("sweep agent_scan_results: {e}")))?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            info!(deleted, "swept expired agent_scan_results rows");
        }
        Ok(deleted)
    }

    /// Archive policy: `last_reported < now - 365d` AND NOT (`verified` AND `risk_score > 70`).
    pub async fn sweep_archivable_reports(&self) -> Result<u64> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::persistence(format!("begin archive tx: {e}")))?;

        let result = sqlx::query(
            r#"
            WITH moved AS (
                DELETE FROM scam_reports
                WHERE last_reported < now() - interval '365 days'
                  AND NOT (verified AND risk_score > 70)
                RETURNING *
            )
            INSERT INTO archived_scam_reports
            SELECT * FROM moved
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::persistence(format!("archive sweep: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| Error::persistence(format!("commit archive tx: {e}")))?;

        let archived = result.rows_affected();
        if archived > 0 {
            info!(archived, "archived stale scam_reports rows");
        } else {
            warn!("archive sweep found nothing to move");
        }
        Ok(archived)
    }
}

const SCHEMA_STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS scam_reports (
        id BIGSERIAL PRIMARY KEY,
        entity_type TEXT NOT NULL,
        entity_value TEXT NOT NULL,
        report_count INTEGER NOT NULL DEFAULT 1,
        risk_score INTEGER NOT NULL DEFAULT 0,
        first_seen TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_reported TIMESTAMPTZ NOT NULL DEFAULT now(),
        evidence JSONB NOT NULL DEFAULT '[]',
        verified BOOLEAN NOT NULL DEFAULT false,
        notes TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        UNIQUE (entity_type, entity_value)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_scam_reports_lookup ON scam_reports (entity_type, entity_value)",
    r#"
    CREATE TABLE IF NOT EXISTS archived_scam_reports (
        LIKE scam_reports INCLUDING ALL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agent_scan_results (
        id BIGSERIAL PRIMARY KEY,
        task_id UUID NOT NULL UNIQUE,
        session_id UUID,
        entities_found JSONB NOT NULL DEFAULT '{}',
        tool_results JSONB NOT NULL DEFAULT '{}',
        risk_level TEXT NOT NULL,
        confidence INTEGER NOT NULL,
        reasoning_text TEXT NOT NULL,
        reasoning_method TEXT NOT NULL,
        processing_time_ms BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_scan_results_session ON agent_scan_results (session_id)",
    "CREATE INDEX IF NOT EXISTS idx_scan_results_risk ON agent_scan_results (risk_level)",
    "CREATE INDEX IF NOT EXISTS idx_scan_results_entities_gin ON agent_scan_results USING GIN (entities_found)",
    "CREATE INDEX IF NOT EXISTS idx_scan_results_tools_gin ON agent_scan_results USING GIN (tool_results)",
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id UUID PRIMARY KEY,
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
        last_seen_at TIMESTAMPTZ NOT NULL DEFAULT now()
    )
    "#,
];
