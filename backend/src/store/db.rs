//! SQLite-backed stores
//!
//! Handles all database interactions for prompts, sessions and the activity log.

use crate::error::AppError;
use crate::store::models::{ActivityEntry, Prompt, PromptStatus, Session, SessionEnd};
use crate::store::{ActivityLog, PromptStore, SessionStore};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Database connection pool shared by all three store traits
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Initialize database connection pool
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    ///
    /// # Returns
    /// * `Ok(SqliteStore)` if successful
    /// * `Err(AppError)` if connection failed
    pub async fn new(db_path: &str) -> Result<Self, AppError> {
        // Ensure parent directory exists
        if let Some(parent) = PathBuf::from(db_path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to create db directory: {}", e))
            })?;
        }

        let connection_string = if db_path.starts_with("sqlite:") {
            db_path.to_string()
        } else {
            format!("sqlite:{}", db_path)
        };

        let options = SqliteConnectOptions::from_str(&connection_string)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Invalid database path: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to connect to database: {}", e))
            })?;

        info!("Connected to SQLite database at: {}", db_path);

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<(), AppError> {
        let migration_sql = include_str!("../../migrations/001_create_dispatch.sql");

        // Strip comments, then execute one statement at a time
        let mut cleaned_sql = String::new();
        for line in migration_sql.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with("--") {
                continue;
            }
            let without_comments = match trimmed.find("--") {
                Some(pos) => &trimmed[..pos],
                None => trimmed,
            };
            cleaned_sql.push_str(without_comments.trim());
            cleaned_sql.push(' ');
        }

        for statement in cleaned_sql
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    AppError::Internal(anyhow::anyhow!(
                        "Migration failed: {} - Statement: {}",
                        e,
                        statement.chars().take(100).collect::<String>()
                    ))
                })?;
        }

        debug!("Database migrations completed");
        Ok(())
    }

    /// Insert a prompt. Prompt authoring lives outside this service; this is
    /// used for seeding and tests.
    pub async fn create_prompt(&self, prompt: &Prompt) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO prompts (id, project_id, text, status, agent_id, model, provider, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&prompt.id)
        .bind(&prompt.project_id)
        .bind(&prompt.text)
        .bind(&prompt.status)
        .bind(&prompt.agent_id)
        .bind(&prompt.model)
        .bind(&prompt.provider)
        .bind(prompt.created_at)
        .bind(prompt.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create prompt: {}", e)))?;

        debug!("Created prompt: {}", prompt.id);
        Ok(())
    }

    /// Count sessions, optionally only the active ones
    pub async fn count_sessions(&self, active_only: bool) -> Result<i64, AppError> {
        let sql = if active_only {
            "SELECT COUNT(*) FROM sessions WHERE ended_at IS NULL"
        } else {
            "SELECT COUNT(*) FROM sessions"
        };
        sqlx::query_scalar(sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to count sessions: {}", e)))
    }

    /// Count activity log rows
    pub async fn count_activity(&self) -> Result<i64, AppError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM activity_log")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to count activity: {}", e)))
    }
}

#[async_trait]
impl PromptStore for SqliteStore {
    async fn get_prompt(&self, id: &str) -> Result<Option<Prompt>, AppError> {
        sqlx::query_as::<_, Prompt>(
            "SELECT id, project_id, text, status, agent_id, model, provider, created_at, updated_at \
             FROM prompts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to fetch prompt: {}", e)))
    }

    async fn update_status(&self, id: &str, status: PromptStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE prompts SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AppError::Internal(anyhow::anyhow!("Failed to update prompt status: {}", e))
            })?;

        debug!(prompt_id = %id, status = %status, "Updated prompt status");
        Ok(())
    }

    async fn claim(&self, id: &str, agent_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE prompts SET status = 'sent', agent_id = ?, updated_at = ? \
             WHERE id = ? AND status = 'ready'",
        )
        .bind(agent_id)
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to claim prompt: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }

    async fn unclaim(&self, id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE prompts SET status = 'ready', agent_id = NULL, updated_at = ? \
             WHERE id = ? AND status = 'sent'",
        )
        .bind(Utc::now().timestamp())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to unclaim prompt: {}", e)))?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(
        &self,
        project_id: &str,
        agent_id: &str,
        prompt_id: &str,
    ) -> Result<Session, AppError> {
        let session = Session {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            agent_id: agent_id.to_string(),
            prompt_id: Some(prompt_id.to_string()),
            started_at: Utc::now().timestamp_millis(),
            ended_at: None,
        };

        sqlx::query(
            "INSERT INTO sessions (id, project_id, agent_id, prompt_id, started_at, ended_at) \
             VALUES (?, ?, ?, ?, ?, NULL)",
        )
        .bind(&session.id)
        .bind(&session.project_id)
        .bind(&session.agent_id)
        .bind(&session.prompt_id)
        .bind(session.started_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to create session: {}", e)))?;

        debug!(session_id = %session.id, agent_id = %agent_id, "Created session");
        Ok(session)
    }

    async fn end_session(&self, id: &str) -> Result<SessionEnd, AppError> {
        let result = sqlx::query("UPDATE sessions SET ended_at = ? WHERE id = ? AND ended_at IS NULL")
            .bind(Utc::now().timestamp_millis())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to end session: {}", e)))?;

        let transitioned = result.rows_affected() == 1;
        Ok(match self.get_session(id).await? {
            Some(session) if transitioned => SessionEnd::Ended(session),
            Some(session) => SessionEnd::AlreadyEnded(session),
            None => SessionEnd::NotFound,
        })
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>, AppError> {
        sqlx::query_as::<_, Session>(
            "SELECT id, project_id, agent_id, prompt_id, started_at, ended_at FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to fetch session: {}", e)))
    }
}

#[async_trait]
impl ActivityLog for SqliteStore {
    async fn record(&self, entry: &ActivityEntry) -> Result<(), AppError> {
        sqlx::query(
            "INSERT INTO activity_log (id, project_id, action, entity_type, entity_id, detail, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.project_id)
        .bind(&entry.action)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(entry.detail.to_string())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("Failed to record activity: {}", e)))?;
        Ok(())
    }
}
