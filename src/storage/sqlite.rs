//! SQLite storage backend
//!
//! Persistent storage using SQLite via sqlx: the outbox queue with atomic
//! claim-or-skip dequeue, versioned whole-document mindscape writes,
//! observation records, feedback, and persona usage records.
//!
//! Timestamps are stored as RFC3339 TEXT with fixed microsecond precision
//! and a Z suffix so lexicographic comparison matches chronological order.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{PersonaKitError, Result};
use crate::storage::{EngineStore, PersonaUsage};
use crate::types::{
    Feedback, Mindscape, Observation, ObservationType, PersonId, Task, TaskId, TaskStatus, TraitMap,
};

/// Schema statements, executed in order at startup (idempotent)
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS outbox_tasks (
        id TEXT PRIMARY KEY,
        task_type TEXT NOT NULL,
        payload TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        attempts INTEGER NOT NULL DEFAULT 0,
        last_error TEXT,
        run_after TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        completed_at TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_outbox_claim
        ON outbox_tasks (status, run_after, created_at)",
    "CREATE TABLE IF NOT EXISTS observations (
        id TEXT PRIMARY KEY,
        person_id TEXT NOT NULL,
        observation_type TEXT NOT NULL,
        content TEXT NOT NULL,
        observed_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_observations_person
        ON observations (person_id, observed_at)",
    "CREATE TABLE IF NOT EXISTS mindscapes (
        person_id TEXT PRIMARY KEY,
        traits TEXT NOT NULL,
        version INTEGER NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS feedback (
        id TEXT PRIMARY KEY,
        person_id TEXT NOT NULL,
        target_id TEXT NOT NULL,
        rule_id TEXT,
        suggestion_type TEXT,
        rating INTEGER,
        helpful INTEGER,
        context TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_feedback_person
        ON feedback (person_id, created_at)",
    "CREATE TABLE IF NOT EXISTS persona_usage (
        persona_id TEXT PRIMARY KEY,
        person_id TEXT NOT NULL,
        rule_ids TEXT NOT NULL,
        narrative_ids TEXT NOT NULL,
        created_at TEXT NOT NULL
    )",
];

/// SQLite-backed engine store
pub struct SqliteStore {
    pool: SqlitePool,
    queue: QueueConfig,
}

impl SqliteStore {
    /// Open (or create) a file-backed store
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let url = format!("sqlite://{}", path.as_ref().display());
        info!("Connecting to SQLite database: {}", url);

        let options = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePool::connect_with(options).await?;
        let store = Self {
            pool,
            queue: QueueConfig::default(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store for tests
    ///
    /// Pinned to a single connection: each SQLite `:memory:` connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self {
            pool,
            queue: QueueConfig::default(),
        };
        store.init_schema().await?;
        Ok(store)
    }

    /// Replace the queue policy (retry budget) used by `fail`
    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("SQLite schema initialized");
        Ok(())
    }

    fn ts(dt: DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| PersonaKitError::Other(format!("Invalid timestamp '{}': {}", s, e)))
    }

    fn row_to_task(row: &SqliteRow) -> Result<Task> {
        let id: String = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let payload: String = row.try_get("payload")?;
        let run_after: String = row.try_get("run_after")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;

        Ok(Task {
            id: TaskId::from_string(&id)?,
            task_type: row.try_get("task_type")?,
            payload: serde_json::from_str(&payload)?,
            status: TaskStatus::parse(&status)
                .ok_or_else(|| PersonaKitError::Other(format!("Unknown task status: {}", status)))?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            run_after: Self::parse_ts(&run_after)?,
            created_at: Self::parse_ts(&created_at)?,
            updated_at: Self::parse_ts(&updated_at)?,
            completed_at: completed_at.as_deref().map(Self::parse_ts).transpose()?,
        })
    }

    fn row_to_feedback(row: &SqliteRow) -> Result<Feedback> {
        let id: String = row.try_get("id")?;
        let person_id: String = row.try_get("person_id")?;
        let target_id: String = row.try_get("target_id")?;
        let rating: Option<i64> = row.try_get("rating")?;
        let helpful: Option<i64> = row.try_get("helpful")?;
        let context: String = row.try_get("context")?;
        let created_at: String = row.try_get("created_at")?;

        Ok(Feedback {
            id: Uuid::parse_str(&id)?,
            person_id: PersonId::from_string(&person_id)?,
            target_id: Uuid::parse_str(&target_id)?,
            rule_id: row.try_get("rule_id")?,
            suggestion_type: row.try_get("suggestion_type")?,
            rating: rating.map(|r| r as u8),
            helpful: helpful.map(|h| h != 0),
            context: serde_json::from_str(&context)?,
            created_at: Self::parse_ts(&created_at)?,
        })
    }
}

#[async_trait]
impl EngineStore for SqliteStore {
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Value,
        run_after: Option<DateTime<Utc>>,
    ) -> Result<Task> {
        let now = Utc::now();
        let task = Task {
            id: TaskId::new(),
            task_type: task_type.to_string(),
            payload,
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            run_after: run_after.unwrap_or(now),
            created_at: now,
            updated_at: now,
            completed_at: None,
        };

        sqlx::query(
            "INSERT INTO outbox_tasks
                (id, task_type, payload, status, attempts, run_after, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
        )
        .bind(task.id.to_string())
        .bind(&task.task_type)
        .bind(serde_json::to_string(&task.payload)?)
        .bind(task.status.as_str())
        .bind(Self::ts(task.run_after))
        .bind(Self::ts(task.created_at))
        .bind(Self::ts(task.updated_at))
        .execute(&self.pool)
        .await?;

        debug!(task_id = %task.id, task_type = %task.task_type, "enqueued task");
        Ok(task)
    }

    async fn claim_next(&self) -> Result<Option<Task>> {
        let now = Self::ts(Utc::now());

        // Single-statement lock-or-skip: SQLite serializes writers, so the
        // inner SELECT and the transition to in_progress are atomic and no
        // two callers can claim the same row.
        let row = sqlx::query(
            "UPDATE outbox_tasks
             SET status = 'in_progress', updated_at = ?1
             WHERE id = (
                 SELECT id FROM outbox_tasks
                 WHERE status = 'pending' AND run_after <= ?2
                 ORDER BY created_at, id
                 LIMIT 1
             )
             RETURNING *",
        )
        .bind(&now)
        .bind(&now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn complete(&self, task_id: TaskId) -> Result<()> {
        let now = Self::ts(Utc::now());
        let result = sqlx::query(
            "UPDATE outbox_tasks
             SET status = 'done', completed_at = ?1, updated_at = ?1
             WHERE id = ?2",
        )
        .bind(&now)
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(PersonaKitError::TaskNotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn fail(
        &self,
        task_id: TaskId,
        error: &str,
        retry_after: Option<DateTime<Utc>>,
    ) -> Result<Task> {
        let task = self
            .get_task(task_id)
            .await?
            .ok_or_else(|| PersonaKitError::TaskNotFound(task_id.to_string()))?;

        let attempts = task.attempts + 1;
        let truncated: String = error.chars().take(500).collect();
        let now = Utc::now();

        // Retry while the budget holds and a retry time was supplied
        let max_attempts = self.queue.max_attempts;
        let (status, run_after) = match retry_after {
            Some(retry_after) if attempts < max_attempts => (TaskStatus::Pending, retry_after),
            _ => (TaskStatus::Failed, task.run_after),
        };

        sqlx::query(
            "UPDATE outbox_tasks
             SET status = ?1, attempts = ?2, last_error = ?3, run_after = ?4, updated_at = ?5
             WHERE id = ?6",
        )
        .bind(status.as_str())
        .bind(attempts)
        .bind(&truncated)
        .bind(Self::ts(run_after))
        .bind(Self::ts(now))
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(Task {
            status,
            attempts,
            last_error: Some(truncated),
            run_after,
            updated_at: now,
            ..task
        })
    }

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM outbox_tasks WHERE id = ?1")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn pending_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM outbox_tasks WHERE status = 'pending'")
            .fetch_one(&self.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn in_progress_count(&self) -> Result<u64> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM outbox_tasks WHERE status = 'in_progress'")
                .fetch_one(&self.pool)
                .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn failed_tasks(&self, limit: usize) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM outbox_tasks WHERE status = 'failed'
             ORDER BY updated_at DESC LIMIT ?1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_tasks
             WHERE status IN ('done', 'failed') AND updated_at < ?1",
        )
        .bind(Self::ts(older_than))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn put_observation(&self, observation: &Observation) -> Result<()> {
        sqlx::query(
            "INSERT INTO observations (id, person_id, observation_type, content, observed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(observation.id.to_string())
        .bind(observation.person_id.to_string())
        .bind(observation.observation_type.as_str())
        .bind(serde_json::to_string(&observation.content)?)
        .bind(Self::ts(observation.observed_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_observation(&self, id: Uuid) -> Result<Option<Observation>> {
        let row = sqlx::query("SELECT * FROM observations WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let id_str: String = row.try_get("id")?;
        let person_id: String = row.try_get("person_id")?;
        let observation_type: String = row.try_get("observation_type")?;
        let content: String = row.try_get("content")?;
        let observed_at: String = row.try_get("observed_at")?;

        Ok(Some(Observation {
            id: Uuid::parse_str(&id_str)?,
            person_id: PersonId::from_string(&person_id)?,
            observation_type: ObservationType::parse(&observation_type).ok_or_else(|| {
                PersonaKitError::Other(format!("Unknown observation type: {}", observation_type))
            })?,
            content: serde_json::from_str(&content)?,
            observed_at: Self::parse_ts(&observed_at)?,
        }))
    }

    async fn get_mindscape(&self, person_id: PersonId) -> Result<Option<Mindscape>> {
        let row = sqlx::query("SELECT * FROM mindscapes WHERE person_id = ?1")
            .bind(person_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let traits: String = row.try_get("traits")?;
        let version: i64 = row.try_get("version")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(Some(Mindscape {
            person_id,
            traits: serde_json::from_str(&traits)?,
            version,
            updated_at: Self::parse_ts(&updated_at)?,
        }))
    }

    async fn put_mindscape(&self, person_id: PersonId, traits: &TraitMap) -> Result<Mindscape> {
        let now = Utc::now();

        // Whole-document upsert; the version increment rides in the same
        // statement so it is strictly increasing under concurrency.
        let row = sqlx::query(
            "INSERT INTO mindscapes (person_id, traits, version, updated_at)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (person_id) DO UPDATE SET
                 traits = excluded.traits,
                 version = mindscapes.version + 1,
                 updated_at = excluded.updated_at
             RETURNING version",
        )
        .bind(person_id.to_string())
        .bind(serde_json::to_string(traits)?)
        .bind(Self::ts(now))
        .fetch_one(&self.pool)
        .await?;

        let version: i64 = row.try_get("version")?;

        Ok(Mindscape {
            person_id,
            traits: traits.clone(),
            version,
            updated_at: now,
        })
    }

    async fn record_feedback(&self, feedback: &Feedback) -> Result<()> {
        sqlx::query(
            "INSERT INTO feedback
                (id, person_id, target_id, rule_id, suggestion_type, rating, helpful, context, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )
        .bind(feedback.id.to_string())
        .bind(feedback.person_id.to_string())
        .bind(feedback.target_id.to_string())
        .bind(&feedback.rule_id)
        .bind(&feedback.suggestion_type)
        .bind(feedback.rating.map(|r| r as i64))
        .bind(feedback.helpful.map(|h| h as i64))
        .bind(serde_json::to_string(&feedback.context)?)
        .bind(Self::ts(feedback.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_negative_since(
        &self,
        person_id: PersonId,
        suggestion_type: &str,
        since: DateTime<Utc>,
    ) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM feedback
             WHERE person_id = ?1 AND suggestion_type = ?2 AND created_at >= ?3
               AND ((rating IS NOT NULL AND rating <= 2) OR helpful = 0)",
        )
        .bind(person_id.to_string())
        .bind(suggestion_type)
        .bind(Self::ts(since))
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn count_feedback_since(&self, person_id: PersonId, since: DateTime<Utc>) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM feedback WHERE person_id = ?1 AND created_at >= ?2",
        )
        .bind(person_id.to_string())
        .bind(Self::ts(since))
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    async fn list_feedback_since(
        &self,
        person_id: PersonId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Feedback>> {
        let rows = sqlx::query(
            "SELECT * FROM feedback WHERE person_id = ?1 AND created_at >= ?2
             ORDER BY created_at",
        )
        .bind(person_id.to_string())
        .bind(Self::ts(since))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_feedback).collect()
    }

    async fn record_persona_usage(&self, usage: &PersonaUsage) -> Result<()> {
        sqlx::query(
            "INSERT INTO persona_usage (persona_id, person_id, rule_ids, narrative_ids, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(usage.persona_id.to_string())
        .bind(usage.person_id.to_string())
        .bind(serde_json::to_string(&usage.rule_ids)?)
        .bind(serde_json::to_string(&usage.narrative_ids)?)
        .bind(Self::ts(usage.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_persona_usage(&self, persona_id: Uuid) -> Result<Option<PersonaUsage>> {
        let row = sqlx::query("SELECT * FROM persona_usage WHERE persona_id = ?1")
            .bind(persona_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let person_id: String = row.try_get("person_id")?;
        let rule_ids: String = row.try_get("rule_ids")?;
        let narrative_ids: String = row.try_get("narrative_ids")?;
        let created_at: String = row.try_get("created_at")?;
        let persona_id_str: String = row.try_get("persona_id")?;

        Ok(Some(PersonaUsage {
            persona_id: Uuid::parse_str(&persona_id_str)?,
            person_id: PersonId::from_string(&person_id)?,
            rule_ids: serde_json::from_str(&rule_ids)?,
            narrative_ids: serde_json::from_str(&narrative_ids)?,
            created_at: Self::parse_ts(&created_at)?,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    async fn store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_enqueue_claim_complete() {
        let store = store().await;

        let task = store
            .enqueue("process_observation", json!({"observation_id": "abc"}), None)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(store.pending_count().await.unwrap(), 1);

        let claimed = store.claim_next().await.unwrap().unwrap();
        assert_eq!(claimed.id, task.id);
        assert_eq!(claimed.status, TaskStatus::InProgress);
        assert_eq!(store.in_progress_count().await.unwrap(), 1);

        // Nothing else to claim
        assert!(store.claim_next().await.unwrap().is_none());

        store.complete(task.id).await.unwrap();
        let done = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Done);
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_claim_order_is_fifo() {
        let store = store().await;
        let first = store.enqueue("a", json!({}), None).await.unwrap();
        let second = store.enqueue("b", json!({}), None).await.unwrap();

        assert_eq!(store.claim_next().await.unwrap().unwrap().id, first.id);
        assert_eq!(store.claim_next().await.unwrap().unwrap().id, second.id);
    }

    #[tokio::test]
    async fn test_run_after_gates_visibility() {
        let store = store().await;
        let future = Utc::now() + Duration::hours(1);
        store.enqueue("later", json!({}), Some(future)).await.unwrap();

        assert!(store.claim_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_retries_then_terminal() {
        let store = store().await;
        let queue = QueueConfig::default();
        let task = store.enqueue("flaky", json!({}), None).await.unwrap();

        let mut last_offset = 0u64;
        for attempt in 0..queue.max_attempts {
            let claimed = store.claim_next().await.unwrap().unwrap();
            assert_eq!(claimed.id, task.id);
            assert_eq!(claimed.attempts, attempt);

            let backoff = queue.backoff_secs(claimed.attempts);
            // Strictly increasing offsets up to the cap
            assert!(backoff > last_offset || backoff == queue.backoff_cap_secs);
            last_offset = backoff;

            let retry_after = Utc::now() - Duration::seconds(1);
            let failed = store.fail(task.id, "boom", Some(retry_after)).await.unwrap();

            if attempt + 1 < queue.max_attempts {
                assert_eq!(failed.status, TaskStatus::Pending);
            } else {
                // Terminal exactly at attempts == max_attempts
                assert_eq!(failed.attempts, queue.max_attempts);
                assert_eq!(failed.status, TaskStatus::Failed);
            }
        }

        assert!(store.claim_next().await.unwrap().is_none());
        let failed = store.failed_tasks(10).await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].last_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_fail_honors_configured_retry_budget() {
        let queue = QueueConfig {
            max_attempts: 5,
            ..QueueConfig::default()
        };
        let store = SqliteStore::in_memory()
            .await
            .unwrap()
            .with_queue_config(queue.clone());
        let task = store.enqueue("flaky", json!({}), None).await.unwrap();

        for attempt in 0..queue.max_attempts {
            store.claim_next().await.unwrap().unwrap();
            let retry_after = Utc::now() - Duration::seconds(1);
            let failed = store.fail(task.id, "boom", Some(retry_after)).await.unwrap();

            if attempt + 1 < queue.max_attempts {
                // Still retrying past the default budget of 3
                assert_eq!(failed.status, TaskStatus::Pending, "attempt {attempt}");
            } else {
                assert_eq!(failed.attempts, queue.max_attempts);
                assert_eq!(failed.status, TaskStatus::Failed);
            }
        }
    }

    #[tokio::test]
    async fn test_fail_without_retry_is_terminal() {
        let store = store().await;
        let task = store.enqueue("fatal", json!({}), None).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let failed = store.fail(task.id, "no retry", None).await.unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        assert_eq!(failed.attempts, 1);
    }

    #[tokio::test]
    async fn test_error_truncated_to_500_chars() {
        let store = store().await;
        let task = store.enqueue("verbose", json!({}), None).await.unwrap();
        store.claim_next().await.unwrap().unwrap();

        let long_error = "x".repeat(600);
        let failed = store.fail(task.id, &long_error, None).await.unwrap();
        assert_eq!(failed.last_error.unwrap().len(), 500);
    }

    #[tokio::test]
    async fn test_cleanup_finished() {
        let store = store().await;
        let task = store.enqueue("old", json!({}), None).await.unwrap();
        store.claim_next().await.unwrap().unwrap();
        store.complete(task.id).await.unwrap();

        // Cutoff in the past removes nothing
        let removed = store
            .cleanup_finished(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(removed, 0);

        // Cutoff in the future removes the finished task
        let removed = store
            .cleanup_finished(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_mindscape_version_increments() {
        let store = store().await;
        let person = PersonId::new();

        assert!(store.get_mindscape(person).await.unwrap().is_none());

        let mut traits = TraitMap::new();
        traits.insert(
            "work.focus_duration".to_string(),
            crate::types::TraitEntry::from_delta(crate::types::TraitDelta::new(json!(90), 0.9)),
        );

        let first = store.put_mindscape(person, &traits).await.unwrap();
        assert_eq!(first.version, 1);

        let second = store.put_mindscape(person, &traits).await.unwrap();
        assert_eq!(second.version, 2);

        let loaded = store.get_mindscape(person).await.unwrap().unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.traits["work.focus_duration"].value, json!(90));
    }

    #[tokio::test]
    async fn test_observation_roundtrip() {
        let store = store().await;
        let observation = Observation::new(
            PersonId::new(),
            ObservationType::WorkSession,
            json!({"duration_minutes": 90}),
        );

        store.put_observation(&observation).await.unwrap();
        let loaded = store.get_observation(observation.id).await.unwrap().unwrap();
        assert_eq!(loaded.person_id, observation.person_id);
        assert_eq!(loaded.content, observation.content);

        assert!(store.get_observation(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_negative_feedback_counting() {
        let store = store().await;
        let person = PersonId::new();
        let target = Uuid::new_v4();

        let negative = Feedback::new(person, target)
            .with_helpful(false)
            .with_suggestion_type("focus_block");
        store.record_feedback(&negative).await.unwrap();

        let low_rating = Feedback::new(person, target)
            .with_rating(2)
            .with_suggestion_type("focus_block");
        store.record_feedback(&low_rating).await.unwrap();

        let positive = Feedback::new(person, target)
            .with_rating(5)
            .with_suggestion_type("focus_block");
        store.record_feedback(&positive).await.unwrap();

        let other_type = Feedback::new(person, target)
            .with_helpful(false)
            .with_suggestion_type("break_reminder");
        store.record_feedback(&other_type).await.unwrap();

        let since = Utc::now() - Duration::days(7);
        assert_eq!(
            store
                .count_negative_since(person, "focus_block", since)
                .await
                .unwrap(),
            2
        );
        assert_eq!(store.count_feedback_since(person, since).await.unwrap(), 4);
        assert_eq!(
            store.list_feedback_since(person, since).await.unwrap().len(),
            4
        );
    }

    #[tokio::test]
    async fn test_persona_usage_roundtrip() {
        let store = store().await;
        let usage = PersonaUsage {
            persona_id: Uuid::new_v4(),
            person_id: PersonId::new(),
            rule_ids: vec!["morning_deep_work".to_string()],
            narrative_ids: vec![Uuid::new_v4()],
            created_at: Utc::now(),
        };

        store.record_persona_usage(&usage).await.unwrap();
        let loaded = store.get_persona_usage(usage.persona_id).await.unwrap().unwrap();
        assert_eq!(loaded.rule_ids, usage.rule_ids);
        assert_eq!(loaded.narrative_ids, usage.narrative_ids);
    }
}
