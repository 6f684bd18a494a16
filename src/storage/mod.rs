//! Storage layer for the PersonaKit engine
//!
//! Provides the abstraction and SQLite implementation for the durable
//! outbox queue, versioned mindscape documents, feedback records, and
//! persona usage records.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{Feedback, Mindscape, Observation, PersonId, Task, TaskId, TraitMap};

/// Which suggestions and narratives influenced a generated persona
///
/// Personas themselves are ephemeral; only this usage record is persisted,
/// for explainability and so feedback can be mapped back to the rules and
/// traits it should influence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaUsage {
    pub persona_id: Uuid,
    pub person_id: PersonId,

    /// Rules that contributed suggestions
    pub rule_ids: Vec<String>,

    /// Narratives attached as context to any suggestion
    pub narrative_ids: Vec<Uuid>,

    pub created_at: DateTime<Utc>,
}

/// Engine store: outbox queue, mindscapes, observations, feedback
///
/// The queue contract requires atomic claim-or-skip dequeue; mindscape
/// writes are whole-document with a strictly increasing version.
#[async_trait]
pub trait EngineStore: Send + Sync {
    // --- Outbox queue ---

    /// Add a task to the outbox queue
    async fn enqueue(
        &self,
        task_type: &str,
        payload: Value,
        run_after: Option<DateTime<Utc>>,
    ) -> Result<Task>;

    /// Atomically claim the next pending task whose `run_after` has passed,
    /// FIFO by creation time. Never blocks on a row held by another worker;
    /// no two callers can observe the same task.
    async fn claim_next(&self) -> Result<Option<Task>>;

    /// Mark a task done (terminal)
    async fn complete(&self, task_id: TaskId) -> Result<()>;

    /// Record a failed attempt. While attempts remain and `retry_after` is
    /// given, the task returns to pending gated by `run_after`; otherwise it
    /// becomes terminally failed.
    async fn fail(
        &self,
        task_id: TaskId,
        error: &str,
        retry_after: Option<DateTime<Utc>>,
    ) -> Result<Task>;

    async fn get_task(&self, task_id: TaskId) -> Result<Option<Task>>;

    async fn pending_count(&self) -> Result<u64>;

    /// Tasks stuck in progress (operator visibility; no automatic reclaim)
    async fn in_progress_count(&self) -> Result<u64>;

    /// Terminally failed tasks, newest first (operator visibility)
    async fn failed_tasks(&self, limit: usize) -> Result<Vec<Task>>;

    /// Delete done/failed tasks not updated since the cutoff
    async fn cleanup_finished(&self, older_than: DateTime<Utc>) -> Result<u64>;

    // --- Observations ---

    async fn put_observation(&self, observation: &Observation) -> Result<()>;

    async fn get_observation(&self, id: Uuid) -> Result<Option<Observation>>;

    // --- Mindscapes ---

    async fn get_mindscape(&self, person_id: PersonId) -> Result<Option<Mindscape>>;

    /// Whole-document write with version increment (1 on first write)
    async fn put_mindscape(&self, person_id: PersonId, traits: &TraitMap) -> Result<Mindscape>;

    // --- Feedback ---

    async fn record_feedback(&self, feedback: &Feedback) -> Result<()>;

    /// Negative feedback events for `(person, suggestion_type)` since the
    /// window start (drives the threshold check)
    async fn count_negative_since(
        &self,
        person_id: PersonId,
        suggestion_type: &str,
        since: DateTime<Utc>,
    ) -> Result<u64>;

    /// All feedback events for a person since the cutoff (rate limiting)
    async fn count_feedback_since(&self, person_id: PersonId, since: DateTime<Utc>) -> Result<u64>;

    /// Feedback records for a person since the cutoff (analytics)
    async fn list_feedback_since(
        &self,
        person_id: PersonId,
        since: DateTime<Utc>,
    ) -> Result<Vec<Feedback>>;

    // --- Persona usage ---

    async fn record_persona_usage(&self, usage: &PersonaUsage) -> Result<()>;

    async fn get_persona_usage(&self, persona_id: Uuid) -> Result<Option<PersonaUsage>>;
}
