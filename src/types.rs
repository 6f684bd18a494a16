//! Core data types for the PersonaKit engine
//!
//! This module defines the fundamental data structures used throughout the
//! engine: outbox tasks, observations, weighted traits, mindscapes, feedback
//! and suggestions. These types form the foundation of the adaptive trait
//! and suggestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::narratives::NarrativeMatch;

/// Unique identifier for a person
///
/// Wraps a UUID to provide type safety and prevent mixing person IDs with
/// other UUID-based identifiers in the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PersonId(pub Uuid);

impl PersonId {
    /// Create a new random person ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a person ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for PersonId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PersonId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an outbox task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new random task ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a task ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of an outbox task
///
/// `Done` and `Failed` are terminal. A failed attempt returns the task to
/// `Pending` (gated by `run_after`) until the retry budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(TaskStatus::Pending),
            "in_progress" => Some(TaskStatus::InProgress),
            "done" => Some(TaskStatus::Done),
            "failed" => Some(TaskStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One durable unit of deferred work
///
/// Guarantees at-least-once, single-claim processing: exactly one worker
/// holds a task while it is `InProgress`, and only the claiming worker
/// mutates it afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,

    /// Dispatch key for the worker (e.g. "process_observation")
    pub task_type: String,

    /// Opaque task document
    pub payload: Value,

    pub status: TaskStatus,

    /// Number of processing attempts so far (monotonically increasing)
    pub attempts: i64,

    /// Last failure message, truncated to 500 characters
    pub last_error: Option<String>,

    /// Task is invisible to `claim_next` until this instant
    pub run_after: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Kind of behavioral observation being ingested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationType {
    /// A recorded work session (duration, productivity, interruptions)
    WorkSession,

    /// Direct user input (wizard responses, energy checks)
    UserInput,

    /// A calendar event (meetings drive recovery-time inference)
    CalendarEvent,
}

impl ObservationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationType::WorkSession => "work_session",
            ObservationType::UserInput => "user_input",
            ObservationType::CalendarEvent => "calendar_event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "work_session" => Some(ObservationType::WorkSession),
            "user_input" => Some(ObservationType::UserInput),
            "calendar_event" => Some(ObservationType::CalendarEvent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ObservationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A discrete behavioral observation about a person
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    pub id: Uuid,
    pub person_id: PersonId,
    pub observation_type: ObservationType,

    /// Type-specific content document
    pub content: Value,

    pub observed_at: DateTime<Utc>,
}

impl Observation {
    /// Create a new observation timestamped now
    pub fn new(person_id: PersonId, observation_type: ObservationType, content: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            person_id,
            observation_type,
            content,
            observed_at: Utc::now(),
        }
    }
}

/// A candidate trait update produced by the extractor
///
/// Deltas always carry `sample_size = 1` from extraction; merged entries
/// accumulate larger sample sizes over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitDelta {
    pub value: Value,

    /// Confidence in this single piece of evidence, in [0, 1]
    pub confidence: f64,

    pub sample_size: u32,
}

impl TraitDelta {
    pub fn new(value: Value, confidence: f64) -> Self {
        Self {
            value,
            confidence,
            sample_size: 1,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

/// A named, weighted, confidence-scored piece of derived knowledge
///
/// `weight` is only ever written by the feedback weight adjuster and is
/// clamped to the configured floor/ceiling. `sample_size` only grows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraitEntry {
    /// Scalar, list, or nested document
    pub value: Value,

    /// Confidence in [0, 1], merged by sample-weighted averaging
    pub confidence: f64,

    pub sample_size: u32,

    /// Feedback-adjusted influence multiplier (default 1.0)
    #[serde(default = "default_weight")]
    pub weight: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_adjusted: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adjustment_reason: Option<String>,
}

impl TraitEntry {
    /// Build a fresh entry from an extracted delta
    pub fn from_delta(delta: TraitDelta) -> Self {
        Self {
            value: delta.value,
            confidence: delta.confidence,
            sample_size: delta.sample_size.max(1),
            weight: 1.0,
            last_adjusted: None,
            adjustment_reason: None,
        }
    }
}

/// Per-person trait map, keyed by dotted path
pub type TraitMap = BTreeMap<String, TraitEntry>;

/// The per-person container of weighted traits plus a version counter
///
/// Owned exclusively by the trait merger; every successful merge increments
/// `version` by exactly 1. The feedback weight adjuster is a special-cased
/// writer restricted to the weight/adjustment fields, and also bumps the
/// version through the same whole-document write path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mindscape {
    pub person_id: PersonId,
    pub traits: TraitMap,

    /// Monotonically increasing document version
    pub version: i64,

    pub updated_at: DateTime<Utc>,
}

impl Mindscape {
    /// Create an empty mindscape (version 0, never persisted as such)
    pub fn empty(person_id: PersonId) -> Self {
        Self {
            person_id,
            traits: TraitMap::new(),
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Resolve a dotted trait path to its underlying value
    pub fn trait_value(&self, path: &str) -> Option<&Value> {
        crate::paths::resolve_trait(&self.traits, path).map(|(_, value)| value)
    }

    /// Resolve a dotted trait path to the owning entry
    pub fn trait_entry(&self, path: &str) -> Option<&TraitEntry> {
        crate::paths::resolve_trait(&self.traits, path).map(|(entry, _)| entry)
    }
}

/// Suggestion priority tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Ordering rank (high > medium > low)
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "high" => Some(Priority::High),
            "medium" => Some(Priority::Medium),
            "low" => Some(Priority::Low),
            _ => None,
        }
    }
}

/// A ranked, time-aware suggestion emitted by the rule engine
///
/// Ephemeral: not persisted as a first-class record by the core. Only the
/// usage (which rules/narratives influenced a persona) is recorded for
/// explainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Suggestion {
    /// Suggestion type from the template metadata (drives feedback mapping)
    pub suggestion_type: String,

    pub title: String,
    pub description: String,
    pub priority: Priority,

    /// Rule that emitted this suggestion
    pub rule_id: String,

    /// Weight of the originating rule at evaluation time
    pub weight: f64,

    /// Resolved template parameters
    pub parameters: BTreeMap<String, Value>,

    /// Template metadata, passed through verbatim
    pub metadata: Value,

    /// Top narrative matches that satisfied this rule's narrative check
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub narrative_context: Vec<NarrativeMatch>,
}

/// Write-once feedback on a generated persona or suggestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub id: Uuid,
    pub person_id: PersonId,

    /// Persona (or suggestion) this feedback targets
    pub target_id: Uuid,

    /// Rule that produced the suggestion, when known
    pub rule_id: Option<String>,

    /// Suggestion type, used to map feedback back onto traits
    pub suggestion_type: Option<String>,

    /// 1-5 star rating
    pub rating: Option<u8>,

    pub helpful: Option<bool>,

    /// Free-form context document
    pub context: Value,

    pub created_at: DateTime<Utc>,
}

impl Feedback {
    pub fn new(person_id: PersonId, target_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            person_id,
            target_id,
            rule_id: None,
            suggestion_type: None,
            rating: None,
            helpful: None,
            context: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_rating(mut self, rating: u8) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_helpful(mut self, helpful: bool) -> Self {
        self.helpful = Some(helpful);
        self
    }

    pub fn with_suggestion_type(mut self, suggestion_type: impl Into<String>) -> Self {
        self.suggestion_type = Some(suggestion_type.into());
        self
    }

    pub fn with_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

/// Classification of a feedback event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackSignal {
    Positive,
    Negative,
    Neutral,
}
