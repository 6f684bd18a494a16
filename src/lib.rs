//! PersonaKit - Adaptive Trait & Suggestion Engine
//!
//! Turns a stream of behavioral observations into a long-lived, weighted
//! trait store (the "mindscape") and generates time-aware, feedback-tuned
//! suggestions from it:
//! - Durable outbox queue so observation writes never block on processing
//! - Pure trait extraction and confidence-weighted merging
//! - Declarative rule engine over traits, time, context, and narratives
//! - Feedback-driven weight adjustment with windowed negative thresholds
//! - Ephemeral persona assembly with core/overlay split and TTL expiry
//!
//! # Architecture
//!
//! The pipeline is queue -> extractor -> merger -> rule engine -> persona,
//! with feedback writing weight changes back into the trait store:
//! - **Types**: Core data structures (Observation, Mindscape, Suggestion)
//! - **Storage**: SQLite-backed queue, mindscapes, feedback, usage records
//! - **Rules**: Compiled rule sets and the stateless evaluator
//! - **Worker**: Background poll loops draining the queue
//!
//! # Example
//!
//! ```ignore
//! use personakit::{EngineConfig, Observation, ObservationType, PersonId, Worker};
//! use personakit::storage::sqlite::SqliteStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> personakit::Result<()> {
//!     let store = Arc::new(SqliteStore::open("personakit.db").await?);
//!     let worker = Worker::new(store.clone(), EngineConfig::load(None)?);
//!     let pool = worker.spawn();
//!
//!     let observation = Observation::new(
//!         PersonId::new(),
//!         ObservationType::WorkSession,
//!         serde_json::json!({"duration_minutes": 90, "productivity_score": 5}),
//!     );
//!     worker.ingest_observation(&observation).await?;
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod extractor;
pub mod feedback;
pub mod mindscape;
pub mod narratives;
pub mod paths;
pub mod persona;
pub mod rules;
pub mod storage;
pub mod types;
pub mod worker;

// Re-export commonly used types
pub use config::{EngineConfig, FeedbackConfig, PersonaConfig, QueueConfig, WorkerConfig};
pub use error::{PersonaKitError, Result};
pub use extractor::{TraitDeltas, TraitExtractor};
pub use feedback::{FeedbackProcessor, FeedbackSummary};
pub use mindscape::TraitMerger;
pub use narratives::{InMemoryNarrativeIndex, NarrativeMatch, NarrativeSearch};
pub use persona::{Persona, PersonaGenerator, PersonaOverlay};
pub use rules::{RuleEngine, RuleSet};
pub use storage::{sqlite::SqliteStore, EngineStore, PersonaUsage};
pub use types::{
    Feedback, FeedbackSignal, Mindscape, Observation, ObservationType, PersonId, Priority,
    Suggestion, Task, TaskId, TaskStatus, TraitDelta, TraitEntry, TraitMap,
};
pub use worker::{Worker, WorkerHandle};
