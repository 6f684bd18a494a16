//! Engine configuration
//!
//! Settings for the queue, worker pool, feedback weight adjustment, and
//! persona assembly. Defaults mirror the reference deployment; overrides
//! layer in from an optional TOML file and `PERSONAKIT_*` environment
//! variables (e.g. `PERSONAKIT_QUEUE__MAX_ATTEMPTS=5`).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Outbox queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Attempts before a task becomes terminally failed
    pub max_attempts: i64,

    /// Base retry delay in seconds (doubled per attempt)
    pub backoff_base_secs: u64,

    /// Retry delay ceiling in seconds
    pub backoff_cap_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 60,
            backoff_cap_secs: 3600,
        }
    }
}

impl QueueConfig {
    /// Retry delay for a task that has already failed `attempts` times:
    /// `min(base * 2^attempts, cap)`
    pub fn backoff_secs(&self, attempts: i64) -> u64 {
        let shift = attempts.clamp(0, 32) as u32;
        self.backoff_base_secs
            .saturating_mul(1u64 << shift)
            .min(self.backoff_cap_secs)
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of cooperative poll loops
    pub workers: usize,

    /// Idle sleep between polls, in seconds
    pub poll_interval_secs: u64,

    /// Bounded wait for in-flight tasks on graceful shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            poll_interval_secs: 5,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Feedback weight adjustment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackConfig {
    /// Multiplicative bump for positive feedback (applied immediately)
    pub positive_adjustment: f64,

    /// Multiplicative reduction once the negative threshold is reached
    pub negative_adjustment: f64,

    /// Negative events required within the window before adjusting
    pub negative_threshold: u64,

    /// Trailing window for counting negative feedback, in days
    pub negative_window_days: i64,

    /// Weight ceiling
    pub max_weight: f64,

    /// Weight floor (1.0 minus the maximum allowed reduction)
    pub min_weight: f64,

    /// Feedback submissions allowed per person per day
    pub daily_rate_limit: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            positive_adjustment: 0.1,
            negative_adjustment: -0.2,
            negative_threshold: 5,
            negative_window_days: 7,
            max_weight: 2.0,
            min_weight: 0.5,
            daily_rate_limit: 10,
        }
    }
}

/// Persona assembly settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    /// Default persona time-to-live in hours
    pub default_ttl_hours: u32,

    /// Lower bound for caller-supplied TTLs
    pub min_ttl_hours: u32,

    /// Upper bound for caller-supplied TTLs
    pub max_ttl_hours: u32,

    /// Suggestions retained in the overlay
    pub max_suggestions: usize,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default_ttl_hours: 24,
            min_ttl_hours: 1,
            max_ttl_hours: 168,
            max_suggestions: 5,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub feedback: FeedbackConfig,
    pub persona: PersonaConfig,
}

impl EngineConfig {
    /// Load configuration, layering defaults <- optional file <- environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&EngineConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("PERSONAKIT")
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_policy() {
        let config = EngineConfig::default();
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.feedback.negative_threshold, 5);
        assert_eq!(config.feedback.max_weight, 2.0);
        assert_eq!(config.feedback.min_weight, 0.5);
        assert_eq!(config.persona.default_ttl_hours, 24);
        assert_eq!(config.persona.max_suggestions, 5);
        assert_eq!(config.worker.shutdown_timeout_secs, 10);
    }

    #[test]
    fn test_backoff_progression() {
        let queue = QueueConfig::default();
        assert_eq!(queue.backoff_secs(0), 60);
        assert_eq!(queue.backoff_secs(1), 120);
        assert_eq!(queue.backoff_secs(2), 240);
        // Capped at one hour
        assert_eq!(queue.backoff_secs(10), 3600);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = EngineConfig::load(None).unwrap();
        assert_eq!(config.worker.poll_interval_secs, 5);
    }
}
