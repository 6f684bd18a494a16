//! Feedback-driven weight adjustment
//!
//! Feedback on generated personas and suggestions feeds back into the
//! mindscape as weight changes on the traits that produced them. Positive
//! feedback reinforces immediately; negative feedback only takes effect
//! once enough of it accumulates for the same suggestion type inside a
//! trailing window, so a single bad day does not erase learned patterns.
//! All adjustments are multiplicative and clamped.

use chrono::{Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::FeedbackConfig;
use crate::error::{PersonaKitError, Result};
use crate::rules::RuleSet;
use crate::storage::EngineStore;
use crate::types::{Feedback, FeedbackSignal, PersonId};

/// Classify a feedback event
///
/// Negative takes precedence when signals conflict: explicit "not helpful"
/// or a low rating always counts against, even alongside a high rating.
pub fn classify(feedback: &Feedback) -> FeedbackSignal {
    let negative = feedback.helpful == Some(false)
        || feedback.rating.map_or(false, |r| r <= 2);
    if negative {
        return FeedbackSignal::Negative;
    }

    let positive = feedback.helpful == Some(true)
        || feedback.rating.map_or(false, |r| r >= 4);
    if positive {
        FeedbackSignal::Positive
    } else {
        FeedbackSignal::Neutral
    }
}

/// Traits influenced by each suggestion type
pub fn trait_targets(suggestion_type: &str) -> &'static [&'static str] {
    match suggestion_type {
        "task_recommendation" => &["work.energy_patterns", "work.focus_duration"],
        "meeting_recovery" => &["work.meeting_recovery", "work.context_switching"],
        "break_reminder" => &["work.break_patterns", "work.sustained_attention"],
        "focus_block" => &["work.peak_hours", "work.focus_duration"],
        "energy_management" => &["work.energy_patterns", "work.fatigue_signals"],
        _ => &[],
    }
}

/// Multiplicative weight adjustment with clamping
fn adjusted_weight(current: f64, adjustment: f64, min_weight: f64, max_weight: f64) -> f64 {
    let next = current * (1.0 + adjustment);
    let clamped = if adjustment < 0.0 {
        next.max(min_weight)
    } else {
        next.min(max_weight)
    };
    (clamped * 1000.0).round() / 1000.0
}

/// Per-signal feedback counts
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalCounts {
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,
}

/// Aggregated feedback analytics for one person
#[derive(Debug, Clone, Serialize)]
pub struct FeedbackSummary {
    pub period_days: i64,
    pub total: u64,
    pub positive: u64,
    pub negative: u64,
    pub neutral: u64,

    /// Percentage of positive feedback, rounded to one decimal
    pub positive_rate: f64,

    pub by_suggestion_type: BTreeMap<String, SignalCounts>,

    /// Mean of submitted ratings, rounded to one decimal
    pub average_rating: Option<f64>,
}

/// Store-backed feedback processor
#[derive(Clone)]
pub struct FeedbackProcessor {
    store: Arc<dyn EngineStore>,
    config: FeedbackConfig,
}

impl FeedbackProcessor {
    pub fn new(store: Arc<dyn EngineStore>, config: FeedbackConfig) -> Self {
        Self { store, config }
    }

    /// Record one feedback event and apply any resulting weight changes
    ///
    /// Rejects with `RateLimited` once the per-person daily budget is
    /// spent. The counter lives in the store, so the limit holds across
    /// processes.
    pub async fn submit(&self, feedback: Feedback) -> Result<FeedbackSignal> {
        let day_ago = Utc::now() - Duration::hours(24);
        let recent = self
            .store
            .count_feedback_since(feedback.person_id, day_ago)
            .await?;
        if recent >= self.config.daily_rate_limit {
            return Err(PersonaKitError::RateLimited(format!(
                "person {} exceeded {} feedback submissions in 24h",
                feedback.person_id, self.config.daily_rate_limit
            )));
        }

        self.store.record_feedback(&feedback).await?;
        self.apply(&feedback).await
    }

    /// Apply weight adjustments for an already-recorded feedback event
    pub async fn apply(&self, feedback: &Feedback) -> Result<FeedbackSignal> {
        let signal = classify(feedback);
        if signal == FeedbackSignal::Neutral {
            debug!(feedback_id = %feedback.id, "neutral feedback, no adjustment");
            return Ok(signal);
        }

        let Some(suggestion_type) = feedback.suggestion_type.as_deref() else {
            warn!(feedback_id = %feedback.id, "feedback without suggestion type, skipping");
            return Ok(signal);
        };
        let targets = trait_targets(suggestion_type);
        if targets.is_empty() {
            warn!(suggestion_type, "no trait mapping for suggestion type");
            return Ok(signal);
        }

        match signal {
            FeedbackSignal::Positive => {
                self.adjust_trait_weights(
                    feedback.person_id,
                    targets,
                    self.config.positive_adjustment,
                    "positive_feedback",
                )
                .await?;
            }
            FeedbackSignal::Negative => {
                let window_start =
                    feedback.created_at - Duration::days(self.config.negative_window_days);
                let count = self
                    .store
                    .count_negative_since(feedback.person_id, suggestion_type, window_start)
                    .await?;

                if count >= self.config.negative_threshold {
                    info!(
                        person_id = %feedback.person_id,
                        suggestion_type,
                        count,
                        "negative feedback threshold reached"
                    );
                    self.adjust_trait_weights(
                        feedback.person_id,
                        targets,
                        self.config.negative_adjustment,
                        "negative_feedback_threshold",
                    )
                    .await?;
                } else {
                    debug!(
                        suggestion_type,
                        count,
                        threshold = self.config.negative_threshold,
                        "negative feedback below threshold"
                    );
                }
            }
            FeedbackSignal::Neutral => unreachable!(),
        }

        Ok(signal)
    }

    async fn adjust_trait_weights(
        &self,
        person_id: PersonId,
        targets: &[&str],
        adjustment: f64,
        reason: &str,
    ) -> Result<()> {
        let Some(mindscape) = self.store.get_mindscape(person_id).await? else {
            warn!(person_id = %person_id, "no mindscape to adjust");
            return Ok(());
        };

        let now = Utc::now();
        let mut traits = mindscape.traits;
        let mut updated = false;

        for target in targets {
            if let Some(entry) = traits.get_mut(*target) {
                let previous = entry.weight;
                entry.weight = adjusted_weight(
                    previous,
                    adjustment,
                    self.config.min_weight,
                    self.config.max_weight,
                );
                entry.last_adjusted = Some(now);
                entry.adjustment_reason = Some(reason.to_string());
                updated = true;

                info!(
                    person_id = %person_id,
                    trait_path = target,
                    previous,
                    adjusted = entry.weight,
                    reason,
                    "adjusted trait weight"
                );
            }
        }

        if updated {
            self.store.put_mindscape(person_id, &traits).await?;
        }
        Ok(())
    }

    /// Aggregate feedback analytics over a trailing window
    pub async fn summary(&self, person_id: PersonId, days: i64) -> Result<FeedbackSummary> {
        let since = Utc::now() - Duration::days(days);
        let all = self.store.list_feedback_since(person_id, since).await?;

        let mut summary = FeedbackSummary {
            period_days: days,
            total: all.len() as u64,
            positive: 0,
            negative: 0,
            neutral: 0,
            positive_rate: 0.0,
            by_suggestion_type: BTreeMap::new(),
            average_rating: None,
        };

        let mut rating_sum = 0u64;
        let mut rating_count = 0u64;

        for feedback in &all {
            let counts = summary
                .by_suggestion_type
                .entry(
                    feedback
                        .suggestion_type
                        .clone()
                        .unwrap_or_else(|| "unknown".to_string()),
                )
                .or_default();

            match classify(feedback) {
                FeedbackSignal::Positive => {
                    summary.positive += 1;
                    counts.positive += 1;
                }
                FeedbackSignal::Negative => {
                    summary.negative += 1;
                    counts.negative += 1;
                }
                FeedbackSignal::Neutral => {
                    summary.neutral += 1;
                    counts.neutral += 1;
                }
            }

            if let Some(rating) = feedback.rating {
                rating_sum += rating as u64;
                rating_count += 1;
            }
        }

        if summary.total > 0 {
            let rate = summary.positive as f64 / summary.total as f64 * 100.0;
            summary.positive_rate = (rate * 10.0).round() / 10.0;
        }
        if rating_count > 0 {
            let mean = rating_sum as f64 / rating_count as f64;
            summary.average_rating = Some((mean * 10.0).round() / 10.0);
        }

        Ok(summary)
    }
}

/// Produce a new rule set document with one rule's weight adjusted
///
/// The rule-level counterpart of trait weight adjustment: same clamped
/// multiplicative math, bookkeeping in the rule's metadata. Versioning of
/// the document itself stays with the configuration-management boundary.
/// Returns `None` for neutral signals or unknown rule ids.
pub fn adjust_rule_weight(
    ruleset: &RuleSet,
    rule_id: &str,
    signal: FeedbackSignal,
    config: &FeedbackConfig,
) -> Option<RuleSet> {
    let adjustment = match signal {
        FeedbackSignal::Positive => config.positive_adjustment,
        FeedbackSignal::Negative => config.negative_adjustment,
        FeedbackSignal::Neutral => return None,
    };

    let mut adjusted = ruleset.clone();
    let rule = adjusted.rules.iter_mut().find(|r| r.id == rule_id)?;

    let previous = rule.weight;
    rule.weight = adjusted_weight(previous, adjustment, config.min_weight, config.max_weight);

    let reason = match signal {
        FeedbackSignal::Positive => "positive_feedback",
        FeedbackSignal::Negative => "negative_feedback_threshold",
        FeedbackSignal::Neutral => unreachable!(),
    };

    let metadata = match &mut rule.metadata {
        Value::Object(map) => map,
        other => {
            *other = json!({});
            other.as_object_mut().expect("just set to object")
        }
    };
    metadata
        .entry("original_weight".to_string())
        .or_insert(json!(previous));
    metadata.insert("last_adjusted".to_string(), json!(Utc::now().to_rfc3339()));
    metadata.insert("adjustment_reason".to_string(), json!(reason));

    info!(rule_id, previous, adjusted = rule.weight, reason, "adjusted rule weight");
    Some(adjusted)
}
