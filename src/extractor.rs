//! Trait extraction from observations
//!
//! A pure, stateless mapping from `(observation_type, content)` to zero or
//! more candidate trait deltas. Extraction never fails on malformed or
//! missing fields: absent signal yields no trait entry, not an error.

use chrono::{DateTime, Timelike};
use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::types::{ObservationType, TraitDelta};

/// Candidate trait deltas keyed by dotted path
pub type TraitDeltas = BTreeMap<String, TraitDelta>;

/// Stateless trait extractor
#[derive(Debug, Clone, Copy, Default)]
pub struct TraitExtractor;

impl TraitExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract candidate trait deltas from observation content
    pub fn extract(&self, observation_type: ObservationType, content: &Value) -> TraitDeltas {
        match observation_type {
            ObservationType::WorkSession => self.extract_work_session(content),
            ObservationType::UserInput => self.extract_user_input(content),
            ObservationType::CalendarEvent => self.extract_calendar_event(content),
        }
    }

    fn extract_work_session(&self, content: &Value) -> TraitDeltas {
        let mut traits = TraitDeltas::new();

        // Direct measurement of focus duration
        if let Some(duration) = number_field(content, "duration_minutes") {
            traits.insert(
                "work.focus_duration".to_string(),
                TraitDelta::new(json!(duration), 0.9),
            );
        }

        // Energy patterns from start hour and productivity score
        if let (Some(hour), Some(productivity)) = (
            content.get("start").and_then(parse_hour),
            number_field(content, "productivity_score"),
        ) {
            if productivity >= 4.0 {
                traits.insert(
                    "work.peak_hours".to_string(),
                    TraitDelta::new(
                        json!([format!("{:02}:00-{:02}:00", hour, (hour + 1) % 24)]),
                        0.7,
                    ),
                );
            }

            let energy = if productivity >= 4.0 {
                "high"
            } else if productivity >= 3.0 {
                "medium"
            } else {
                "low"
            };
            traits.insert(
                "current_state.energy_level".to_string(),
                TraitDelta::new(json!(energy), 0.6),
            );
        }

        // Interruption count drives the task switching cost tier
        if let Some(interruptions) = number_field(content, "interruptions") {
            let cost = if interruptions >= 3.0 {
                "high"
            } else if interruptions >= 1.0 {
                "medium"
            } else {
                "low"
            };
            traits.insert(
                "work.task_switching_cost".to_string(),
                TraitDelta::new(json!(cost), 0.7),
            );
        }

        traits
    }

    fn extract_user_input(&self, content: &Value) -> TraitDeltas {
        match content.get("type").and_then(Value::as_str) {
            Some("wizard_response") => {
                self.extract_wizard_responses(content.get("responses").unwrap_or(&Value::Null))
            }
            Some("energy_check") => {
                let mut traits = TraitDeltas::new();
                if let Some(energy) = content.get("energy_level").and_then(Value::as_str) {
                    // Direct user input carries full confidence
                    traits.insert(
                        "current_state.energy_level".to_string(),
                        TraitDelta::new(json!(energy), 1.0),
                    );
                }
                traits
            }
            _ => TraitDeltas::new(),
        }
    }

    fn extract_wizard_responses(&self, responses: &Value) -> TraitDeltas {
        let mut traits = TraitDeltas::new();

        // Productive time preference maps to named hour ranges
        if let Some(productive_time) = responses.get("most_productive").and_then(Value::as_str) {
            let ranges: Option<Vec<&str>> = match productive_time {
                "morning" => Some(vec!["06:00-12:00"]),
                "afternoon" => Some(vec!["12:00-18:00"]),
                "evening" => Some(vec!["18:00-23:00"]),
                // Default peaks when it varies
                "varies" => Some(vec!["09:00-11:00", "14:00-16:00"]),
                _ => None,
            };
            if let Some(ranges) = ranges {
                traits.insert(
                    "work.energy_patterns".to_string(),
                    TraitDelta::new(json!(ranges), 0.8),
                );
                traits.insert(
                    "work.peak_hours".to_string(),
                    TraitDelta::new(json!(ranges), 0.8),
                );
            }
        }

        // Focus duration choice maps to minutes
        if let Some(choice) = responses.get("focus_duration").and_then(Value::as_str) {
            let minutes = match choice {
                "30min" => Some(30),
                "1hr" => Some(60),
                "2hr+" => Some(120),
                _ => None,
            };
            if let Some(minutes) = minutes {
                traits.insert(
                    "work.focus_duration".to_string(),
                    TraitDelta::new(json!(minutes), 0.9),
                );
            }
        }

        // Flow disruptor choice maps to a switching-cost tier
        if let Some(disruptor) = responses.get("flow_disruptor").and_then(Value::as_str) {
            let cost = match disruptor {
                "meetings" | "context-switches" => "high",
                "slack" => "medium",
                "email" => "low",
                _ => "medium",
            };
            traits.insert(
                "work.task_switching_cost".to_string(),
                TraitDelta::new(json!(cost), 0.8),
            );
        }

        traits
    }

    fn extract_calendar_event(&self, content: &Value) -> TraitDeltas {
        let mut traits = TraitDeltas::new();

        if content.get("type").and_then(Value::as_str) == Some("meeting") {
            let duration = number_field(content, "duration_minutes").unwrap_or(60.0);
            // Recovery time inferred from meeting length, low confidence
            let recovery = if duration <= 30.0 {
                15
            } else if duration <= 60.0 {
                30
            } else {
                45
            };
            traits.insert(
                "work.meeting_recovery_time".to_string(),
                TraitDelta::new(json!(recovery), 0.5),
            );
        }

        traits
    }
}

fn number_field(content: &Value, field: &str) -> Option<f64> {
    content.get(field).and_then(Value::as_f64)
}

/// Parse the hour-of-day from an RFC3339 timestamp value
fn parse_hour(value: &Value) -> Option<u32> {
    let s = value.as_str()?;
    let normalized = s.replace('Z', "+00:00");
    DateTime::parse_from_rfc3339(&normalized)
        .ok()
        .map(|dt| dt.hour())
}
