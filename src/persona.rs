//! Persona assembly
//!
//! A persona is an ephemeral, time-bounded projection of a mindscape for
//! one use-case: a stable core built from low-volatility traits plus a
//! contextual overlay of current state and ranked suggestions. Personas
//! are immutable after creation and invalid once `expires_at` passes; the
//! store keeps only a usage record naming the rules and narratives that
//! influenced each one, so feedback can be mapped back.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::PersonaConfig;
use crate::error::{PersonaKitError, Result};
use crate::paths;
use crate::rules::{RuleEngine, RuleSet};
use crate::storage::{EngineStore, PersonaUsage};
use crate::types::{Mindscape, PersonId, Suggestion, TraitEntry, TraitMap};

/// Contextual overlay: volatile state plus ranked suggestions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaOverlay {
    pub current_state: Value,
    pub suggestions: Vec<Suggestion>,
    pub active_patterns: Value,
}

/// An assembled persona
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub id: Uuid,
    pub person_id: PersonId,

    /// Rule set that shaped this persona
    pub mapper_id: String,

    /// Low-volatility projection of the trait map
    pub core: Value,

    pub overlay: PersonaOverlay,

    pub expires_at: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,

    /// Mindscape version this persona was generated from
    pub mindscape_version: i64,
}

impl Persona {
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Neutral value a down-weighted trait blends toward, chosen by what the
/// path name implies about its scale
fn neutral_for(path: &str) -> f64 {
    if path.ends_with("_duration") || path.ends_with("_minutes") || path.contains("duration") {
        60.0
    } else if path.ends_with("_score") || path.ends_with("_level") {
        3.0
    } else {
        50.0
    }
}

fn apply_weight_to_number(value: f64, weight: f64, neutral: f64) -> f64 {
    if weight < 1.0 {
        // Reduced influence blends toward neutral
        value * weight + neutral * (1.0 - weight)
    } else {
        // Amplified influence, capped at double the observed value
        (value * weight).min(value * 2.0)
    }
}

/// Extract a trait value with its feedback weight applied
///
/// Numeric values are blended or amplified directly; numeric leaves inside
/// a nested document get the same treatment field by field. Lists and
/// strings pass through untouched, weight has no meaning for them.
pub fn weighted_value(entry: &TraitEntry, path: &str) -> Value {
    if entry.weight == 1.0 {
        return entry.value.clone();
    }

    match &entry.value {
        Value::Number(n) => match n.as_f64() {
            Some(value) => {
                let adjusted = apply_weight_to_number(value, entry.weight, neutral_for(path));
                serde_json::Number::from_f64(adjusted)
                    .map(Value::Number)
                    .unwrap_or_else(|| entry.value.clone())
            }
            None => entry.value.clone(),
        },
        Value::Object(fields) => {
            let mut adjusted = Map::with_capacity(fields.len());
            for (key, value) in fields {
                let new_value = match value.as_f64() {
                    Some(number) => {
                        // Percentile fields (p50, p90) carry durations
                        let neutral = if key.contains("duration")
                            || key.contains("minutes")
                            || is_percentile_key(key)
                        {
                            60.0
                        } else {
                            number
                        };
                        let weighted =
                            apply_weight_to_number(number, entry.weight, neutral);
                        serde_json::Number::from_f64(weighted)
                            .map(Value::Number)
                            .unwrap_or_else(|| value.clone())
                    }
                    None => value.clone(),
                };
                adjusted.insert(key.clone(), new_value);
            }
            Value::Object(adjusted)
        }
        other => other.clone(),
    }
}

fn is_percentile_key(key: &str) -> bool {
    key.strip_prefix('p')
        .map_or(false, |digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
}

fn weighted_trait(traits: &TraitMap, path: &str, default: Value) -> Value {
    match traits.get(path) {
        Some(entry) => weighted_value(entry, path),
        None => default,
    }
}

/// Store-backed persona generator
#[derive(Clone)]
pub struct PersonaGenerator {
    store: Arc<dyn EngineStore>,
    engine: RuleEngine,
    config: PersonaConfig,
}

impl PersonaGenerator {
    pub fn new(store: Arc<dyn EngineStore>, engine: RuleEngine, config: PersonaConfig) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    /// Assemble a persona for a person from their current mindscape
    ///
    /// Fails synchronously with `Validation` when the rule set's required
    /// traits are missing, and `MindscapeNotFound` when the person has no
    /// mindscape at all.
    pub async fn generate(
        &self,
        person_id: PersonId,
        ruleset: &RuleSet,
        context: &Value,
        ttl_hours: Option<u32>,
    ) -> Result<Persona> {
        let mindscape = self
            .store
            .get_mindscape(person_id)
            .await?
            .ok_or_else(|| PersonaKitError::MindscapeNotFound(person_id.to_string()))?;

        self.check_required_traits(&mindscape, ruleset)?;

        let mut suggestions = self.engine.evaluate(ruleset, &mindscape, context).await?;
        suggestions.truncate(self.config.max_suggestions);

        let core = build_core(&mindscape.traits);
        let overlay = build_overlay(&mindscape.traits, suggestions, context);

        let ttl = self.resolve_ttl(ruleset, ttl_hours);
        let now = Utc::now();

        let persona = Persona {
            id: Uuid::new_v4(),
            person_id,
            mapper_id: ruleset.metadata.id.clone(),
            core,
            overlay,
            expires_at: now + Duration::hours(ttl as i64),
            generated_at: now,
            mindscape_version: mindscape.version,
        };

        self.record_usage(&persona).await?;

        info!(
            persona_id = %persona.id,
            person_id = %person_id,
            mapper_id = %persona.mapper_id,
            suggestions = persona.overlay.suggestions.len(),
            ttl_hours = ttl,
            "generated persona"
        );
        Ok(persona)
    }

    fn check_required_traits(&self, mindscape: &Mindscape, ruleset: &RuleSet) -> Result<()> {
        let missing: Vec<&str> = ruleset
            .required_traits
            .iter()
            .filter(|path| paths::resolve_trait(&mindscape.traits, path).is_none())
            .map(String::as_str)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(PersonaKitError::Validation(format!(
                "mindscape missing required traits: {}",
                missing.join(", ")
            )))
        }
    }

    /// Caller TTL, else rule set default, else engine default; always
    /// clamped to the configured bounds
    fn resolve_ttl(&self, ruleset: &RuleSet, ttl_hours: Option<u32>) -> u32 {
        let requested = ttl_hours
            .or(ruleset.metadata.default_ttl_hours)
            .unwrap_or(self.config.default_ttl_hours);
        requested.clamp(self.config.min_ttl_hours, self.config.max_ttl_hours)
    }

    async fn record_usage(&self, persona: &Persona) -> Result<()> {
        let mut rule_ids = BTreeSet::new();
        let mut narrative_ids = BTreeSet::new();
        for suggestion in &persona.overlay.suggestions {
            rule_ids.insert(suggestion.rule_id.clone());
            for narrative in &suggestion.narrative_context {
                narrative_ids.insert(narrative.id);
            }
        }

        let usage = PersonaUsage {
            persona_id: persona.id,
            person_id: persona.person_id,
            rule_ids: rule_ids.into_iter().collect(),
            narrative_ids: narrative_ids.into_iter().collect(),
            created_at: persona.generated_at,
        };
        self.store.record_persona_usage(&usage).await?;
        debug!(persona_id = %persona.id, "recorded persona usage");
        Ok(())
    }
}

/// Stable work-style and preference projection, feedback weights applied
fn build_core(traits: &TraitMap) -> Value {
    json!({
        "work_style": {
            "energy_patterns": weighted_trait(traits, "work.energy_patterns", json!({})),
            "focus_duration": weighted_trait(traits, "work.focus_duration", json!({})),
            "peak_hours": weighted_trait(traits, "work.peak_hours", json!([])),
            "task_switching_cost": weighted_trait(traits, "work.task_switching_cost", json!("medium")),
            "meeting_recovery": weighted_trait(traits, "work.meeting_recovery_time", json!({})),
        },
        "core_preferences": {
            "communication": weighted_trait(traits, "preferences.communication", json!({})),
            "learning_style": weighted_trait(traits, "preferences.learning_style", json!({})),
        },
    })
}

fn build_overlay(traits: &TraitMap, suggestions: Vec<Suggestion>, context: &Value) -> PersonaOverlay {
    let energy_level = traits
        .get("current_state.energy_level")
        .map(|entry| entry.value.clone())
        .unwrap_or_else(|| json!("unknown"));
    let focus_available = traits
        .get("current_state.focus_available")
        .map(|entry| entry.value.clone())
        .unwrap_or(json!(true));

    let context_field = |name: &str| {
        context
            .get(name)
            .cloned()
            .unwrap_or_else(|| json!("unknown"))
    };

    PersonaOverlay {
        current_state: json!({
            "energy_level": energy_level,
            "focus_available": focus_available,
            "context": context,
        }),
        suggestions,
        active_patterns: json!({
            "time_of_day": context_field("time_of_day"),
            "day_of_week": context_field("day_of_week"),
        }),
    }
}
