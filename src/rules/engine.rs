//! Rule evaluation
//!
//! Evaluates a compiled rule set against a mindscape and a context bag.
//! Narrative checks are the only async inputs: their searches run in a
//! prefetch pass, cached per query for the duration of one evaluation, and
//! condition trees then evaluate synchronously against the cached results.
//! A failure inside one rule is logged and contributes no suggestion; it
//! never aborts the remaining rules.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{PersonaKitError, Result};
use crate::narratives::{NarrativeMatch, NarrativeSearch};
use crate::paths;
use crate::rules::ast::{hour_in_range, Check, ConditionNode, Operator, PathCheck, TimeCheck};
use crate::rules::config::{Rule, RuleSet, SuggestionAction};
use crate::types::{Mindscape, Suggestion, TraitMap};

/// Narrative matches retained per suggestion for explainability
const NARRATIVE_CONTEXT_LIMIT: usize = 3;

/// Stateless evaluator over compiled rule sets
#[derive(Clone, Default)]
pub struct RuleEngine {
    narratives: Option<Arc<dyn NarrativeSearch>>,
}

impl RuleEngine {
    /// Engine without a narrative capability; narrative checks never match
    pub fn new() -> Self {
        Self { narratives: None }
    }

    pub fn with_narratives(narratives: Arc<dyn NarrativeSearch>) -> Self {
        Self {
            narratives: Some(narratives),
        }
    }

    /// Evaluate every rule and return the emitted suggestions, ranked by
    /// descending weight then priority
    pub async fn evaluate(
        &self,
        ruleset: &RuleSet,
        mindscape: &Mindscape,
        context: &Value,
    ) -> Result<Vec<Suggestion>> {
        let narrative_cache = self.prefetch_narratives(ruleset, mindscape).await;
        let now = current_time(context);

        let mut suggestions = Vec::new();
        for rule in &ruleset.rules {
            match evaluate_rule(rule, ruleset, &mindscape.traits, context, now, &narrative_cache)
            {
                Ok(mut emitted) => suggestions.append(&mut emitted),
                Err(e) => {
                    // Fault isolation: the rule contributes nothing
                    warn!(rule_id = %rule.id, error = %e, "rule evaluation failed");
                }
            }
        }

        rank_suggestions(&mut suggestions);
        debug!(
            ruleset = %ruleset.metadata.id,
            rules = ruleset.rules.len(),
            suggestions = suggestions.len(),
            "rule evaluation complete"
        );
        Ok(suggestions)
    }

    /// Run every distinct narrative search once, up front
    async fn prefetch_narratives(
        &self,
        ruleset: &RuleSet,
        mindscape: &Mindscape,
    ) -> HashMap<String, Vec<NarrativeMatch>> {
        let mut checks = Vec::new();
        for rule in &ruleset.rules {
            rule.conditions.collect_narrative_checks(&mut checks);
        }

        let mut cache = HashMap::new();
        for check in checks {
            let key = check.cache_key();
            if cache.contains_key(&key) {
                continue;
            }

            let matches = match &self.narratives {
                Some(search) => search
                    .search(
                        mindscape.person_id,
                        &check.query,
                        check.threshold,
                        check.limit,
                        check.narrative_type.as_deref(),
                    )
                    .await
                    .unwrap_or_else(|e| {
                        warn!(query = %check.query, error = %e, "narrative search failed");
                        Vec::new()
                    }),
                None => Vec::new(),
            };
            cache.insert(key, matches);
        }
        cache
    }
}

/// Sort by descending weight, then priority high > medium > low
pub fn rank_suggestions(suggestions: &mut [Suggestion]) {
    suggestions.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.priority.rank().cmp(&a.priority.rank()))
    });
}

fn evaluate_rule(
    rule: &Rule,
    ruleset: &RuleSet,
    traits: &TraitMap,
    context: &Value,
    now: DateTime<FixedOffset>,
    narrative_cache: &HashMap<String, Vec<NarrativeMatch>>,
) -> Result<Vec<Suggestion>> {
    if rule.weight <= 0.0 {
        return Ok(Vec::new());
    }
    if !evaluate_node(&rule.conditions, traits, context, now, narrative_cache) {
        return Ok(Vec::new());
    }

    // Matches from this rule's narrative checks travel with its suggestions
    let narrative_context = rule_narrative_context(rule, narrative_cache);

    let mut suggestions = Vec::with_capacity(rule.actions.len());
    for action in &rule.actions {
        suggestions.push(generate_suggestion(
            rule,
            action,
            ruleset,
            traits,
            context,
            narrative_context.clone(),
        )?);
    }
    Ok(suggestions)
}

fn rule_narrative_context(
    rule: &Rule,
    cache: &HashMap<String, Vec<NarrativeMatch>>,
) -> Vec<NarrativeMatch> {
    let mut checks = Vec::new();
    rule.conditions.collect_narrative_checks(&mut checks);

    let mut matches: Vec<NarrativeMatch> = checks
        .iter()
        .filter_map(|check| cache.get(&check.cache_key()))
        .flatten()
        .cloned()
        .collect();
    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    matches.truncate(NARRATIVE_CONTEXT_LIMIT);
    matches
}

fn evaluate_node(
    node: &ConditionNode,
    traits: &TraitMap,
    context: &Value,
    now: DateTime<FixedOffset>,
    narrative_cache: &HashMap<String, Vec<NarrativeMatch>>,
) -> bool {
    match node {
        ConditionNode::Single(check) => match check {
            Check::Trait(check) => {
                let actual = paths::resolve_trait(traits, &check.path).map(|(_, value)| value);
                evaluate_operator(check, actual)
            }
            Check::Context(check) => {
                let actual = paths::lookup_value(context, &check.path);
                evaluate_operator(check, actual)
            }
            Check::Time(check) => evaluate_time(check, now),
            Check::Narrative(check) => narrative_cache
                .get(&check.cache_key())
                .map_or(false, |matches| !matches.is_empty()),
        },
        ConditionNode::All(children) => children
            .iter()
            .all(|child| evaluate_node(child, traits, context, now, narrative_cache)),
        ConditionNode::Any(children) => children
            .iter()
            .any(|child| evaluate_node(child, traits, context, now, narrative_cache)),
    }
}

fn evaluate_operator(check: &PathCheck, actual: Option<&Value>) -> bool {
    let Some(actual) = actual else {
        // A missing path satisfies only not_exists
        return check.operator == Operator::NotExists;
    };
    let expected = check.value.as_ref();

    match check.operator {
        Operator::Exists => true,
        Operator::NotExists => false,
        Operator::Equals => values_equal(actual, expected),
        Operator::NotEquals => !values_equal(actual, expected),
        Operator::Greater => match (coerce_f64(actual), expected.and_then(coerce_f64)) {
            (Some(a), Some(b)) => a > b,
            _ => {
                debug!(path = %check.path, "non-numeric comparison, no match");
                false
            }
        },
        Operator::Less => match (coerce_f64(actual), expected.and_then(coerce_f64)) {
            (Some(a), Some(b)) => a < b,
            _ => {
                debug!(path = %check.path, "non-numeric comparison, no match");
                false
            }
        },
        Operator::Contains => {
            let Some(expected) = expected else {
                return false;
            };
            match actual {
                Value::Array(items) => items.contains(expected),
                Value::String(haystack) => expected
                    .as_str()
                    .map_or(false, |needle| haystack.contains(needle)),
                _ => false,
            }
        }
    }
}

/// Equality with numeric looseness: 75 and 75.0 compare equal
fn values_equal(actual: &Value, expected: Option<&Value>) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    if let (Some(a), Some(b)) = (coerce_f64(actual), coerce_f64(expected)) {
        return a == b;
    }
    actual == expected
}

/// Numeric coercion: JSON numbers directly, numeric strings by parsing
fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn evaluate_time(check: &TimeCheck, now: DateTime<FixedOffset>) -> bool {
    let (hour, weekday) = match check.timezone {
        Some(tz) => {
            let local = now.with_timezone(&tz);
            (local.hour(), local.weekday())
        }
        None => (now.hour(), now.weekday()),
    };

    if let Some(period) = check.period {
        if !period.contains(hour) {
            return false;
        }
    }
    if let Some(range) = check.hour_range {
        if !hour_in_range(hour, range) {
            return false;
        }
    }
    if let Some(days) = &check.day_of_week {
        if !days.contains(&weekday) {
            return false;
        }
    }
    true
}

/// Evaluation-time "now": context-supplied RFC3339 timestamp or wall clock
fn current_time(context: &Value) -> DateTime<FixedOffset> {
    context
        .get("current_time")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .unwrap_or_else(|| Utc::now().fixed_offset())
}

fn generate_suggestion(
    rule: &Rule,
    action: &SuggestionAction,
    ruleset: &RuleSet,
    traits: &TraitMap,
    context: &Value,
    narrative_context: Vec<NarrativeMatch>,
) -> Result<Suggestion> {
    // Guaranteed by validation; reachable only for hand-built rule sets
    let template = ruleset.templates.get(&action.template).ok_or_else(|| {
        PersonaKitError::Configuration(format!(
            "rule '{}' references unknown template '{}'",
            rule.id, action.template
        ))
    })?;

    let mut parameters = BTreeMap::new();
    for (name, source) in &action.parameters {
        let resolved = source
            .from_trait
            .as_deref()
            .and_then(|path| paths::resolve_trait(traits, path).map(|(_, v)| v.clone()))
            .or_else(|| {
                source
                    .from_context
                    .as_deref()
                    .and_then(|path| paths::lookup_value(context, path).cloned())
            })
            .or_else(|| source.default.clone());

        if let Some(value) = resolved {
            let value = match &source.transform {
                Some(transform) => apply_transform(transform, value),
                None => value,
            };
            parameters.insert(name.clone(), value);
        }
    }

    Ok(Suggestion {
        suggestion_type: template.suggestion_type(&action.template).to_string(),
        title: substitute(&template.title, &parameters),
        description: substitute(&template.description, &parameters),
        priority: template.priority,
        rule_id: rule.id.clone(),
        weight: rule.weight,
        parameters,
        metadata: template.metadata.clone(),
        narrative_context,
    })
}

/// Apply a named transform; unknown names and type mismatches degrade to
/// the untransformed value
fn apply_transform(transform: &str, value: Value) -> Value {
    match transform {
        "minutes_to_hours" => match coerce_f64(&value) {
            Some(minutes) => Value::String(format!("{:.1} hours", minutes / 60.0)),
            None => value,
        },
        "capitalize" => {
            let s = display_value(&value);
            let mut chars = s.chars();
            match chars.next() {
                Some(first) => Value::String(
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
                ),
                None => Value::String(s),
            }
        }
        "lower" => Value::String(display_value(&value).to_lowercase()),
        other => {
            debug!(transform = other, "unknown transform, using raw value");
            value
        }
    }
}

/// Literal `{param}` substitution into template strings
fn substitute(template: &str, parameters: &BTreeMap<String, Value>) -> String {
    let mut out = template.to_string();
    for (name, value) in parameters {
        out = out.replace(&format!("{{{}}}", name), &display_value(value));
    }
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
