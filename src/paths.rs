//! Centralized dotted-path navigation
//!
//! Trait, context, and template-parameter resolution all navigate dotted
//! paths (`work.focus_duration`, `current_state.energy_level`). This module
//! is the single implementation: paths are validated once, lookups return a
//! typed found-or-not result rather than failing mid-evaluation.
//!
//! The trait map is flat, keyed by dotted path. A lookup first tries the
//! longest prefix of the path that names a trait entry, then navigates any
//! remaining segments inside that entry's value document (so
//! `work.focus_duration.p50` reaches into a percentile map stored under
//! `work.focus_duration`).

use serde_json::Value;

use crate::types::{TraitEntry, TraitMap};

/// Split and validate a dotted path
///
/// Returns `None` for empty paths or paths with empty segments
/// (`"a..b"`, `".a"`, `"a."`).
pub fn parse(path: &str) -> Option<Vec<&str>> {
    if path.is_empty() {
        return None;
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

/// Navigate a dotted path into a JSON document
pub fn lookup_value<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let segments = parse(path)?;
    navigate(doc, &segments)
}

/// Navigate pre-split segments into a JSON document
pub fn navigate<'a>(doc: &'a Value, segments: &[&str]) -> Option<&'a Value> {
    let mut current = doc;
    for segment in segments {
        match current {
            Value::Object(map) => current = map.get(*segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Resolve a dotted path against a flat trait map
///
/// Returns the owning entry together with the resolved value: the entry's
/// whole value when the path names a trait exactly, or the nested leaf when
/// the path extends into the entry's value document.
pub fn resolve_trait<'a>(traits: &'a TraitMap, path: &str) -> Option<(&'a TraitEntry, &'a Value)> {
    let segments = parse(path)?;

    // Exact key match first
    if let Some(entry) = traits.get(path) {
        return Some((entry, &entry.value));
    }

    // Longest-prefix match, navigating the remainder inside the value
    for split in (1..segments.len()).rev() {
        let key = segments[..split].join(".");
        if let Some(entry) = traits.get(&key) {
            let value = navigate(&entry.value, &segments[split..])?;
            return Some((entry, value));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TraitDelta;
    use serde_json::json;

    fn entry(value: Value) -> TraitEntry {
        TraitEntry::from_delta(TraitDelta::new(value, 0.8))
    }

    #[test]
    fn test_parse_rejects_malformed_paths() {
        assert!(parse("").is_none());
        assert!(parse(".a").is_none());
        assert!(parse("a.").is_none());
        assert!(parse("a..b").is_none());
        assert_eq!(parse("work.focus_duration"), Some(vec!["work", "focus_duration"]));
    }

    #[test]
    fn test_lookup_value_nested() {
        let doc = json!({"work": {"focus": {"minutes": 90}}});
        assert_eq!(lookup_value(&doc, "work.focus.minutes"), Some(&json!(90)));
        assert_eq!(lookup_value(&doc, "work.focus.missing"), None);
        assert_eq!(lookup_value(&doc, "work.focus.minutes.deeper"), None);
    }

    #[test]
    fn test_resolve_trait_exact_key() {
        let mut traits = TraitMap::new();
        traits.insert("work.focus_duration".to_string(), entry(json!(90)));

        let (_, value) = resolve_trait(&traits, "work.focus_duration").unwrap();
        assert_eq!(value, &json!(90));
    }

    #[test]
    fn test_resolve_trait_into_nested_value() {
        let mut traits = TraitMap::new();
        traits.insert(
            "work.focus_duration".to_string(),
            entry(json!({"p50": 60, "p90": 120})),
        );

        let (owner, value) = resolve_trait(&traits, "work.focus_duration.p90").unwrap();
        assert_eq!(value, &json!(120));
        assert_eq!(owner.value["p50"], json!(60));
    }

    #[test]
    fn test_resolve_trait_prefers_longest_prefix() {
        let mut traits = TraitMap::new();
        traits.insert("work".to_string(), entry(json!({"focus_duration": 30})));
        traits.insert("work.focus_duration".to_string(), entry(json!(90)));

        let (_, value) = resolve_trait(&traits, "work.focus_duration").unwrap();
        assert_eq!(value, &json!(90));
    }

    #[test]
    fn test_resolve_trait_missing() {
        let traits = TraitMap::new();
        assert!(resolve_trait(&traits, "work.focus_duration").is_none());
    }
}
