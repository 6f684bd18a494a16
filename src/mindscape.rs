//! Trait merging into the versioned mindscape
//!
//! The merger is the only writer of trait content. Each merge reads the
//! current trait document, folds candidate deltas in with
//! confidence-weighted sample averaging, and writes the whole document back
//! with a version increment. Two concurrent merges for the same person
//! serialize on the store; last committed wins on the whole document
//! (accepted limitation, not a correctness goal).

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::Result;
use crate::extractor::TraitDeltas;
use crate::storage::EngineStore;
use crate::types::{Mindscape, PersonId, TraitDelta, TraitEntry, TraitMap};

/// Merge a single delta into an existing trait entry
///
/// Confidence merges by sample-weighted averaging; numeric values the same
/// way; lists take a deduplicated union; other values keep whichever side
/// has higher confidence (ties keep the existing value). Weight and
/// adjustment metadata on the existing entry survive the merge.
pub fn merge_entry(existing: &TraitEntry, delta: &TraitDelta) -> TraitEntry {
    let old_n = existing.sample_size.max(1) as f64;
    let new_n = delta.sample_size.max(1) as f64;
    let total = old_n + new_n;

    let confidence = (existing.confidence * old_n + delta.confidence * new_n) / total;

    let value = match (&existing.value, &delta.value) {
        (old, new) if old.is_number() && new.is_number() => {
            let merged = (old.as_f64().unwrap_or(0.0) * old_n + new.as_f64().unwrap_or(0.0) * new_n)
                / total;
            serde_json::Number::from_f64(merged)
                .map(Value::Number)
                .unwrap_or_else(|| existing.value.clone())
        }
        (Value::Array(old), Value::Array(new)) => {
            // Union, deduplicated, existing order preserved
            let mut merged = old.clone();
            for item in new {
                if !merged.contains(item) {
                    merged.push(item.clone());
                }
            }
            Value::Array(merged)
        }
        _ => {
            if delta.confidence > existing.confidence {
                delta.value.clone()
            } else {
                existing.value.clone()
            }
        }
    };

    TraitEntry {
        value,
        confidence: round3(confidence),
        sample_size: existing.sample_size.saturating_add(delta.sample_size.max(1)),
        weight: existing.weight,
        last_adjusted: existing.last_adjusted,
        adjustment_reason: existing.adjustment_reason.clone(),
    }
}

/// Fold deltas into a trait map in place
pub fn merge_traits(traits: &mut TraitMap, deltas: TraitDeltas) {
    for (path, delta) in deltas {
        match traits.get(&path) {
            Some(existing) => {
                let merged = merge_entry(existing, &delta);
                traits.insert(path, merged);
            }
            None => {
                traits.insert(path, TraitEntry::from_delta(delta));
            }
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Store-backed trait merger owning the versioned write
#[derive(Clone)]
pub struct TraitMerger {
    store: Arc<dyn EngineStore>,
}

impl TraitMerger {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    /// Fold candidate deltas into the person's mindscape
    ///
    /// Read current -> compute merged map -> write with version increment.
    pub async fn merge(&self, person_id: PersonId, deltas: TraitDeltas) -> Result<Mindscape> {
        let mut traits = self
            .store
            .get_mindscape(person_id)
            .await?
            .map(|m| m.traits)
            .unwrap_or_default();

        let delta_count = deltas.len();
        merge_traits(&mut traits, deltas);

        let mindscape = self.store.put_mindscape(person_id, &traits).await?;

        info!(
            person_id = %person_id,
            deltas = delta_count,
            version = mindscape.version,
            "merged traits into mindscape"
        );
        debug!(traits = traits.len(), "mindscape trait count");

        Ok(mindscape)
    }
}
