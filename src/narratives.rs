//! Narrative search capability
//!
//! Narratives are free-text observations or corrections matched by semantic
//! similarity rather than exact lookup. The engine does not own an embedding
//! model or vector index: it consumes this capability and receives scored
//! matches. Rule evaluation issues queries through it for `narrative_check`
//! conditions, caching results per query for the duration of one pass.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::types::PersonId;

/// A scored narrative match returned by the search capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrativeMatch {
    pub id: Uuid,

    /// Matched narrative text (excerpt)
    pub text: String,

    /// Similarity score in [0, 1]
    pub score: f64,

    /// Narrative type (e.g. "self_observation", "curation")
    pub narrative_type: String,
}

/// Semantic search over a person's narratives
///
/// Implemented externally against a vector index; the in-memory
/// implementation below exists for tests and local development.
#[async_trait]
pub trait NarrativeSearch: Send + Sync {
    /// Return matches for `query` scoring at least `min_similarity`,
    /// best first, at most `limit`, optionally filtered by narrative type.
    async fn search(
        &self,
        person_id: PersonId,
        query: &str,
        min_similarity: f64,
        limit: usize,
        narrative_type: Option<&str>,
    ) -> Result<Vec<NarrativeMatch>>;
}

#[derive(Debug, Clone)]
struct StoredNarrative {
    id: Uuid,
    person_id: PersonId,
    text: String,
    narrative_type: String,
}

/// In-memory narrative index with token-overlap scoring
///
/// Scores by Jaccard overlap of lowercased word sets. Deterministic and
/// dependency-free; a stand-in for the real embedding-backed index.
#[derive(Default)]
pub struct InMemoryNarrativeIndex {
    narratives: RwLock<Vec<StoredNarrative>>,
}

impl InMemoryNarrativeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a narrative for a person, returning its ID
    pub async fn add(
        &self,
        person_id: PersonId,
        text: impl Into<String>,
        narrative_type: impl Into<String>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        self.narratives.write().await.push(StoredNarrative {
            id,
            person_id,
            text: text.into(),
            narrative_type: narrative_type.into(),
        });
        id
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect()
    }

    fn similarity(query: &HashSet<String>, text: &str) -> f64 {
        let candidate = Self::tokens(text);
        if query.is_empty() || candidate.is_empty() {
            return 0.0;
        }
        let intersection = query.intersection(&candidate).count() as f64;
        let union = query.union(&candidate).count() as f64;
        intersection / union
    }
}

#[async_trait]
impl NarrativeSearch for InMemoryNarrativeIndex {
    async fn search(
        &self,
        person_id: PersonId,
        query: &str,
        min_similarity: f64,
        limit: usize,
        narrative_type: Option<&str>,
    ) -> Result<Vec<NarrativeMatch>> {
        let query_tokens = Self::tokens(query);
        let narratives = self.narratives.read().await;

        let mut matches: Vec<NarrativeMatch> = narratives
            .iter()
            .filter(|n| n.person_id == person_id)
            .filter(|n| narrative_type.map_or(true, |t| n.narrative_type == t))
            .filter_map(|n| {
                let score = Self::similarity(&query_tokens, &n.text);
                (score >= min_similarity).then(|| NarrativeMatch {
                    id: n.id,
                    text: n.text.clone(),
                    score,
                    narrative_type: n.narrative_type.clone(),
                })
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(limit);
        Ok(matches)
    }
}
