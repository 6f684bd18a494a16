//! End-to-end pipeline tests
//!
//! Exercises the full path: observation ingest through the outbox queue,
//! trait extraction and merging, rule evaluation, persona assembly, and
//! the feedback loop writing weight changes back into the trait store.

use personakit::storage::sqlite::SqliteStore;
use personakit::{
    EngineConfig, EngineStore, Feedback, Observation, ObservationType, PersonId, PersonaConfig,
    PersonaGenerator, RuleEngine, RuleSet, Worker,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

const OPTIMIZER_RULES: &str = r#"
metadata:
  id: daily_work_optimizer
  name: Daily Work Optimizer
  description: Time-aware work scheduling suggestions
  default_ttl_hours: 24
required_traits:
  - work.focus_duration
rules:
  - id: morning_deep_work
    weight: 1.0
    conditions:
      type: all
      conditions:
        - time_check:
            period: morning
        - trait_check:
            path: current_state.energy_level
            operator: equals
            value: high
    actions:
      - type: generate_suggestion
        generate_suggestion:
          template: deep_work_window
          parameters:
            duration_minutes:
              from_trait: work.focus_duration
              default: 60
            focus_time:
              from_trait: work.focus_duration
              default: 60
              transform: minutes_to_hours
templates:
  deep_work_window:
    title: Deep Work Window
    description: "Block {focus_time} for focused work"
    priority: high
    metadata:
      suggestion_type: focus_block
"#;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn engine_setup() -> (Arc<SqliteStore>, Worker, PersonaGenerator) {
    init_tracing();
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let worker = Worker::new(store.clone(), EngineConfig::default());
    let generator = PersonaGenerator::new(
        store.clone(),
        RuleEngine::new(),
        PersonaConfig::default(),
    );
    (store, worker, generator)
}

async fn ingest_and_process(worker: &Worker, observation: Observation) {
    worker.ingest_observation(&observation).await.unwrap();
    assert!(worker.run_once().await.unwrap());
}

#[tokio::test]
async fn test_observation_to_suggestion_pipeline() {
    let (store, worker, generator) = engine_setup().await;
    let person = PersonId::new();

    // A strong morning work session at hour 10
    ingest_and_process(
        &worker,
        Observation::new(
            person,
            ObservationType::WorkSession,
            json!({
                "duration_minutes": 90,
                "start": "2026-01-12T10:00:00Z",
                "productivity_score": 5,
                "interruptions": 0
            }),
        ),
    )
    .await;

    let mindscape = store.get_mindscape(person).await.unwrap().unwrap();
    assert_eq!(mindscape.version, 1);
    assert_eq!(mindscape.traits["work.focus_duration"].value, json!(90.0));
    assert_eq!(
        mindscape.traits["current_state.energy_level"].value,
        json!("high")
    );
    assert_eq!(
        mindscape.traits["work.peak_hours"].value,
        json!(["10:00-11:00"])
    );

    // The morning rule fires against the merged traits
    let ruleset = RuleSet::from_yaml(OPTIMIZER_RULES).unwrap();
    let context = json!({"current_time": "2026-01-12T10:30:00Z", "time_of_day": "morning"});
    let persona = generator
        .generate(person, &ruleset, &context, None)
        .await
        .unwrap();

    assert_eq!(persona.overlay.suggestions.len(), 1);
    let suggestion = &persona.overlay.suggestions[0];
    assert_eq!(suggestion.suggestion_type, "focus_block");
    assert_eq!(suggestion.title, "Deep Work Window");
    assert_eq!(suggestion.description, "Block 1.5 hours for focused work");
    assert_eq!(suggestion.parameters["duration_minutes"], json!(90.0));
    assert_eq!(suggestion.rule_id, "morning_deep_work");

    // The same rule set at 15:00 produces nothing
    let afternoon = json!({"current_time": "2026-01-12T15:00:00Z"});
    let persona = generator
        .generate(person, &ruleset, &afternoon, None)
        .await
        .unwrap();
    assert!(persona.overlay.suggestions.is_empty());
}

#[tokio::test]
async fn test_merge_accumulates_across_observations() {
    let (store, worker, _) = engine_setup().await;
    let person = PersonId::new();

    ingest_and_process(
        &worker,
        Observation::new(
            person,
            ObservationType::WorkSession,
            json!({"duration_minutes": 60}),
        ),
    )
    .await;
    ingest_and_process(
        &worker,
        Observation::new(
            person,
            ObservationType::WorkSession,
            json!({"duration_minutes": 90}),
        ),
    )
    .await;

    let mindscape = store.get_mindscape(person).await.unwrap().unwrap();
    assert_eq!(mindscape.version, 2);

    let entry = &mindscape.traits["work.focus_duration"];
    assert_eq!(entry.value, json!(75.0));
    assert_eq!(entry.sample_size, 2);
    assert_eq!(entry.confidence, 0.9);
}

#[tokio::test]
async fn test_claim_exclusivity_under_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::open(dir.path().join("queue.db"))
            .await
            .unwrap(),
    );

    let mut expected = HashSet::new();
    for i in 0..20 {
        let task = store
            .enqueue("process_observation", json!({"n": i}), None)
            .await
            .unwrap();
        expected.insert(task.id);
    }

    // Four claimers drain the queue concurrently
    let mut claimers = Vec::new();
    for _ in 0..4 {
        let store = store.clone();
        claimers.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(task) = store.claim_next().await.unwrap() {
                claimed.push(task.id);
                store.complete(task.id).await.unwrap();
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for claimer in claimers {
        for id in claimer.await.unwrap() {
            assert!(seen.insert(id), "task {id} claimed twice");
            total += 1;
        }
    }

    assert_eq!(total, 20);
    assert_eq!(seen, expected);
    assert_eq!(store.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_feedback_loop_blends_future_personas() {
    let (store, worker, generator) = engine_setup().await;
    let person = PersonId::new();

    ingest_and_process(
        &worker,
        Observation::new(
            person,
            ObservationType::WorkSession,
            json!({
                "duration_minutes": 90,
                "start": "2026-01-12T10:00:00Z",
                "productivity_score": 5,
                "interruptions": 0
            }),
        ),
    )
    .await;

    let processor = personakit::FeedbackProcessor::new(
        store.clone(),
        personakit::FeedbackConfig::default(),
    );

    // Five negative events for focus_block suggestions cross the threshold
    let mut signal = personakit::FeedbackSignal::Neutral;
    for _ in 0..5 {
        signal = processor
            .submit(
                Feedback::new(person, Uuid::new_v4())
                    .with_helpful(false)
                    .with_suggestion_type("focus_block"),
            )
            .await
            .unwrap();
    }
    assert_eq!(signal, personakit::FeedbackSignal::Negative);

    let mindscape = store.get_mindscape(person).await.unwrap().unwrap();
    assert_eq!(mindscape.traits["work.focus_duration"].weight, 0.8);

    // The reduced weight blends the core value toward the 60-minute neutral
    let ruleset = RuleSet::from_yaml(OPTIMIZER_RULES).unwrap();
    let persona = generator
        .generate(person, &ruleset, &json!({}), None)
        .await
        .unwrap();
    assert_eq!(persona.core["work_style"]["focus_duration"], json!(84.0));
}

#[tokio::test]
async fn test_persona_ttl_scenario() {
    let (_, worker, generator) = engine_setup().await;
    let person = PersonId::new();

    ingest_and_process(
        &worker,
        Observation::new(
            person,
            ObservationType::WorkSession,
            json!({"duration_minutes": 45}),
        ),
    )
    .await;

    let ruleset = RuleSet::from_yaml(OPTIMIZER_RULES).unwrap();
    let persona = generator
        .generate(person, &ruleset, &json!({}), Some(2))
        .await
        .unwrap();

    assert!(!persona.is_expired());
    assert!(!persona.is_expired_at(persona.generated_at + chrono::Duration::minutes(119)));
    assert!(persona.is_expired_at(persona.generated_at + chrono::Duration::hours(2)));
}

#[tokio::test]
async fn test_failed_processing_surfaces_to_operator_view() {
    let (store, worker, _) = engine_setup().await;

    // Task referencing an observation that was never written
    store
        .enqueue(
            "process_observation",
            json!({"observation_id": Uuid::new_v4()}),
            None,
        )
        .await
        .unwrap();

    assert!(worker.run_once().await.unwrap());

    // Retried later, not terminal yet, and visible as pending again
    assert_eq!(store.pending_count().await.unwrap(), 1);
    assert!(store.failed_tasks(10).await.unwrap().is_empty());
    // Gated by backoff, so nothing is claimable right now
    assert!(store.claim_next().await.unwrap().is_none());
}
