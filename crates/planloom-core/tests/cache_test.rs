//! Integration tests for fingerprinting and the artifact cache: stability,
//! sensitivity to single status changes, and eager eviction on mutation.

use planloom_core::plan::markdown::render_final_markdown;
use planloom_core::plan::model::{ReviewPolicy, StepStatus};
use planloom_core::plan::parser::parse_plan_text;
use planloom_core::store::{ArtifactCache, PlanStore, plan_fingerprint};

fn store_with_plan() -> (PlanStore, uuid::Uuid, Vec<uuid::Uuid>) {
    let text = "\
PLAN: Cached
PHASE 1: One
STEP 1.1: A
STEP 1.2: B
";
    let store = PlanStore::new(ReviewPolicy::Execution, ArtifactCache::new());
    let plan = store.create_plan(parse_plan_text(text, "cached").unwrap());
    let steps = plan.steps().map(|s| s.id).collect();
    (store, plan.id, steps)
}

#[test]
fn fingerprint_is_stable_for_unchanged_state() {
    let (store, plan_id, _) = store_with_plan();
    let a = store.fingerprint(plan_id).unwrap();
    let b = store.fingerprint(plan_id).unwrap();
    assert_eq!(a, b);
    assert!(!a.is_empty());
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn single_status_change_changes_the_fingerprint() {
    let (store, plan_id, steps) = store_with_plan();
    let before = store.fingerprint(plan_id).unwrap();

    store
        .update_step_status(steps[0], StepStatus::Completed, None)
        .unwrap();
    let after = store.fingerprint(plan_id).unwrap();
    assert_ne!(before, after);

    // Resetting restores the original review state and fingerprint.
    store
        .update_step_status(steps[0], StepStatus::Pending, None)
        .unwrap();
    assert_eq!(store.fingerprint(plan_id).unwrap(), before);
}

#[test]
fn status_mutation_evicts_the_cached_artifact() {
    let (store, plan_id, steps) = store_with_plan();
    store.store_artifact(plan_id, "doc v1".to_owned()).unwrap();
    assert_eq!(
        store.cached_artifact(plan_id).unwrap().as_deref(),
        Some("doc v1")
    );

    store
        .update_step_status(steps[0], StepStatus::Completed, None)
        .unwrap();
    assert!(
        store.cached_artifact(plan_id).unwrap().is_none(),
        "mutation must evict eagerly"
    );
}

#[test]
fn stale_entry_is_missed_even_if_present() {
    let (store, plan_id, steps) = store_with_plan();
    let original = store.fingerprint(plan_id).unwrap();

    store
        .update_step_status(steps[0], StepStatus::Completed, None)
        .unwrap();
    store.store_artifact(plan_id, "doc v2".to_owned()).unwrap();

    // Walk the state back so the stored fingerprint no longer matches.
    store
        .update_step_status(steps[0], StepStatus::Pending, None)
        .unwrap();
    assert_eq!(store.fingerprint(plan_id).unwrap(), original);
    assert!(store.cached_artifact(plan_id).unwrap().is_none());
}

#[test]
fn cache_is_per_plan() {
    let (store, first_id, _steps) = store_with_plan();
    let second = store.create_plan(
        parse_plan_text("PLAN: Other\nPHASE 1: P\nSTEP 1.1: S\n", "other").unwrap(),
    );

    store.store_artifact(first_id, "first".to_owned()).unwrap();
    store.store_artifact(second.id, "second".to_owned()).unwrap();

    assert_eq!(
        store.cached_artifact(first_id).unwrap().as_deref(),
        Some("first")
    );
    assert_eq!(
        store.cached_artifact(second.id).unwrap().as_deref(),
        Some("second")
    );
}

#[test]
fn identical_review_state_renders_identical_documents() {
    let (store, plan_id, steps) = store_with_plan();
    store
        .update_step_status(steps[0], StepStatus::Completed, None)
        .unwrap();
    store
        .update_step_status(steps[1], StepStatus::Skipped, None)
        .unwrap();

    let plan = store.get_plan(plan_id).unwrap();
    let a = render_final_markdown(&plan, ReviewPolicy::Execution);
    let b = render_final_markdown(&store.get_plan(plan_id).unwrap(), ReviewPolicy::Execution);
    assert_eq!(a, b, "same fingerprint must mean same document");
    assert_eq!(plan_fingerprint(&plan), store.fingerprint(plan_id).unwrap());
}
