//! Transition rules and derived-state roll-ups for the review state machine.
//!
//! The step transition graph:
//!
//! ```text
//! pending     -> in-progress | completed | approved* | skipped | failed
//! in-progress -> completed | failed
//! failed      -> pending   (retry)
//! completed   -> pending   (explicit reset)
//! skipped     -> pending   (explicit reset)
//! approved    -> pending   (explicit reset)
//! ```
//!
//! `approved` is reachable only under [`ReviewPolicy::Approval`]. Phase and
//! plan statuses are never set directly; they are recomputed from the steps
//! after every mutation.

use crate::plan::model::{Plan, PhaseStatus, PlanStatus, PlanStep, ReviewPolicy, StepStatus};

/// Check whether a step transition is a valid edge in the state graph.
pub fn is_valid_transition(policy: ReviewPolicy, from: StepStatus, to: StepStatus) -> bool {
    if from == StepStatus::Pending && to == StepStatus::Approved {
        return policy == ReviewPolicy::Approval;
    }
    matches!(
        (from, to),
        (StepStatus::Pending, StepStatus::InProgress)
            | (StepStatus::Pending, StepStatus::Completed)
            | (StepStatus::Pending, StepStatus::Skipped)
            | (StepStatus::Pending, StepStatus::Failed)
            | (StepStatus::InProgress, StepStatus::Completed)
            | (StepStatus::InProgress, StepStatus::Failed)
            | (StepStatus::Failed, StepStatus::Pending)
            | (StepStatus::Completed, StepStatus::Pending)
            | (StepStatus::Skipped, StepStatus::Pending)
            | (StepStatus::Approved, StepStatus::Pending)
    )
}

/// Roll a phase's status up from its steps.
///
/// `failed` wins over everything; a non-empty phase whose steps are all
/// accepted is `completed`; any `in-progress` step makes the phase
/// `in-progress`; otherwise the phase is `pending`.
pub fn derive_phase_status(steps: &[PlanStep], policy: ReviewPolicy) -> PhaseStatus {
    if steps.iter().any(|s| s.status == StepStatus::Failed) {
        return PhaseStatus::Failed;
    }
    if !steps.is_empty() && steps.iter().all(|s| policy.accepts(s.status)) {
        return PhaseStatus::Completed;
    }
    if steps.iter().any(|s| s.status == StepStatus::InProgress) {
        return PhaseStatus::InProgress;
    }
    PhaseStatus::Pending
}

/// Roll a plan's status up from its phases, by the same precedence as the
/// phase roll-up: `failed` > `completed` > `active` > `draft`. A plan with
/// any started or finished phase is `active`.
pub fn derive_plan_status(plan: &Plan) -> PlanStatus {
    let phases = &plan.phases;
    if phases.iter().any(|p| p.status == PhaseStatus::Failed) {
        return PlanStatus::Failed;
    }
    if !phases.is_empty() && phases.iter().all(|p| p.status == PhaseStatus::Completed) {
        return PlanStatus::Completed;
    }
    if phases
        .iter()
        .any(|p| matches!(p.status, PhaseStatus::InProgress | PhaseStatus::Completed))
    {
        return PlanStatus::Active;
    }
    PlanStatus::Draft
}

/// Share of reviewed steps, rounded to the nearest integer percent.
///
/// A plan with zero steps has progress 0.
pub fn plan_progress(plan: &Plan, policy: ReviewPolicy) -> u8 {
    let total = plan.total_steps();
    if total == 0 {
        return 0;
    }
    let reviewed = plan.steps().filter(|s| policy.accepts(s.status)).count();
    ((reviewed as f64 / total as f64) * 100.0).round() as u8
}
