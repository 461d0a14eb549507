//! Canonical in-memory plan collection and its review state machine.
//!
//! All reads and writes go through [`PlanStore`]. Every mutation runs as a
//! single critical section behind one mutex, and update helpers build a new
//! plan value that is swapped in whole, so a concurrent reader never
//! observes a half-updated tree. Derived state (phase status, plan status,
//! progress, aggregate metadata) is recomputed after every step mutation.

pub mod cache;
pub mod machine;

pub use cache::{ArtifactCache, plan_fingerprint};
pub use machine::{derive_phase_status, derive_plan_status, is_valid_transition, plan_progress};

use std::sync::Mutex;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::plan::model::{
    CodeChange, Plan, PlanMetadata, PlanPhase, PlanStatus, PlanStep, ReviewPolicy, StepStatus,
};
use crate::plan::parser::ParsedPlan;

/// Errors from plan store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("plan {0} not found")]
    PlanNotFound(Uuid),

    #[error("phase {0} not found")]
    PhaseNotFound(Uuid),

    #[error("step {0} not found")]
    StepNotFound(Uuid),

    #[error("code change {0} not found")]
    ChangeNotFound(Uuid),

    #[error("invalid step transition: {from} -> {to}")]
    InvalidTransition { from: StepStatus, to: StepStatus },
}

/// Direct plan-metadata updates. Derived fields (`progress`, phase/step
/// statuses) are not patchable.
#[derive(Debug, Clone, Default)]
pub struct PlanPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<PlanStatus>,
    pub metadata: Option<PlanMetadata>,
}

struct StoreInner {
    plans: Vec<Plan>,
    active_plan_id: Option<Uuid>,
    cache: ArtifactCache,
}

/// Owner of the canonical plan collection for one session.
pub struct PlanStore {
    policy: ReviewPolicy,
    inner: Mutex<StoreInner>,
}

impl PlanStore {
    /// Create a store with the given review policy and artifact cache.
    ///
    /// The cache lifecycle is tied to this store: entries are evicted on
    /// plan mutation and dropped when the plan is deleted.
    pub fn new(policy: ReviewPolicy, cache: ArtifactCache) -> Self {
        Self {
            policy,
            inner: Mutex::new(StoreInner {
                plans: Vec::new(),
                active_plan_id: None,
                cache,
            }),
        }
    }

    pub fn policy(&self) -> ReviewPolicy {
        self.policy
    }

    // -----------------------------------------------------------------------
    // Creation / lookup
    // -----------------------------------------------------------------------

    /// Admit a parsed tree into the collection.
    ///
    /// Assigns ids and timestamps, resets progress to 0, computes aggregate
    /// metadata, appends the plan, and makes it the active plan. Returns the
    /// admitted plan.
    pub fn create_plan(&self, parsed: ParsedPlan) -> Plan {
        let now = Utc::now();
        let plan_id = Uuid::new_v4();

        let phases: Vec<PlanPhase> = parsed
            .phases
            .into_iter()
            .enumerate()
            .map(|(order, phase)| {
                let phase_id = Uuid::new_v4();
                let steps: Vec<PlanStep> = phase
                    .steps
                    .into_iter()
                    .enumerate()
                    .map(|(step_order, step)| {
                        let step_id = Uuid::new_v4();
                        let code_changes: Vec<CodeChange> = step
                            .code_changes
                            .into_iter()
                            .map(|cc| CodeChange {
                                id: Uuid::new_v4(),
                                step_id,
                                file: cc.file,
                                language: cc.language,
                                change_type: cc.change_type,
                                content: Some(cc.content),
                                diff: None,
                                before: None,
                                after: None,
                                applied: false,
                                applied_at: None,
                            })
                            .collect();
                        PlanStep {
                            id: step_id,
                            phase_id,
                            label: step.label,
                            description: step.description,
                            status: StepStatus::Pending,
                            order: step_order as u32,
                            step_type: step.step_type,
                            files: step.files,
                            code_changes,
                            command: None,
                            estimated_time: None,
                            completed_at: None,
                            error: None,
                            expanded: false,
                        }
                    })
                    .collect();
                PlanPhase {
                    id: phase_id,
                    plan_id,
                    label: phase.label,
                    description: phase.description,
                    status: crate::plan::model::PhaseStatus::Pending,
                    order: order as u32,
                    estimated_time: phase.estimated_time,
                    steps,
                    dependencies: Vec::new(),
                    expanded: order == 0,
                }
            })
            .collect();

        let metadata = aggregate_metadata(&phases);
        let plan = Plan {
            id: plan_id,
            title: parsed.title,
            description: Some(parsed.description),
            status: PlanStatus::Draft,
            progress: 0,
            created_at: now,
            updated_at: now,
            phases,
            metadata: Some(metadata),
        };

        let mut inner = self.lock();
        inner.plans.push(plan.clone());
        inner.active_plan_id = Some(plan_id);
        plan
    }

    pub fn list_plans(&self) -> Vec<Plan> {
        self.lock().plans.clone()
    }

    pub fn get_plan(&self, plan_id: Uuid) -> Option<Plan> {
        self.lock().plans.iter().find(|p| p.id == plan_id).cloned()
    }

    pub fn active_plan(&self) -> Option<Plan> {
        let inner = self.lock();
        let id = inner.active_plan_id?;
        inner.plans.iter().find(|p| p.id == id).cloned()
    }

    /// Point the session's active-plan marker at an existing plan, or clear
    /// it with `None`.
    pub fn set_active_plan(&self, plan_id: Option<Uuid>) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(id) = plan_id {
            if !inner.plans.iter().any(|p| p.id == id) {
                return Err(StoreError::PlanNotFound(id));
            }
        }
        inner.active_plan_id = plan_id;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Apply a direct metadata patch to a plan.
    ///
    /// Evicts the plan's cache entry (conservative invalidation) and bumps
    /// `updated_at`.
    pub fn update_plan(&self, plan_id: Uuid, patch: PlanPatch) -> Result<Plan, StoreError> {
        let mut inner = self.lock();
        let idx = inner
            .plans
            .iter()
            .position(|p| p.id == plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;

        let mut plan = inner.plans[idx].clone();
        if let Some(title) = patch.title {
            plan.title = title;
        }
        if let Some(description) = patch.description {
            plan.description = Some(description);
        }
        if let Some(status) = patch.status {
            plan.status = status;
        }
        if let Some(metadata) = patch.metadata {
            plan.metadata = Some(metadata);
        }
        plan.updated_at = Utc::now();

        inner.plans[idx] = plan.clone();
        inner.cache.invalidate(plan_id);
        Ok(plan)
    }

    /// Transition a step to a new status.
    ///
    /// Rejects edges not in the transition graph with
    /// [`StoreError::InvalidTransition`], leaving all state untouched. On
    /// success, sets or clears `completed_at`/`error` per the status
    /// invariants, re-derives the owning phase's and plan's statuses,
    /// recomputes progress and aggregate metadata, and evicts the plan's
    /// cache entry. `error` is recorded only on a transition into `failed`.
    pub fn update_step_status(
        &self,
        step_id: Uuid,
        new_status: StepStatus,
        error: Option<String>,
    ) -> Result<Plan, StoreError> {
        let mut inner = self.lock();
        let (plan_idx, phase_idx, step_idx) = inner
            .locate_step(step_id)
            .ok_or(StoreError::StepNotFound(step_id))?;

        let mut plan = inner.plans[plan_idx].clone();
        let step = &mut plan.phases[phase_idx].steps[step_idx];
        let from = step.status;
        if !is_valid_transition(self.policy, from, new_status) {
            return Err(StoreError::InvalidTransition {
                from,
                to: new_status,
            });
        }

        step.status = new_status;
        step.completed_at = match new_status {
            StepStatus::Completed | StepStatus::Approved => Some(Utc::now()),
            _ => None,
        };
        step.error = match new_status {
            StepStatus::Failed => {
                Some(error.unwrap_or_else(|| "step failed during review".to_owned()))
            }
            _ => None,
        };

        self.recompute(&mut plan);
        let plan_id = plan.id;
        inner.plans[plan_idx] = plan.clone();
        inner.cache.invalidate(plan_id);
        Ok(plan)
    }

    /// Flip a phase's display flag. No effect on status, progress, or cache.
    pub fn toggle_phase_expansion(&self, phase_id: Uuid) -> Result<Plan, StoreError> {
        let mut inner = self.lock();
        let (plan_idx, phase_idx) = inner
            .locate_phase(phase_id)
            .ok_or(StoreError::PhaseNotFound(phase_id))?;
        let mut plan = inner.plans[plan_idx].clone();
        let phase = &mut plan.phases[phase_idx];
        phase.expanded = !phase.expanded;
        inner.plans[plan_idx] = plan.clone();
        Ok(plan)
    }

    /// Flip a step's display flag. No effect on status, progress, or cache.
    pub fn toggle_step_expansion(&self, step_id: Uuid) -> Result<Plan, StoreError> {
        let mut inner = self.lock();
        let (plan_idx, phase_idx, step_idx) = inner
            .locate_step(step_id)
            .ok_or(StoreError::StepNotFound(step_id))?;
        let mut plan = inner.plans[plan_idx].clone();
        let step = &mut plan.phases[phase_idx].steps[step_idx];
        step.expanded = !step.expanded;
        inner.plans[plan_idx] = plan.clone();
        Ok(plan)
    }

    /// Record that an external collaborator applied a code change to the
    /// workspace. Flips `applied` to true exactly once; a second call is a
    /// no-op that returns the unchanged plan. The store performs no file
    /// I/O itself.
    pub fn mark_change_applied(&self, change_id: Uuid) -> Result<Plan, StoreError> {
        let mut inner = self.lock();
        let (plan_idx, phase_idx, step_idx, change_idx) = inner
            .locate_change(change_id)
            .ok_or(StoreError::ChangeNotFound(change_id))?;

        let mut plan = inner.plans[plan_idx].clone();
        let change = &mut plan.phases[phase_idx].steps[step_idx].code_changes[change_idx];
        if !change.applied {
            change.applied = true;
            change.applied_at = Some(Utc::now());
        }
        inner.plans[plan_idx] = plan.clone();
        Ok(plan)
    }

    /// Remove a plan, its cache entry, and the active-plan marker if it
    /// pointed at this plan.
    pub fn delete_plan(&self, plan_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let idx = inner
            .plans
            .iter()
            .position(|p| p.id == plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        inner.plans.remove(idx);
        inner.cache.invalidate(plan_id);
        if inner.active_plan_id == Some(plan_id) {
            inner.active_plan_id = None;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Review queries
    // -----------------------------------------------------------------------

    /// Whether the plan is ready to finalize: it has at least one step and
    /// every step's status is in the terminal-acceptance set.
    pub fn can_finalize(&self, plan_id: Uuid) -> Result<bool, StoreError> {
        let inner = self.lock();
        let plan = inner
            .plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        Ok(plan.total_steps() > 0 && plan.steps().all(|s| self.policy.accepts(s.status)))
    }

    /// A copy of the plan with every phase's step list filtered to accepted
    /// steps. Pure projection; the canonical collection is untouched.
    pub fn approved_subset(&self, plan_id: Uuid) -> Result<Plan, StoreError> {
        let inner = self.lock();
        let plan = inner
            .plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        let mut subset = plan.clone();
        for phase in &mut subset.phases {
            phase.steps.retain(|s| self.policy.accepts(s.status));
        }
        Ok(subset)
    }

    // -----------------------------------------------------------------------
    // Artifact cache
    // -----------------------------------------------------------------------

    /// Current review-state fingerprint of a plan.
    pub fn fingerprint(&self, plan_id: Uuid) -> Result<String, StoreError> {
        let inner = self.lock();
        let plan = inner
            .plans
            .iter()
            .find(|p| p.id == plan_id)
            .ok_or(StoreError::PlanNotFound(plan_id))?;
        Ok(plan_fingerprint(plan))
    }

    /// Cached artifact for the plan's current review state, if any.
    ///
    /// A stored entry whose fingerprint no longer matches is evicted and
    /// reported as a miss.
    pub fn cached_artifact(&self, plan_id: Uuid) -> Result<Option<String>, StoreError> {
        let mut inner = self.lock();
        let fingerprint = {
            let plan = inner
                .plans
                .iter()
                .find(|p| p.id == plan_id)
                .ok_or(StoreError::PlanNotFound(plan_id))?;
            plan_fingerprint(plan)
        };
        Ok(inner.cache.get(plan_id, &fingerprint))
    }

    /// Store an artifact under the plan's current fingerprint.
    pub fn store_artifact(&self, plan_id: Uuid, artifact: String) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let fingerprint = {
            let plan = inner
                .plans
                .iter()
                .find(|p| p.id == plan_id)
                .ok_or(StoreError::PlanNotFound(plan_id))?;
            plan_fingerprint(plan)
        };
        inner.cache.put(plan_id, fingerprint, artifact);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Re-derive phase statuses, plan status, progress, and aggregate
    /// metadata after a step mutation.
    fn recompute(&self, plan: &mut Plan) {
        for phase in &mut plan.phases {
            phase.status = derive_phase_status(&phase.steps, self.policy);
        }
        plan.status = derive_plan_status(plan);
        plan.progress = plan_progress(plan, self.policy);
        plan.updated_at = Utc::now();

        let reviewed = plan.steps().filter(|s| self.policy.accepts(s.status)).count();
        let total = plan.total_steps();
        if let Some(metadata) = plan.metadata.as_mut() {
            metadata.total_steps = total;
            metadata.completed_steps = reviewed;
        }
    }
}

impl StoreInner {
    fn locate_step(&self, step_id: Uuid) -> Option<(usize, usize, usize)> {
        for (pi, plan) in self.plans.iter().enumerate() {
            for (hi, phase) in plan.phases.iter().enumerate() {
                if let Some(si) = phase.steps.iter().position(|s| s.id == step_id) {
                    return Some((pi, hi, si));
                }
            }
        }
        None
    }

    fn locate_phase(&self, phase_id: Uuid) -> Option<(usize, usize)> {
        for (pi, plan) in self.plans.iter().enumerate() {
            if let Some(hi) = plan.phases.iter().position(|ph| ph.id == phase_id) {
                return Some((pi, hi));
            }
        }
        None
    }

    fn locate_change(&self, change_id: Uuid) -> Option<(usize, usize, usize, usize)> {
        for (pi, plan) in self.plans.iter().enumerate() {
            for (hi, phase) in plan.phases.iter().enumerate() {
                for (si, step) in phase.steps.iter().enumerate() {
                    if let Some(ci) = step.code_changes.iter().position(|c| c.id == change_id) {
                        return Some((pi, hi, si, ci));
                    }
                }
            }
        }
        None
    }
}

/// Aggregate metadata computed at admission time.
fn aggregate_metadata(phases: &[PlanPhase]) -> PlanMetadata {
    let total_steps = phases.iter().map(|p| p.steps.len()).sum();

    let mut files_affected: Vec<String> = Vec::new();
    for phase in phases {
        for step in &phase.steps {
            for file in &step.files {
                if !files_affected.contains(file) {
                    files_affected.push(file.clone());
                }
            }
        }
    }

    let estimated: Vec<&str> = phases
        .iter()
        .filter_map(|p| p.estimated_time.as_deref())
        .collect();
    let estimated_time = if estimated.is_empty() {
        None
    } else {
        Some(estimated.join(" + "))
    };

    PlanMetadata {
        estimated_time,
        total_steps,
        completed_steps: 0,
        files_affected,
    }
}
