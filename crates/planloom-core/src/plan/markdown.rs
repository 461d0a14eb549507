//! Markdown and prompt-context projections of a reviewed plan.
//!
//! [`render_final_markdown`] is pure and byte-stable for identical input:
//! the same plan state always yields the same document, which is what makes
//! fingerprint-based caching of derived artifacts sound.

use serde::Serialize;
use serde_json::json;

use super::model::{Plan, ReviewPolicy};

/// Counts reported alongside a completed plan artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSummary {
    pub total_steps: usize,
    pub approved_steps: usize,
    pub skipped_steps: usize,
}

/// Compute the review summary for a plan under the given policy.
///
/// `approved_steps` counts accepted, non-skipped steps regardless of which
/// status the policy treats as acceptance.
pub fn review_summary(plan: &Plan, policy: ReviewPolicy) -> ReviewSummary {
    let total_steps = plan.total_steps();
    let skipped_steps = plan
        .steps()
        .filter(|s| s.status == super::model::StepStatus::Skipped)
        .count();
    let approved_steps = plan
        .steps()
        .filter(|s| policy.accepts(s.status))
        .count()
        - skipped_steps;
    ReviewSummary {
        total_steps,
        approved_steps,
        skipped_steps,
    }
}

/// Render the reviewed plan as a human-readable final document.
///
/// Emits a title line, the description, a status line, then one section per
/// phase that has at least one accepted step. Accepted steps are listed with
/// 1-based numbering; skipped steps are marked `(skipped)`.
pub fn render_final_markdown(plan: &Plan, policy: ReviewPolicy) -> String {
    let mut lines: Vec<String> = Vec::new();

    lines.push(format!("# Final Plan: {}", plan.title));
    if let Some(description) = &plan.description {
        lines.push(String::new());
        lines.push(description.clone());
    }
    lines.push(String::new());
    lines.push(format!("Status: {}", plan.status));
    lines.push(String::new());
    lines.push("---".to_owned());

    for (idx, phase) in plan.phases.iter().enumerate() {
        let accepted: Vec<_> = phase
            .steps
            .iter()
            .filter(|s| policy.accepts(s.status))
            .collect();
        if accepted.is_empty() {
            continue;
        }

        lines.push(String::new());
        lines.push(format!("## Phase {}: {}", idx + 1, phase.label));
        if let Some(description) = &phase.description {
            lines.push(String::new());
            lines.push(description.clone());
        }
        lines.push(String::new());
        lines.push("### Steps".to_owned());
        for (sidx, step) in accepted.iter().enumerate() {
            let skipped = step.status == super::model::StepStatus::Skipped;
            if skipped {
                lines.push(format!("- {}. {} (skipped)", sidx + 1, step.label));
            } else {
                lines.push(format!("- {}. {}", sidx + 1, step.label));
            }
            if let Some(description) = &step.description {
                lines.push(format!("  - Action: {description}"));
            }
            if !step.files.is_empty() {
                lines.push(format!("  - Files: {}", step.files.join(", ")));
            }
        }
    }

    lines.push(String::new());
    lines.push("---".to_owned());
    lines.push(String::new());
    lines.push("> This plan is approved and designed to be fed into a coding agent.".to_owned());

    lines.join("\n")
}

/// Project the reviewed plan into the JSON context embedded in the agent-plan
/// completion prompt.
pub fn agent_plan_context(plan: &Plan, policy: ReviewPolicy) -> serde_json::Value {
    let summary = review_summary(plan, policy);
    json!({
        "title": plan.title,
        "description": plan.description,
        "totalSteps": summary.total_steps,
        "approvedCount": summary.approved_steps,
        "skippedCount": summary.skipped_steps,
        "phases": plan.phases.iter().map(|phase| {
            json!({
                "label": phase.label,
                "description": phase.description,
                "steps": phase.steps.iter().map(|step| {
                    json!({
                        "label": step.label,
                        "description": step.description,
                        "status": step.status,
                        "type": step.step_type,
                        "files": step.files,
                        "codeChanges": step.code_changes.iter().map(|cc| {
                            json!({
                                "file": cc.file,
                                "language": cc.language,
                                "content": cc.content,
                            })
                        }).collect::<Vec<_>>(),
                    })
                }).collect::<Vec<_>>(),
            })
        }).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::model::StepStatus;
    use crate::plan::parser::parse_plan_text;
    use crate::store::{ArtifactCache, PlanStore};

    fn reviewed_plan() -> Plan {
        let text = "\
PLAN: Demo
DESCRIPTION: A demo plan.

PHASE 1: Build
- Description: Build things.

STEP 1.1: First
- Type: code
- Files: src/a.rs
- Action: Write the first file.

STEP 1.2: Second
- Type: test

PHASE 2: Polish

STEP 2.1: Untouched
";
        let parsed = parse_plan_text(text, "demo").unwrap();
        let store = PlanStore::new(ReviewPolicy::Execution, ArtifactCache::new());
        let plan = store.create_plan(parsed);
        let steps: Vec<_> = plan.steps().map(|s| s.id).collect();
        store
            .update_step_status(steps[0], StepStatus::Completed, None)
            .unwrap();
        store
            .update_step_status(steps[1], StepStatus::Skipped, None)
            .unwrap();
        store.get_plan(plan.id).unwrap()
    }

    #[test]
    fn renders_title_status_and_accepted_steps() {
        let plan = reviewed_plan();
        let md = render_final_markdown(&plan, ReviewPolicy::Execution);
        assert!(md.starts_with("# Final Plan: Demo"));
        assert!(md.contains("A demo plan."));
        assert!(md.contains("## Phase 1: Build"));
        assert!(md.contains("- 1. First"));
        assert!(md.contains("  - Action: Write the first file."));
        assert!(md.contains("  - Files: src/a.rs"));
        assert!(md.contains("- 2. Second (skipped)"));
    }

    #[test]
    fn phase_with_no_accepted_steps_is_omitted() {
        let plan = reviewed_plan();
        let md = render_final_markdown(&plan, ReviewPolicy::Execution);
        assert!(!md.contains("Phase 2: Polish"));
        assert!(!md.contains("Untouched"));
    }

    #[test]
    fn render_is_deterministic() {
        let plan = reviewed_plan();
        let a = render_final_markdown(&plan, ReviewPolicy::Execution);
        let b = render_final_markdown(&plan, ReviewPolicy::Execution);
        assert_eq!(a, b);
    }

    #[test]
    fn review_summary_counts() {
        let plan = reviewed_plan();
        let summary = review_summary(&plan, ReviewPolicy::Execution);
        assert_eq!(summary.total_steps, 3);
        assert_eq!(summary.approved_steps, 1);
        assert_eq!(summary.skipped_steps, 1);
    }

    #[test]
    fn agent_context_includes_counts_and_phases() {
        let plan = reviewed_plan();
        let ctx = agent_plan_context(&plan, ReviewPolicy::Execution);
        assert_eq!(ctx["title"], "Demo");
        assert_eq!(ctx["totalSteps"], 3);
        assert_eq!(ctx["approvedCount"], 1);
        assert_eq!(ctx["skippedCount"], 1);
        assert_eq!(ctx["phases"].as_array().unwrap().len(), 2);
    }
}
