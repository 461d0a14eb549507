use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

/// Status of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanStatus {
    Draft,
    Active,
    Finalized,
    Completed,
    Failed,
    Paused,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Finalized => "finalized",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Paused => "paused",
        };
        f.write_str(s)
    }
}

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "active" => Ok(Self::Active),
            "finalized" => Ok(Self::Finalized),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "paused" => Ok(Self::Paused),
            other => Err(PlanStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PlanStatus`] string.
#[derive(Debug, Clone)]
pub struct PlanStatusParseError(pub String);

impl fmt::Display for PlanStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid plan status: {:?}", self.0)
    }
}

impl std::error::Error for PlanStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a phase. Always derived from its steps, never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for PhaseStatus {
    type Err = PhaseStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(PhaseStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`PhaseStatus`] string.
#[derive(Debug, Clone)]
pub struct PhaseStatusParseError(pub String);

impl fmt::Display for PhaseStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid phase status: {:?}", self.0)
    }
}

impl std::error::Error for PhaseStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Approved,
    Completed,
    Failed,
    Skipped,
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Approved => "approved",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

impl FromStr for StepStatus {
    type Err = StepStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in-progress" => Ok(Self::InProgress),
            "approved" => Ok(Self::Approved),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(StepStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StepStatus`] string.
#[derive(Debug, Clone)]
pub struct StepStatusParseError(pub String);

impl fmt::Display for StepStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step status: {:?}", self.0)
    }
}

impl std::error::Error for StepStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of work a step performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Code,
    File,
    Command,
    Review,
    Test,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Code => "code",
            Self::File => "file",
            Self::Command => "command",
            Self::Review => "review",
            Self::Test => "test",
        };
        f.write_str(s)
    }
}

impl FromStr for StepType {
    type Err = StepTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "code" => Ok(Self::Code),
            "file" => Ok(Self::File),
            "command" => Ok(Self::Command),
            "review" => Ok(Self::Review),
            "test" => Ok(Self::Test),
            other => Err(StepTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`StepType`] string.
#[derive(Debug, Clone)]
pub struct StepTypeParseError(pub String);

impl fmt::Display for StepTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid step type: {:?}", self.0)
    }
}

impl std::error::Error for StepTypeParseError {}

// ---------------------------------------------------------------------------

/// Kind of file mutation a code change describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

impl FromStr for ChangeType {
    type Err = ChangeTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "modify" => Ok(Self::Modify),
            "delete" => Ok(Self::Delete),
            other => Err(ChangeTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`ChangeType`] string.
#[derive(Debug, Clone)]
pub struct ChangeTypeParseError(pub String);

impl fmt::Display for ChangeTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid change type: {:?}", self.0)
    }
}

impl std::error::Error for ChangeTypeParseError {}

// ---------------------------------------------------------------------------
// Review policy
// ---------------------------------------------------------------------------

/// Which step statuses count as "reviewed" for progress and finalization.
///
/// A store is constructed with one policy and applies it uniformly to
/// progress, finalize gating, the accepted-subset projection, and the
/// markdown finalizer. The two policies are structurally identical state
/// machines that differ only in their terminal-acceptance set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReviewPolicy {
    /// Execution tracking: `{completed, skipped}` are accepted.
    #[default]
    Execution,
    /// Approval-gated review: `{approved, skipped}` are accepted.
    Approval,
}

impl ReviewPolicy {
    /// Whether a step with this status counts as reviewed.
    pub fn accepts(self, status: StepStatus) -> bool {
        match self {
            Self::Execution => matches!(status, StepStatus::Completed | StepStatus::Skipped),
            Self::Approval => matches!(status, StepStatus::Approved | StepStatus::Skipped),
        }
    }
}

// ---------------------------------------------------------------------------
// Tree structs
// ---------------------------------------------------------------------------

/// A plan -- the top-level structured output of turning a user request into
/// actionable work.
///
/// `progress` and `status` are derived from the steps the plan contains and
/// are recomputed by the store after every step mutation; callers never set
/// them directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: PlanStatus,
    /// Share of reviewed steps, 0-100.
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub phases: Vec<PlanPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PlanMetadata>,
}

impl Plan {
    /// Iterate all steps in stable phase-then-step order.
    pub fn steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.phases.iter().flat_map(|p| p.steps.iter())
    }

    /// Total number of steps across all phases.
    pub fn total_steps(&self) -> usize {
        self.phases.iter().map(|p| p.steps.len()).sum()
    }
}

/// Aggregate plan metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub files_affected: Vec<String>,
}

/// A phase -- a named stage of a plan, composed of ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanPhase {
    pub id: Uuid,
    pub plan_id: Uuid,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: PhaseStatus,
    /// Dense position in creation order, 0-based.
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    pub steps: Vec<PlanStep>,
    /// Phases that should be completed before this one starts. Advisory
    /// only; not enforced by the state machine.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Uuid>,
    /// Display flag; no effect on status or progress.
    #[serde(default)]
    pub expanded: bool,
}

/// A step -- a single actionable unit within a phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStep {
    pub id: Uuid,
    pub phase_id: Uuid,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub status: StepStatus,
    pub order: u32,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_changes: Vec<CodeChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<String>,
    /// Set only on transition into `completed` or `approved`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Set only on transition into `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Display flag; no effect on status or progress.
    #[serde(default)]
    pub expanded: bool,
}

/// A concrete file mutation attached to a step.
///
/// `applied` flips to true exactly once when an external collaborator writes
/// the change into the workspace; this library never performs that I/O.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChange {
    pub id: Uuid,
    pub step_id: Uuid,
    pub file: String,
    pub language: String,
    pub change_type: ChangeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_status_display_roundtrip() {
        let variants = [
            PlanStatus::Draft,
            PlanStatus::Active,
            PlanStatus::Finalized,
            PlanStatus::Completed,
            PlanStatus::Failed,
            PlanStatus::Paused,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: PlanStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn plan_status_invalid() {
        let result = "bogus".parse::<PlanStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn phase_status_display_roundtrip() {
        let variants = [
            PhaseStatus::Pending,
            PhaseStatus::InProgress,
            PhaseStatus::Completed,
            PhaseStatus::Failed,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: PhaseStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn step_status_display_roundtrip() {
        let variants = [
            StepStatus::Pending,
            StepStatus::InProgress,
            StepStatus::Approved,
            StepStatus::Completed,
            StepStatus::Failed,
            StepStatus::Skipped,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: StepStatus = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn step_status_serializes_kebab_case() {
        let json = serde_json::to_string(&StepStatus::InProgress).unwrap();
        assert_eq!(json, "\"in-progress\"");
        let back: StepStatus = serde_json::from_str("\"in-progress\"").unwrap();
        assert_eq!(back, StepStatus::InProgress);
    }

    #[test]
    fn step_status_invalid() {
        let result = "done".parse::<StepStatus>();
        assert!(result.is_err());
    }

    #[test]
    fn step_type_display_roundtrip() {
        let variants = [
            StepType::Code,
            StepType::File,
            StepType::Command,
            StepType::Review,
            StepType::Test,
        ];
        for v in &variants {
            let s = v.to_string();
            let parsed: StepType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn change_type_display_roundtrip() {
        let variants = [ChangeType::Create, ChangeType::Modify, ChangeType::Delete];
        for v in &variants {
            let s = v.to_string();
            let parsed: ChangeType = s.parse().expect("should parse");
            assert_eq!(*v, parsed);
        }
    }

    #[test]
    fn execution_policy_accepts_completed_and_skipped() {
        let p = ReviewPolicy::Execution;
        assert!(p.accepts(StepStatus::Completed));
        assert!(p.accepts(StepStatus::Skipped));
        assert!(!p.accepts(StepStatus::Approved));
        assert!(!p.accepts(StepStatus::Pending));
        assert!(!p.accepts(StepStatus::Failed));
    }

    #[test]
    fn approval_policy_accepts_approved_and_skipped() {
        let p = ReviewPolicy::Approval;
        assert!(p.accepts(StepStatus::Approved));
        assert!(p.accepts(StepStatus::Skipped));
        assert!(!p.accepts(StepStatus::Completed));
        assert!(!p.accepts(StepStatus::InProgress));
    }

    #[test]
    fn step_serializes_type_field() {
        let step = PlanStep {
            id: Uuid::nil(),
            phase_id: Uuid::nil(),
            label: "Install deps".to_owned(),
            description: None,
            status: StepStatus::Pending,
            order: 0,
            step_type: StepType::Command,
            files: vec![],
            code_changes: vec![],
            command: Some("npm install".to_owned()),
            estimated_time: None,
            completed_at: None,
            error: None,
            expanded: false,
        };
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["type"], "command");
        assert_eq!(json["phaseId"], Uuid::nil().to_string());
        assert!(
            json.get("completedAt").is_none(),
            "unset optionals should be omitted"
        );
    }
}
