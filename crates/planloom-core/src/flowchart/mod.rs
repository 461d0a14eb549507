//! Deterministic flowchart layout for a plan tree.
//!
//! Pure geometry: consumes the plan, produces node positions and edges, and
//! never mutates anything. Calling any function twice on an unchanged plan
//! yields identical output, which is what keeps canvas re-renders stable.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use crate::plan::model::{PhaseStatus, Plan, StepStatus};

/// Id of the synthetic node preceding the first phase.
pub const START_NODE_ID: &str = "start";
/// Id of the synthetic node following the last phase.
pub const END_NODE_ID: &str = "end";

/// Spacing constants for the layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutConfig {
    pub node_width: f64,
    pub node_height: f64,
    pub horizontal_spacing: f64,
    pub vertical_spacing: f64,
    pub phase_spacing: f64,
    pub step_spacing: f64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            node_width: 280.0,
            node_height: 120.0,
            horizontal_spacing: 100.0,
            vertical_spacing: 80.0,
            phase_spacing: 120.0,
            step_spacing: 60.0,
        }
    }
}

/// X coordinate of the phase progression column.
const CENTER_X: f64 = 400.0;
/// Y coordinate of the start node.
const TOP_Y: f64 = 100.0;

/// A node position in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Edge kinds: flow edges follow the phase/step sequence; dependency edges
/// visualize advisory phase dependencies and render differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Flow,
    Dependency,
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    pub kind: EdgeKind,
    pub animated: bool,
}

/// A node in the flowchart projection of a plan.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum FlowNode {
    Start,
    Phase {
        id: Uuid,
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        status: PhaseStatus,
        #[serde(rename = "stepIds")]
        step_ids: Vec<Uuid>,
        expanded: bool,
    },
    Step {
        id: Uuid,
        label: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        status: StepStatus,
        files: Vec<String>,
    },
    End {
        completed: bool,
    },
}

/// Bounding box of a laid-out flowchart, for viewport fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Assign a position to every node.
///
/// Phases advance down a fixed center column; each phase's steps are laid
/// out in a row below it, centered around the column so step fans stay
/// symmetric. Keys are `start`, `end`, and the phase/step uuids rendered as
/// strings.
pub fn calculate_node_positions(plan: &Plan, config: &LayoutConfig) -> HashMap<String, Position> {
    let mut positions = HashMap::new();
    let mut current_y = TOP_Y;

    positions.insert(
        START_NODE_ID.to_owned(),
        Position {
            x: CENTER_X,
            y: current_y,
        },
    );
    current_y += config.node_height + config.phase_spacing;

    for phase in &plan.phases {
        positions.insert(
            phase.id.to_string(),
            Position {
                x: CENTER_X,
                y: current_y,
            },
        );
        current_y += config.node_height + config.vertical_spacing;

        let step_count = phase.steps.len();
        if step_count > 0 {
            let total_width = step_count as f64 * config.node_width
                + (step_count as f64 - 1.0) * config.horizontal_spacing;
            let start_x = CENTER_X - total_width / 2.0 + config.node_width / 2.0;
            for (idx, step) in phase.steps.iter().enumerate() {
                let x = start_x + idx as f64 * (config.node_width + config.horizontal_spacing);
                positions.insert(step.id.to_string(), Position { x, y: current_y });
            }
            current_y += config.node_height + config.phase_spacing;
        }
    }

    positions.insert(
        END_NODE_ID.to_owned(),
        Position {
            x: CENTER_X,
            y: current_y,
        },
    );

    positions
}

/// Generate the edge list: `start -> first phase`, consecutive phases,
/// each phase to its steps, `last phase -> end`, plus one dependency edge
/// per declared phase dependency.
pub fn generate_edges(plan: &Plan) -> Vec<FlowEdge> {
    let mut edges = Vec::new();

    if let Some(first) = plan.phases.first() {
        edges.push(FlowEdge {
            id: format!("edge-start-{}", first.id),
            source: START_NODE_ID.to_owned(),
            target: first.id.to_string(),
            kind: EdgeKind::Flow,
            animated: false,
        });
    }

    for (idx, phase) in plan.phases.iter().enumerate() {
        for step in &phase.steps {
            edges.push(FlowEdge {
                id: format!("edge-{}-{}", phase.id, step.id),
                source: phase.id.to_string(),
                target: step.id.to_string(),
                kind: EdgeKind::Flow,
                animated: false,
            });
        }

        if let Some(next) = plan.phases.get(idx + 1) {
            edges.push(FlowEdge {
                id: format!("edge-{}-{}", phase.id, next.id),
                source: phase.id.to_string(),
                target: next.id.to_string(),
                kind: EdgeKind::Flow,
                animated: phase.status == PhaseStatus::InProgress,
            });
        }

        for dep in &phase.dependencies {
            edges.push(FlowEdge {
                id: format!("edge-dep-{}-{}", dep, phase.id),
                source: dep.to_string(),
                target: phase.id.to_string(),
                kind: EdgeKind::Dependency,
                animated: false,
            });
        }
    }

    if let Some(last) = plan.phases.last() {
        edges.push(FlowEdge {
            id: format!("edge-{}-end", last.id),
            source: last.id.to_string(),
            target: END_NODE_ID.to_owned(),
            kind: EdgeKind::Flow,
            animated: false,
        });
    }

    edges
}

/// Project the plan tree into flowchart nodes, bracketed by the synthetic
/// start and end nodes.
pub fn plan_to_nodes(plan: &Plan) -> Vec<FlowNode> {
    let mut nodes = Vec::with_capacity(plan.total_steps() + plan.phases.len() + 2);

    nodes.push(FlowNode::Start);

    for phase in &plan.phases {
        nodes.push(FlowNode::Phase {
            id: phase.id,
            label: phase.label.clone(),
            description: phase.description.clone(),
            status: phase.status,
            step_ids: phase.steps.iter().map(|s| s.id).collect(),
            expanded: phase.expanded,
        });
        for step in &phase.steps {
            nodes.push(FlowNode::Step {
                id: step.id,
                label: step.label.clone(),
                description: step.description.clone(),
                status: step.status,
                files: step.files.clone(),
            });
        }
    }

    let completed = !plan.phases.is_empty()
        && plan
            .phases
            .iter()
            .all(|p| p.status == PhaseStatus::Completed);
    nodes.push(FlowNode::End { completed });

    nodes
}

/// Bounding box covering every positioned node at the configured node size.
pub fn bounding_box(positions: &HashMap<String, Position>, config: &LayoutConfig) -> BoundingBox {
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;

    for pos in positions.values() {
        min_x = min_x.min(pos.x - config.node_width / 2.0);
        min_y = min_y.min(pos.y - config.node_height / 2.0);
        max_x = max_x.max(pos.x + config.node_width / 2.0);
        max_y = max_y.max(pos.y + config.node_height / 2.0);
    }

    BoundingBox {
        min_x,
        min_y,
        max_x,
        max_y,
        width: max_x - min_x,
        height: max_y - min_y,
    }
}
