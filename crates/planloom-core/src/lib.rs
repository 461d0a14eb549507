//! Core library for planloom: plan model, grammar parser, review state
//! machine, artifact cache, markdown finalizer, flowchart layout, and the
//! planner service that wires them to a hosted language model.
//!
//! The library holds no persistent state: a [`store::PlanStore`] owns the
//! plan collection for the lifetime of the process that created it.

pub mod ai;
pub mod events;
pub mod flowchart;
pub mod plan;
pub mod service;
pub mod store;

pub use events::ChatEvent;
pub use plan::{Plan, PlanParseError, ReviewPolicy, parse_plan_text};
pub use service::PlannerService;
pub use store::{ArtifactCache, PlanStore, StoreError};
