//! The flattened Test Plan handed to listeners and printed by `discover`.

pub mod emit;
pub mod types;

pub use types::{ExecutionMode, NodeKind, PlanError, TestIdentifier, TestPlan};
