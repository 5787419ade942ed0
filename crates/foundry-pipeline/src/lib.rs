//! The Foundry pipeline: project workspace, task catalog, the Planning,
//! Development and Testing phases, and the driver that runs them in order.

pub mod catalog;
pub mod driver;
pub mod phase;
pub mod phases;
pub mod workspace;

pub use catalog::{Agents, TaskCatalog, DEFAULT_MODEL_SPEC, DEVELOPER_ROLE, PRODUCT_OWNER_ROLE};
pub use driver::{read_specs, Pipeline, PhaseName};
pub use phase::{Phase, PhaseBehavior, PhaseState};
pub use phases::{
    normalize_code, segments_reassemble, DevelopmentPhase, PhaseContext, PlanningPhase,
    TestingPhase,
};
pub use workspace::{ProjectConfig, Workspace};
