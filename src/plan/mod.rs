//! Resource graphs
//!
//! Provisioning work is expressed as typed actions in a per-scope DAG and
//! applied in a stable topological order. Publish/realize actions go
//! through a shared artifact catalog.

pub mod action;
pub mod apply;
pub mod catalog;
pub mod graph;

pub use action::{Action, ActionId, ActionKind, ActionRole};
pub use apply::{
    ActionFailure, ActionReport, Applier, ApplyReport, Collaborators, FailureKind, Outcome,
    RealizePolicy,
};
pub use catalog::{Artifact, ArtifactCatalog, DirectoryCatalog, SERVER_CERT_ARTIFACT};
pub use graph::ResourceGraph;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlanError {
    #[error("Action {0} added twice")]
    DuplicateAction(String),

    #[error("Unknown dependency: {0}")]
    UnknownDependency(String),

    #[error("Dependency cycle between: {}", .0.join(", "))]
    Cycle(Vec<String>),
}
