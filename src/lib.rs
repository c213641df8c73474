//! mco-provision - client connection and credential provisioning
//!
//! Resolves layered settings for the system and each declared identity,
//! provisions sshkey material, and converges configuration files through a
//! per-scope resource graph.

pub mod collab;
pub mod config;
pub mod credentials;
pub mod identity;
pub mod plan;
pub mod reconcile;
pub mod simulated;
pub mod validation;

pub use config::{ConfigurationStore, JsonConfigStore, ResolvedSettings, StaticConfigStore};
pub use credentials::{CredentialMaterial, CredentialProvisioner, ProvisionError};
pub use identity::Identity;
pub use plan::{Applier, ApplyReport, Collaborators, Outcome, PlanError, ResourceGraph};
pub use reconcile::{Reconciler, Role, RunError, RunOptions, RunReport};
pub use validation::ValidationError;
