use chrono::{DateTime, Utc};
use std::path::PathBuf;
use uuid::Uuid;

use super::Role;
use crate::credentials::CredentialMaterial;
use crate::plan::{ApplyReport, Outcome};
use crate::validation::ValidationError;

#[derive(Debug, Clone, PartialEq)]
pub enum IdentityStatus {
    /// Every action changed or already matched.
    Converged,
    /// Waiting on an unpublished artifact; a later run will finish it.
    Pending,
    Failed(String),
    /// Rejected before anything was planned.
    Invalid(ValidationError),
    /// Same config path as an identity that sorts earlier.
    Conflict { with: String },
    /// Noop run.
    Planned,
}

impl IdentityStatus {
    pub(crate) fn from_apply(report: &ApplyReport, noop: bool) -> Self {
        if noop {
            return Self::Planned;
        }
        if let Some(failed) = report.failures().first() {
            if let Outcome::Failed(failure) = &failed.outcome {
                return Self::Failed(format!("{}: {}", failed.description, failure.message));
            }
        }
        if report.is_converged() {
            Self::Converged
        } else {
            Self::Pending
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::Invalid(_) | Self::Conflict { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IdentityReport {
    pub name: String,
    pub config_path: Option<PathBuf>,
    pub status: IdentityStatus,
    pub apply: Option<ApplyReport>,
    pub material: Option<CredentialMaterial>,
}

impl IdentityReport {
    pub(crate) fn rejected(name: &str, status: IdentityStatus) -> Self {
        Self {
            name: name.to_string(),
            config_path: None,
            status,
            apply: None,
            material: None,
        }
    }

    pub fn change_count(&self) -> usize {
        self.apply.as_ref().map_or(0, ApplyReport::change_count)
    }
}

/// Everything one convergence pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,
    pub role: Role,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub system: ApplyReport,
    pub identities: Vec<IdentityReport>,
}

impl RunReport {
    /// Mutations across the system and every identity. Zero on a
    /// converged re-run.
    pub fn change_count(&self) -> usize {
        self.system.change_count()
            + self
                .identities
                .iter()
                .map(IdentityReport::change_count)
                .sum::<usize>()
    }

    pub fn identity(&self, name: &str) -> Option<&IdentityReport> {
        self.identities.iter().find(|i| i.name == name)
    }

    /// No failures anywhere. Pending identities do not count as failures.
    pub fn is_success(&self) -> bool {
        self.system.failures().is_empty()
            && !self.identities.iter().any(|i| i.status.is_failure())
    }

    pub fn summary(&self) -> String {
        let count = |f: fn(&IdentityStatus) -> bool| {
            self.identities.iter().filter(|i| f(&i.status)).count()
        };
        format!(
            "{} changes; {} converged, {} pending, {} failed, {} planned",
            self.change_count(),
            count(|s| *s == IdentityStatus::Converged),
            count(|s| *s == IdentityStatus::Pending),
            count(IdentityStatus::is_failure),
            count(|s| *s == IdentityStatus::Planned),
        )
    }
}
