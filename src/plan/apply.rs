//! Graph application
//!
//! Walks a `ResourceGraph` in topological order and hands each action to
//! the matching collaborator. An action whose dependency did not settle
//! (failed, deferred or itself skipped) is skipped and never forced.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::action::{Action, ActionId, ActionKind, ActionRole};
use super::catalog::ArtifactCatalog;
use super::graph::ResourceGraph;
use super::PlanError;
use crate::collab::{
    Change, CollabError, CommandExecutor, CommandOutcome, CommandSpec, FileAttributes, FileWriter,
    Guard, PackageInstaller,
};

/// The side-effecting collaborators an applier drives.
#[derive(Clone)]
pub struct Collaborators {
    pub installer: Arc<dyn PackageInstaller>,
    pub writer: Arc<dyn FileWriter>,
    pub executor: Arc<dyn CommandExecutor>,
    pub catalog: Arc<dyn ArtifactCatalog>,
}

/// How long a realize waits for a publish before deferring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealizePolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RealizePolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Permission,
    Generation,
    Io,
    Package,
    Catalog,
    Render,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<CollabError> for ActionFailure {
    fn from(err: CollabError) -> Self {
        let kind = match &err {
            CollabError::PermissionDenied(_) | CollabError::UnknownPrincipal(_) => {
                FailureKind::Permission
            }
            CollabError::CommandSpawn(_) | CollabError::CommandFailed { .. } => {
                FailureKind::Generation
            }
            CollabError::IoError(_) => FailureKind::Io,
            CollabError::PackageError(_) => FailureKind::Package,
            CollabError::CatalogError(_) => FailureKind::Catalog,
            CollabError::RenderError(_) => FailureKind::Render,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Noop run: the action would be applied.
    Planned,
    Changed,
    Unchanged,
    /// Waiting on something outside this run (an unpublished artifact).
    Deferred(String),
    Failed(ActionFailure),
    Skipped { blocked_by: ActionId },
}

impl Outcome {
    fn from_change(change: Change) -> Self {
        if change.is_mutation() {
            Self::Changed
        } else {
            Self::Unchanged
        }
    }

    /// Dependents may proceed.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Changed | Self::Unchanged | Self::Planned)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionReport {
    pub id: ActionId,
    pub role: ActionRole,
    pub description: String,
    pub target: Option<PathBuf>,
    pub outcome: Outcome,
}

/// Per-action results for one graph, in application order.
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyReport {
    pub scope: String,
    pub actions: Vec<ActionReport>,
}

impl ApplyReport {
    pub fn changed(&self) -> impl Iterator<Item = &ActionReport> {
        self.actions.iter().filter(|a| a.outcome == Outcome::Changed)
    }

    pub fn change_count(&self) -> usize {
        self.changed().count()
    }

    pub fn failures(&self) -> Vec<&ActionReport> {
        self.actions
            .iter()
            .filter(|a| matches!(a.outcome, Outcome::Failed(_)))
            .collect()
    }

    pub fn deferred(&self) -> Vec<&ActionReport> {
        self.actions
            .iter()
            .filter(|a| matches!(a.outcome, Outcome::Deferred(_)))
            .collect()
    }

    pub fn is_converged(&self) -> bool {
        self.actions
            .iter()
            .all(|a| matches!(a.outcome, Outcome::Changed | Outcome::Unchanged))
    }

    pub fn outcome(&self, role: ActionRole) -> Option<&Outcome> {
        self.actions.iter().find(|a| a.role == role).map(|a| &a.outcome)
    }
}

pub struct Applier {
    collab: Collaborators,
    realize: RealizePolicy,
}

impl Applier {
    pub fn new(collab: Collaborators, realize: RealizePolicy) -> Self {
        Self { collab, realize }
    }

    /// Report what `apply` would do without touching anything.
    pub fn preview(&self, graph: &ResourceGraph) -> Result<ApplyReport, PlanError> {
        let actions = graph
            .topological_order()?
            .into_iter()
            .map(|action| report(action, Outcome::Planned))
            .collect();
        Ok(ApplyReport {
            scope: graph.scope().to_string(),
            actions,
        })
    }

    pub async fn apply(&self, graph: &ResourceGraph) -> Result<ApplyReport, PlanError> {
        let order = graph.topological_order()?;
        let mut outcomes: HashMap<&ActionId, Outcome> = HashMap::new();
        let mut reports = Vec::with_capacity(order.len());

        for action in order {
            let blocker = graph.dependencies(&action.id).into_iter().find_map(|dep| {
                match outcomes.get(dep) {
                    Some(Outcome::Skipped { blocked_by }) => Some(blocked_by.clone()),
                    Some(outcome) if outcome.is_settled() => None,
                    _ => Some(dep.clone()),
                }
            });

            let outcome = match blocker {
                Some(blocked_by) => {
                    log::warn!(
                        "{}: skipping {} (blocked by {})",
                        graph.scope(),
                        action.describe(),
                        blocked_by
                    );
                    Outcome::Skipped { blocked_by }
                }
                None => {
                    let outcome = self.apply_action(action).await;
                    log_outcome(graph.scope(), action, &outcome);
                    outcome
                }
            };

            reports.push(report(action, outcome.clone()));
            outcomes.insert(&action.id, outcome);
        }

        Ok(ApplyReport {
            scope: graph.scope().to_string(),
            actions: reports,
        })
    }

    async fn apply_action(&self, action: &Action) -> Outcome {
        let result = match &action.kind {
            ActionKind::Package { name, version } => self
                .collab
                .installer
                .ensure(name, version)
                .await
                .map(Outcome::from_change),
            ActionKind::Directory { path, attrs } => self
                .collab
                .writer
                .ensure_directory(path, attrs)
                .await
                .map(Outcome::from_change),
            ActionKind::File {
                path,
                attrs,
                content,
            } => self
                .collab
                .writer
                .write(path, attrs, content.expose().as_bytes())
                .await
                .map(Outcome::from_change),
            ActionKind::Command {
                command,
                creates,
                attrs,
                refresh,
            } => self.run_command(command, creates, attrs, *refresh).await,
            ActionKind::Publish { artifact, source } => self.publish(artifact, source).await,
            ActionKind::Realize {
                artifact,
                path,
                attrs,
            } => self.realize(artifact, path, attrs).await,
        };

        result.unwrap_or_else(|e| Outcome::Failed(ActionFailure::from(e)))
    }

    async fn run_command(
        &self,
        command: &CommandSpec,
        creates: &Path,
        attrs: &FileAttributes,
        refresh: bool,
    ) -> Result<Outcome, CollabError> {
        let removed = if refresh {
            self.collab.writer.remove(creates).await?
        } else {
            Change::Unchanged
        };

        let ran = self
            .collab
            .executor
            .run(command, &Guard::Creates(creates.to_path_buf()))
            .await?;

        // Exit status alone is not proof of completion.
        if !tokio::fs::try_exists(creates).await.unwrap_or(false) {
            return Ok(Outcome::Failed(ActionFailure {
                kind: FailureKind::Generation,
                message: format!(
                    "`{}` finished without creating {}",
                    command,
                    creates.display()
                ),
            }));
        }

        let produced = match ran {
            CommandOutcome::Ran => Change::Created,
            CommandOutcome::Skipped => Change::Unchanged,
        };
        let fixed = self.collab.writer.ensure_attributes(creates, attrs).await?;
        Ok(Outcome::from_change(removed.and(produced).and(fixed)))
    }

    async fn publish(&self, artifact: &str, source: &Path) -> Result<Outcome, CollabError> {
        let content = tokio::fs::read_to_string(source)
            .await
            .map_err(|e| CollabError::from_io(source, e))?;
        self.collab
            .catalog
            .publish(artifact, &content)
            .await
            .map(Outcome::from_change)
    }

    async fn realize(
        &self,
        artifact: &str,
        path: &Path,
        attrs: &FileAttributes,
    ) -> Result<Outcome, CollabError> {
        let attempts = self.realize.attempts.max(1);
        for attempt in 1..=attempts {
            if let Some(found) = self.collab.catalog.fetch(artifact).await? {
                return self
                    .collab
                    .writer
                    .write(path, attrs, found.content.as_bytes())
                    .await
                    .map(Outcome::from_change);
            }
            if attempt < attempts {
                log::debug!(
                    "{} not published yet (attempt {}/{}), retrying in {:?}",
                    artifact,
                    attempt,
                    attempts,
                    self.realize.interval
                );
                tokio::time::sleep(self.realize.interval).await;
            }
        }
        Ok(Outcome::Deferred(format!("{} has not been published", artifact)))
    }
}

fn report(action: &Action, outcome: Outcome) -> ActionReport {
    ActionReport {
        id: action.id.clone(),
        role: action.role,
        description: action.describe(),
        target: action.target().map(Path::to_path_buf),
        outcome,
    }
}

fn log_outcome(scope: &str, action: &Action, outcome: &Outcome) {
    match outcome {
        Outcome::Changed => log::info!("{}: {} changed", scope, action.describe()),
        Outcome::Unchanged | Outcome::Planned => {
            log::debug!("{}: {} unchanged", scope, action.describe())
        }
        Outcome::Deferred(reason) => {
            log::warn!("{}: {} deferred: {}", scope, action.describe(), reason)
        }
        Outcome::Failed(failure) => {
            log::error!("{}: {} failed: {}", scope, action.describe(), failure.message)
        }
        Outcome::Skipped { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::LocalFileWriter;
    use crate::config::VersionSpec;
    use crate::simulated::{MemoryCatalog, SimulatedCommandExecutor, SimulatedPackageInstaller};

    fn applier(executor: Arc<SimulatedCommandExecutor>, catalog: Arc<MemoryCatalog>) -> Applier {
        Applier::new(
            Collaborators {
                installer: Arc::new(SimulatedPackageInstaller::new()),
                writer: Arc::new(LocalFileWriter::new()),
                executor,
                catalog,
            },
            RealizePolicy {
                attempts: 2,
                interval: Duration::from_millis(1),
            },
        )
    }

    fn keygen(scope: &str, creates: PathBuf) -> Action {
        Action::new(
            scope,
            ActionRole::PrivateKeyFile,
            ActionKind::Command {
                command: CommandSpec::new("openssl", ["genrsa", "-out", "key.pem"]),
                creates,
                attrs: FileAttributes::mode_only(0o600),
                refresh: false,
            },
        )
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependents() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(SimulatedCommandExecutor::new());
        executor.fail_when("genrsa").await;
        let applier = applier(executor, Arc::new(MemoryCatalog::new()));

        let mut graph = ResourceGraph::new("jill");
        let key = graph.add(keygen("jill", dir.path().join("key.pem")), &[]).unwrap();
        graph
            .add(
                Action::new(
                    "jill",
                    ActionRole::IdentityConfigWrite,
                    ActionKind::File {
                        path: dir.path().join(".mcollective"),
                        attrs: FileAttributes::mode_only(0o600),
                        content: "x = 1\n".into(),
                    },
                ),
                &[key.clone()],
            )
            .unwrap();

        let report = applier.apply(&graph).await.unwrap();
        assert!(matches!(
            report.outcome(ActionRole::PrivateKeyFile),
            Some(Outcome::Failed(ActionFailure { kind: FailureKind::Generation, .. }))
        ));
        assert_eq!(
            report.outcome(ActionRole::IdentityConfigWrite),
            Some(&Outcome::Skipped { blocked_by: key })
        );
        assert!(!dir.path().join(".mcollective").exists());
    }

    #[tokio::test]
    async fn test_command_must_produce_its_file() {
        let dir = tempfile::tempdir().unwrap();
        let executor = Arc::new(SimulatedCommandExecutor::new());
        executor.produce_nothing().await;
        let applier = applier(executor, Arc::new(MemoryCatalog::new()));

        let mut graph = ResourceGraph::new("jill");
        graph.add(keygen("jill", dir.path().join("key.pem")), &[]).unwrap();

        let report = applier.apply(&graph).await.unwrap();
        assert!(matches!(
            report.outcome(ActionRole::PrivateKeyFile),
            Some(Outcome::Failed(ActionFailure { kind: FailureKind::Generation, .. }))
        ));
    }

    #[tokio::test]
    async fn test_refresh_replaces_stale_output() {
        let dir = tempfile::tempdir().unwrap();
        let creates = dir.path().join("key.pem");
        std::fs::write(&creates, "STALE").unwrap();
        let executor = Arc::new(SimulatedCommandExecutor::new());
        let applier = applier(executor.clone(), Arc::new(MemoryCatalog::new()));

        let mut action = keygen("jill", creates.clone());
        if let ActionKind::Command { refresh, .. } = &mut action.kind {
            *refresh = true;
        }
        let mut graph = ResourceGraph::new("jill");
        graph.add(action, &[]).unwrap();

        let report = applier.apply(&graph).await.unwrap();
        assert_eq!(report.outcome(ActionRole::PrivateKeyFile), Some(&Outcome::Changed));
        assert_ne!(std::fs::read_to_string(&creates).unwrap(), "STALE");
        assert_eq!(executor.invocations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_realize_defers_until_published() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Arc::new(MemoryCatalog::new());
        let applier = applier(Arc::new(SimulatedCommandExecutor::new()), catalog.clone());

        let mut graph = ResourceGraph::new("system");
        let target = dir.path().join("server_public.pem");
        graph
            .add(
                Action::new(
                    "system",
                    ActionRole::Realize,
                    ActionKind::Realize {
                        artifact: "cert".to_string(),
                        path: target.clone(),
                        attrs: FileAttributes::mode_only(0o644),
                    },
                ),
                &[],
            )
            .unwrap();

        let report = applier.apply(&graph).await.unwrap();
        assert!(matches!(report.outcome(ActionRole::Realize), Some(Outcome::Deferred(_))));
        assert!(report.failures().is_empty());
        assert!(!target.exists());

        catalog.publish("cert", "CERT").await.unwrap();
        let report = applier.apply(&graph).await.unwrap();
        assert_eq!(report.outcome(ActionRole::Realize), Some(&Outcome::Changed));
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "CERT");

        let report = applier.apply(&graph).await.unwrap();
        assert_eq!(report.outcome(ActionRole::Realize), Some(&Outcome::Unchanged));
    }

    #[tokio::test]
    async fn test_preview_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let installer = Arc::new(SimulatedPackageInstaller::new());
        let applier = Applier::new(
            Collaborators {
                installer: installer.clone(),
                writer: Arc::new(LocalFileWriter::new()),
                executor: Arc::new(SimulatedCommandExecutor::new()),
                catalog: Arc::new(MemoryCatalog::new()),
            },
            RealizePolicy::default(),
        );

        let mut graph = ResourceGraph::new("system");
        graph
            .add(
                Action::new(
                    "system",
                    ActionRole::PackageInstall,
                    ActionKind::Package {
                        name: "mcollective-client".to_string(),
                        version: VersionSpec::Present,
                    },
                ),
                &[],
            )
            .unwrap();
        graph
            .add(keygen("system", dir.path().join("key.pem")), &[])
            .unwrap();

        let report = applier.preview(&graph).unwrap();
        assert!(report.actions.iter().all(|a| a.outcome == Outcome::Planned));
        assert!(installer.installed("mcollective-client").await.is_none());
        assert!(!dir.path().join("key.pem").exists());
    }
}
