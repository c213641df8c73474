//! Convergence runs
//!
//! One run validates the declaration and resolves settings for the system
//! and for each identity before anything is applied. It then builds a
//! resource graph per scope and applies them. The system graph goes first;
//! identity graphs are independent of each other and are applied
//! concurrently.

mod report;

pub use report::{IdentityReport, IdentityStatus, RunReport};

use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::collab::{CollabError, FileAttributes, TemplateRenderer};
use crate::config::{resolve, ConfigurationStore, ResolvedSettings, SecurityProvider, SettingsLayer};
use crate::credentials::{CredentialMaterial, CredentialProvisioner, KeyLayout, KeyTool, ProvisionError};
use crate::identity::Identity;
use crate::plan::{
    Action, ActionId, ActionKind, ActionReport, ActionRole, Applier, ApplyReport, Collaborators,
    Outcome, PlanError, RealizePolicy, ResourceGraph, SERVER_CERT_ARTIFACT,
};
use crate::validation::{validate_global, validate_identity, Scope, ValidationError};

pub const SYSTEM_SCOPE: &str = "system";

const SYSTEM_OWNER: &str = "root";
const SYSTEM_CONFIG_MODE: u32 = 0o640;
const SSL_DIR_MODE: u32 = 0o755;
const CERT_MODE: u32 = 0o644;
const IDENTITY_CONFIG_MODE: u32 = 0o600;
const KEY_MODE: u32 = 0o600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    #[default]
    Client,
    /// Publishes the TLS server certificate instead of realizing it.
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub role: Role,
    /// Service tier to apply. Defaults to the role name.
    pub service_class: Option<String>,
    /// Build and report the plan without applying it.
    pub noop: bool,
    pub manage_package: bool,
    pub manage_system_config: bool,
    pub realize_attempts: u32,
    pub realize_interval: Duration,
    pub key_tool: KeyTool,
}

impl Default for RunOptions {
    fn default() -> Self {
        let realize = RealizePolicy::default();
        Self {
            role: Role::Client,
            service_class: None,
            noop: false,
            manage_package: true,
            manage_system_config: true,
            realize_attempts: realize.attempts,
            realize_interval: realize.interval,
            key_tool: KeyTool::default(),
        }
    }
}

impl RunOptions {
    pub fn service_class(&self) -> &str {
        self.service_class.as_deref().unwrap_or(self.role.as_str())
    }
}

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    #[error("Render error: {0}")]
    Render(#[from] CollabError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),
}

/// Validation result for one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IdentityCheck {
    pub name: String,
    pub error: Option<ValidationError>,
}

/// Validate and resolve every tier without planning anything. A global
/// error is returned as `Err`; identity errors are listed per identity.
pub fn check_declaration(
    store: &dyn ConfigurationStore,
    service_class: &str,
) -> Result<Vec<IdentityCheck>, ValidationError> {
    validate_global(store.global(), store.services())?;
    let empty = SettingsLayer::default();
    let service = store.service(service_class).unwrap_or(&empty);
    resolve(store.global(), service, &empty, &Scope::Global)?;

    Ok(store
        .identities()
        .iter()
        .map(|(name, decl)| {
            let error = validate_identity(name, decl)
                .and_then(|_| {
                    resolve(store.global(), service, &decl.settings, &Scope::identity(name))
                })
                .err();
            IdentityCheck {
                name: name.clone(),
                error,
            }
        })
        .collect())
}

/// An identity that passed validation and has a graph to apply.
struct PlannedIdentity {
    identity: Identity,
    graph: ResourceGraph,
    material: Option<CredentialMaterial>,
    /// Blocked on the system-level realize.
    gated_by: Option<ActionId>,
}

/// What the identity graphs need to know about the system run.
struct SystemContext {
    /// Server certificate path realized by the system graph, with the id of
    /// the realize action if it did not settle.
    realized_cert: Option<(PathBuf, Option<ActionId>)>,
}

pub struct Reconciler {
    applier: Applier,
    renderer: Arc<dyn TemplateRenderer>,
    provisioner: CredentialProvisioner,
    options: RunOptions,
}

impl Reconciler {
    pub fn new(
        collab: Collaborators,
        renderer: Arc<dyn TemplateRenderer>,
        options: RunOptions,
    ) -> Self {
        let realize = RealizePolicy {
            attempts: options.realize_attempts,
            interval: options.realize_interval,
        };
        Self {
            applier: Applier::new(collab, realize),
            renderer,
            provisioner: CredentialProvisioner::new(options.key_tool.clone()),
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub async fn run(&self, store: &dyn ConfigurationStore) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        log::info!(
            "Run {} starting: role {}, {} identities{}",
            run_id,
            self.options.role,
            store.identities().len(),
            if self.options.noop { " (noop)" } else { "" }
        );

        if let Err(e) = validate_global(store.global(), store.services()) {
            log::error!("Run {} aborted: {}", run_id, e);
            return Err(e.into());
        }

        let empty = SettingsLayer::default();
        let service = store
            .service(self.options.service_class())
            .unwrap_or(&empty);
        let system_settings = resolve(store.global(), service, &empty, &Scope::Global)?;

        let mut identities = Vec::new();
        let mut accepted = Vec::new();
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();

        for (name, decl) in store.identities() {
            if let Err(e) = validate_identity(name, decl) {
                log::error!("{}: {}", name, e);
                identities.push(IdentityReport::rejected(name, IdentityStatus::Invalid(e)));
                continue;
            }

            let identity = Identity::from_declaration(name, decl);
            let settings = match resolve(
                store.global(),
                service,
                &identity.overrides,
                &Scope::identity(name),
            ) {
                Ok(settings) => settings,
                Err(e) => {
                    log::error!("{}: {}", name, e);
                    identities.push(IdentityReport::rejected(name, IdentityStatus::Invalid(e)));
                    continue;
                }
            };

            let config_path = identity.config_path();
            if let Some(owner) = claimed.get(&config_path) {
                log::error!(
                    "{}: {} is already managed for {}",
                    name,
                    config_path.display(),
                    owner
                );
                let mut report = IdentityReport::rejected(
                    name,
                    IdentityStatus::Conflict {
                        with: owner.clone(),
                    },
                );
                report.config_path = Some(config_path);
                identities.push(report);
                continue;
            }
            claimed.insert(config_path, name.clone());
            accepted.push((identity, settings));
        }

        let system_graph = self.system_graph(&system_settings)?;
        let system = self.execute(&system_graph).await?;
        let context = self.system_context(&system_settings, &system);

        let mut planned = Vec::new();
        for (identity, settings) in accepted {
            let name = identity.name.clone();
            match self.identity_graph(identity, settings, &context) {
                Ok(plan) => planned.push(plan),
                Err(e) => {
                    log::error!("{}: {}", name, e);
                    identities.push(IdentityReport::rejected(
                        &name,
                        IdentityStatus::Failed(e.to_string()),
                    ));
                }
            }
        }

        let applied = join_all(planned.iter().map(|plan| self.apply_identity(plan))).await;
        identities.extend(applied.into_iter().collect::<Result<Vec<_>, _>>()?);
        identities.sort_by(|a, b| a.name.cmp(&b.name));

        let report = RunReport {
            run_id,
            role: self.options.role,
            started_at,
            finished_at: Utc::now(),
            system,
            identities,
        };
        log::info!("Run {} finished: {}", run_id, report.summary());
        Ok(report)
    }

    async fn execute(&self, graph: &ResourceGraph) -> Result<ApplyReport, PlanError> {
        if self.options.noop {
            self.applier.preview(graph)
        } else {
            self.applier.apply(graph).await
        }
    }

    async fn apply_identity(&self, plan: &PlannedIdentity) -> Result<IdentityReport, PlanError> {
        let name = &plan.identity.name;
        let apply = match &plan.gated_by {
            Some(blocker) if !self.options.noop => {
                log::warn!("{}: waiting for {}", name, blocker);
                blocked(&plan.graph, blocker)?
            }
            _ => self.execute(&plan.graph).await?,
        };

        let status = IdentityStatus::from_apply(&apply, self.options.noop);
        let material = plan.material.clone().map(|mut m| {
            m.refresh();
            m
        });

        Ok(IdentityReport {
            name: name.clone(),
            config_path: Some(plan.identity.config_path()),
            status,
            apply: Some(apply),
            material,
        })
    }

    fn system_graph(&self, resolved: &ResolvedSettings) -> Result<ResourceGraph, RunError> {
        let scope = SYSTEM_SCOPE;
        let role = self.options.role;
        let mut settings = resolved.clone();
        let mut graph = ResourceGraph::new(scope);
        let attrs = FileAttributes::new(SYSTEM_OWNER, SYSTEM_OWNER, KEY_MODE);

        let mut base = Vec::new();
        if self.options.manage_package {
            let name = match role {
                Role::Client => settings.client_package.clone(),
                Role::Server => settings.server_package.clone(),
            };
            base.push(graph.add(
                Action::new(
                    scope,
                    ActionRole::PackageInstall,
                    ActionKind::Package {
                        name,
                        version: settings.version.clone(),
                    },
                ),
                &[],
            )?);
        }

        let mut config_deps = base.clone();
        let etcdir = settings.etcdir.clone();
        let ssl_dir = settings.ssl_dir();
        match (&mut settings.security, role) {
            (SecurityProvider::Tls(tls), Role::Client) => {
                let dir = graph.add(
                    Action::new(
                        scope,
                        ActionRole::SslMaterialDirectory,
                        ActionKind::Directory {
                            path: ssl_dir,
                            attrs: attrs.with_mode(SSL_DIR_MODE),
                        },
                    ),
                    &base,
                )?;
                config_deps.push(graph.add(
                    Action::new(
                        scope,
                        ActionRole::Realize,
                        ActionKind::Realize {
                            artifact: SERVER_CERT_ARTIFACT.to_string(),
                            path: tls.server_cert.clone(),
                            attrs: attrs.with_mode(CERT_MODE),
                        },
                    ),
                    &[dir],
                )?);
            }
            (SecurityProvider::Tls(tls), Role::Server) => {
                graph.add(
                    Action::new(
                        scope,
                        ActionRole::Publish,
                        ActionKind::Publish {
                            artifact: SERVER_CERT_ARTIFACT.to_string(),
                            source: tls.server_cert.clone(),
                        },
                    ),
                    &base,
                )?;
            }
            (SecurityProvider::SshKey(ssh), Role::Client) => {
                let plan = self.provisioner.plan(
                    scope,
                    &KeyLayout::shared(&etcdir),
                    ssh,
                    &attrs,
                    &mut graph,
                    &base,
                )?;
                ssh.bind(&plan.material);
                config_deps.extend(plan.actions);
            }
            _ => {}
        }

        if self.options.manage_system_config && role == Role::Client {
            let content = self.renderer.render(&settings)?;
            graph.add(
                Action::new(
                    scope,
                    ActionRole::SystemConfigWrite,
                    ActionKind::File {
                        path: settings.client_config_path(),
                        attrs: attrs.with_mode(SYSTEM_CONFIG_MODE),
                        content: content.into(),
                    },
                ),
                &config_deps,
            )?;
        }

        Ok(graph)
    }

    fn system_context(&self, resolved: &ResolvedSettings, system: &ApplyReport) -> SystemContext {
        let realized_cert = match (&resolved.security, self.options.role) {
            (SecurityProvider::Tls(tls), Role::Client) => {
                let blocker = system
                    .actions
                    .iter()
                    .find(|a| a.role == ActionRole::Realize)
                    .filter(|a| !a.outcome.is_settled())
                    .map(|a| a.id.clone());
                Some((tls.server_cert.clone(), blocker))
            }
            _ => None,
        };
        SystemContext { realized_cert }
    }

    fn identity_graph(
        &self,
        identity: Identity,
        mut settings: ResolvedSettings,
        context: &SystemContext,
    ) -> Result<PlannedIdentity, RunError> {
        let scope = identity.name.clone();
        let mut graph = ResourceGraph::new(&scope);
        let attrs = FileAttributes::new(&identity.owner, &identity.group, KEY_MODE);
        let mut config_deps = Vec::new();
        let mut material = None;
        let mut gated_by = None;

        match &mut settings.security {
            SecurityProvider::Tls(tls) if self.options.role == Role::Client => {
                match &context.realized_cert {
                    Some((path, blocker)) if *path == tls.server_cert => {
                        gated_by = blocker.clone();
                    }
                    _ => {
                        config_deps.push(graph.add(
                            Action::new(
                                &scope,
                                ActionRole::Realize,
                                ActionKind::Realize {
                                    artifact: SERVER_CERT_ARTIFACT.to_string(),
                                    path: tls.server_cert.clone(),
                                    attrs: attrs.with_mode(CERT_MODE),
                                },
                            ),
                            &[],
                        )?);
                    }
                }
            }
            SecurityProvider::SshKey(ssh) => {
                let plan = self.provisioner.plan(
                    &scope,
                    &identity.key_layout(),
                    ssh,
                    &attrs,
                    &mut graph,
                    &[],
                )?;
                ssh.bind(&plan.material);
                config_deps.extend(plan.actions);
                material = Some(plan.material);
            }
            _ => {}
        }

        let content = self.renderer.render(&settings)?;
        graph.add(
            Action::new(
                &scope,
                ActionRole::IdentityConfigWrite,
                ActionKind::File {
                    path: identity.config_path(),
                    attrs: attrs.with_mode(IDENTITY_CONFIG_MODE),
                    content: content.into(),
                },
            ),
            &config_deps,
        )?;

        Ok(PlannedIdentity {
            identity,
            graph,
            material,
            gated_by,
        })
    }
}

/// Report every action in `graph` as skipped behind `blocker`.
fn blocked(graph: &ResourceGraph, blocker: &ActionId) -> Result<ApplyReport, PlanError> {
    let actions = graph
        .topological_order()?
        .into_iter()
        .map(|action| ActionReport {
            id: action.id.clone(),
            role: action.role,
            description: action.describe(),
            target: action.target().map(|p| p.to_path_buf()),
            outcome: Outcome::Skipped {
                blocked_by: blocker.clone(),
            },
        })
        .collect();
    Ok(ApplyReport {
        scope: graph.scope().to_string(),
        actions,
    })
}
