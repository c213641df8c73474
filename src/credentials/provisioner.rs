use std::path::Path;

use super::{CredentialMaterial, KeyFile, KeyLayout, KeyTool, Provenance, ProvisionError};
use crate::collab::FileAttributes;
use crate::config::SshKeyConfig;
use crate::identity::Identity;
use crate::plan::{
    Action, ActionId, ActionKind, ActionRole, Applier, ApplyReport, FailureKind, Outcome,
    ResourceGraph,
};

const DIRECTORY_MODE: u32 = 0o700;
const PRIVATE_KEY_MODE: u32 = 0o600;
const PUBLIC_KEY_MODE: u32 = 0o644;

/// Actions added for one key pair and the material they will produce.
#[derive(Debug, Clone, PartialEq)]
pub struct CredentialPlan {
    pub material: CredentialMaterial,
    /// Everything a dependent (the config write) has to wait for.
    pub actions: Vec<ActionId>,
}

#[derive(Debug, Clone, Default)]
pub struct CredentialProvisioner {
    key_tool: KeyTool,
}

impl CredentialProvisioner {
    pub fn new(key_tool: KeyTool) -> Self {
        Self { key_tool }
    }

    pub fn key_tool(&self) -> &KeyTool {
        &self.key_tool
    }

    /// Inspect the current key files and add the actions still needed to
    /// `graph`. Nothing is mutated here.
    ///
    /// `attrs` carries the owner and group; modes are set per file kind.
    pub fn plan(
        &self,
        scope: &str,
        layout: &KeyLayout,
        ssh: &SshKeyConfig,
        attrs: &FileAttributes,
        graph: &mut ResourceGraph,
        requires: &[ActionId],
    ) -> Result<CredentialPlan, ProvisionError> {
        let mut actions = Vec::new();
        let bootstrap = ssh.private_key_path.is_none()
            || ssh.private_key_content.is_none()
            || ssh.public_key.is_none();

        let mut state_dir = None;
        let mut private_deps = requires.to_vec();
        if bootstrap {
            let state = graph.add(
                directory(scope, ActionRole::KeyStateDirectory, &layout.base_dir, attrs),
                requires,
            )?;
            let private_dir = graph.add(
                directory(scope, ActionRole::PrivateKeyDirectory, &layout.private_dir, attrs),
                &[state.clone()],
            )?;
            actions.push(state.clone());
            actions.push(private_dir.clone());
            state_dir = Some(state);
            private_deps = vec![private_dir];
        }

        let private_path = ssh
            .private_key_path
            .clone()
            .unwrap_or_else(|| layout.default_private_key());
        let private_exists = private_path.exists();
        // A derived public key is stale once inline content replaces the key it came from.
        let stale_public = ssh.private_key_content.as_ref().is_some_and(|content| {
            std::fs::read(&private_path)
                .map_or(true, |current| current != content.expose().as_bytes())
        });
        let private_attrs = attrs.with_mode(PRIVATE_KEY_MODE);

        let (private_provenance, private_action) = if let Some(content) = &ssh.private_key_content
        {
            let id = graph.add(
                Action::new(
                    scope,
                    ActionRole::PrivateKeyFile,
                    ActionKind::File {
                        path: private_path.clone(),
                        attrs: private_attrs,
                        content: content.clone(),
                    },
                ),
                &private_deps,
            )?;
            (Provenance::InlineContent, Some(id))
        } else if private_exists {
            log::debug!("{}: using existing private key {}", scope, private_path.display());
            (Provenance::PreExistingPath, None)
        } else {
            let id = graph.add(
                Action::new(
                    scope,
                    ActionRole::PrivateKeyFile,
                    ActionKind::Command {
                        command: self.key_tool.genrsa(&private_path),
                        creates: private_path.clone(),
                        attrs: private_attrs,
                        refresh: false,
                    },
                ),
                &private_deps,
            )?;
            (Provenance::Generated, Some(id))
        };
        actions.extend(private_action.iter().cloned());

        let public_key = match &ssh.public_key {
            Some(external) => KeyFile {
                path: external.clone(),
                exists: external.exists(),
                provenance: Provenance::ExternalReference,
            },
            None => {
                let public_path = layout.default_public_key();
                let mut derive_deps: Vec<ActionId> = private_action
                    .into_iter()
                    .chain(private_deps.iter().cloned())
                    .collect();

                if let Some(state) = &state_dir {
                    let public_dir = graph.add(
                        directory(scope, ActionRole::PublicKeyDirectory, &layout.public_dir, attrs),
                        &[state.clone()],
                    )?;
                    actions.push(public_dir.clone());
                    derive_deps.push(public_dir);
                }

                let derive = graph.add(
                    Action::new(
                        scope,
                        ActionRole::PublicKeyDerivation,
                        ActionKind::Command {
                            command: self.key_tool.derive_public(&private_path, &public_path),
                            creates: public_path.clone(),
                            attrs: attrs.with_mode(PUBLIC_KEY_MODE),
                            refresh: stale_public,
                        },
                    ),
                    &derive_deps,
                )?;
                actions.push(derive);

                KeyFile {
                    exists: public_path.exists(),
                    path: public_path,
                    provenance: Provenance::Derived,
                }
            }
        };

        Ok(CredentialPlan {
            material: CredentialMaterial {
                private_key: KeyFile {
                    path: private_path,
                    exists: private_exists,
                    provenance: private_provenance,
                },
                public_key,
            },
            actions,
        })
    }

    /// Plan and apply one identity's key pair on its own.
    pub async fn provision(
        &self,
        identity: &Identity,
        ssh: &SshKeyConfig,
        applier: &Applier,
    ) -> Result<CredentialMaterial, ProvisionError> {
        let mut graph = ResourceGraph::new(&identity.name);
        let attrs = FileAttributes::new(&identity.owner, &identity.group, PRIVATE_KEY_MODE);
        let plan = self.plan(
            &identity.name,
            &identity.key_layout(),
            ssh,
            &attrs,
            &mut graph,
            &[],
        )?;

        let report = applier.apply(&graph).await?;
        if let Some(err) = report_error(&identity.name, &report) {
            return Err(err);
        }

        let mut material = plan.material;
        material.refresh();
        Ok(material)
    }
}

fn directory(scope: &str, role: ActionRole, path: &Path, attrs: &FileAttributes) -> Action {
    Action::new(
        scope,
        role,
        ActionKind::Directory {
            path: path.to_path_buf(),
            attrs: attrs.with_mode(DIRECTORY_MODE),
        },
    )
}

/// The first problem in `report`, as a provisioning error.
pub fn report_error(identity: &str, report: &ApplyReport) -> Option<ProvisionError> {
    for action in &report.actions {
        let identity = identity.to_string();
        match &action.outcome {
            Outcome::Failed(failure) => {
                let message = failure.message.clone();
                return Some(match failure.kind {
                    FailureKind::Permission => ProvisionError::Permission { identity, message },
                    FailureKind::Generation => ProvisionError::Generation { identity, message },
                    _ => ProvisionError::Incomplete {
                        identity,
                        reason: message,
                    },
                });
            }
            Outcome::Deferred(reason) => {
                return Some(ProvisionError::Incomplete {
                    identity,
                    reason: reason.clone(),
                })
            }
            _ => {}
        }
    }
    None
}
