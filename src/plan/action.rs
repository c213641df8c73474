//! Typed provisioning actions

use std::fmt;
use std::path::{Path, PathBuf};

use crate::collab::{CommandSpec, FileAttributes};
use crate::config::{Secret, VersionSpec};

/// Stable, human-readable action key, e.g. `jill:private_key_file`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(scope: &str, role: ActionRole) -> Self {
        Self(format!("{}:{}", scope, role.as_str()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an action is for. Drives ids, logging and ordering tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionRole {
    PackageInstall,
    SslMaterialDirectory,
    KeyStateDirectory,
    PrivateKeyDirectory,
    PrivateKeyFile,
    PublicKeyDirectory,
    PublicKeyDerivation,
    Publish,
    Realize,
    SystemConfigWrite,
    IdentityConfigWrite,
}

impl ActionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PackageInstall => "package",
            Self::SslMaterialDirectory => "ssl_dir",
            Self::KeyStateDirectory => "key_state_dir",
            Self::PrivateKeyDirectory => "private_key_dir",
            Self::PrivateKeyFile => "private_key_file",
            Self::PublicKeyDirectory => "public_key_dir",
            Self::PublicKeyDerivation => "public_key_file",
            Self::Publish => "publish",
            Self::Realize => "realize",
            Self::SystemConfigWrite => "system_config",
            Self::IdentityConfigWrite => "identity_config",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    Package {
        name: String,
        version: VersionSpec,
    },
    Directory {
        path: PathBuf,
        attrs: FileAttributes,
    },
    File {
        path: PathBuf,
        attrs: FileAttributes,
        content: Secret,
    },
    /// External command whose only product is `creates`. With `refresh`
    /// set, an existing `creates` is stale and removed before the run.
    Command {
        command: CommandSpec,
        creates: PathBuf,
        attrs: FileAttributes,
        refresh: bool,
    },
    Publish {
        artifact: String,
        source: PathBuf,
    },
    Realize {
        artifact: String,
        path: PathBuf,
        attrs: FileAttributes,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub id: ActionId,
    pub role: ActionRole,
    pub kind: ActionKind,
}

impl Action {
    pub fn new(scope: &str, role: ActionRole, kind: ActionKind) -> Self {
        Self {
            id: ActionId::new(scope, role),
            role,
            kind,
        }
    }

    /// The filesystem path this action converges, if any.
    pub fn target(&self) -> Option<&Path> {
        match &self.kind {
            ActionKind::Package { .. } | ActionKind::Publish { .. } => None,
            ActionKind::Directory { path, .. }
            | ActionKind::File { path, .. }
            | ActionKind::Realize { path, .. } => Some(path),
            ActionKind::Command { creates, .. } => Some(creates),
        }
    }

    pub fn describe(&self) -> String {
        match &self.kind {
            ActionKind::Package { name, version } => format!("package {} ({})", name, version),
            ActionKind::Directory { path, .. } => format!("directory {}", path.display()),
            ActionKind::File { path, .. } => format!("file {}", path.display()),
            ActionKind::Command { command, creates, .. } => {
                format!("exec `{}` creating {}", command.program, creates.display())
            }
            ActionKind::Publish { artifact, source } => {
                format!("publish {} from {}", artifact, source.display())
            }
            ActionKind::Realize { artifact, path, .. } => {
                format!("realize {} into {}", artifact, path.display())
            }
        }
    }
}
