//! External collaborators
//!
//! The provisioning core never touches the system directly. Everything with
//! a side effect goes through one of these traits:
//! - `FileWriter`: directories, files, ownership and modes
//! - `CommandExecutor`: guarded external commands (key tooling)
//! - `PackageInstaller`: package state
//! - `TemplateRenderer`: resolved settings → config text
//!
//! Every implementation inspects current state before acting and reports
//! whether it changed anything.

pub mod command;
pub mod fs;
pub mod package;
pub mod render;

pub use command::SystemCommandExecutor;
pub use fs::LocalFileWriter;
pub use package::AptPackageInstaller;
pub use render::ClientCfgRenderer;

use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::{ResolvedSettings, VersionSpec};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollabError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Unknown user or group: {0}")]
    UnknownPrincipal(String),

    #[error("Failed to spawn {0}")]
    CommandSpawn(String),

    #[error("Command `{command}` exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Package error: {0}")]
    PackageError(String),

    #[error("Catalog error: {0}")]
    CatalogError(String),

    #[error("Render error: {0}")]
    RenderError(String),
}

impl CollabError {
    /// Map an `io::Error` on `path`, keeping permission failures distinct.
    pub fn from_io(path: &Path, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => {
                Self::PermissionDenied(format!("{}: {}", path.display(), err))
            }
            _ => Self::IoError(format!("{}: {}", path.display(), err)),
        }
    }
}

/// What an idempotent operation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Created,
    Updated,
    Removed,
    Unchanged,
}

impl Change {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }

    /// Fold a follow-up change (e.g. attribute fix after content write).
    pub fn and(self, other: Change) -> Change {
        match (self, other) {
            (Self::Unchanged, Self::Unchanged) => Self::Unchanged,
            (Self::Unchanged, _) => Self::Updated,
            (first, _) => first,
        }
    }
}

/// Ownership and permission bits for a managed path. Owner and group are
/// names; `None` leaves the current value alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileAttributes {
    pub owner: Option<String>,
    pub group: Option<String>,
    pub mode: u32,
}

impl FileAttributes {
    pub fn new(owner: &str, group: &str, mode: u32) -> Self {
        Self {
            owner: Some(owner.to_string()),
            group: Some(group.to_string()),
            mode,
        }
    }

    pub fn mode_only(mode: u32) -> Self {
        Self {
            owner: None,
            group: None,
            mode,
        }
    }

    pub fn with_mode(&self, mode: u32) -> Self {
        Self {
            mode,
            ..self.clone()
        }
    }
}

/// An external program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Precondition that, when it holds, means the command's work is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// Satisfied once the path exists.
    Creates(PathBuf),
}

impl Guard {
    /// Evaluated at call time, never cached.
    pub fn holds(&self) -> bool {
        match self {
            Self::Creates(path) => path.exists(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The guard already held; nothing ran.
    Skipped,
    Ran,
}

#[async_trait]
pub trait FileWriter: Send + Sync {
    /// Create the directory if missing (parent must exist) and converge its
    /// attributes.
    async fn ensure_directory(&self, path: &Path, attrs: &FileAttributes)
        -> Result<Change, CollabError>;

    /// Write `content` unless the file already holds exactly that.
    async fn write(
        &self,
        path: &Path,
        attrs: &FileAttributes,
        content: &[u8],
    ) -> Result<Change, CollabError>;

    /// Converge ownership and mode of an existing path.
    async fn ensure_attributes(&self, path: &Path, attrs: &FileAttributes)
        -> Result<Change, CollabError>;

    /// Remove a file if present.
    async fn remove(&self, path: &Path) -> Result<Change, CollabError>;
}

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Run `command` only if `guard` does not hold at call time.
    async fn run(&self, command: &CommandSpec, guard: &Guard)
        -> Result<CommandOutcome, CollabError>;
}

#[async_trait]
pub trait PackageInstaller: Send + Sync {
    async fn ensure(&self, name: &str, version: &VersionSpec) -> Result<Change, CollabError>;
}

pub trait TemplateRenderer: Send + Sync {
    fn render(&self, settings: &ResolvedSettings) -> Result<String, CollabError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_fold() {
        assert_eq!(Change::Unchanged.and(Change::Unchanged), Change::Unchanged);
        assert_eq!(Change::Unchanged.and(Change::Updated), Change::Updated);
        assert_eq!(Change::Created.and(Change::Updated), Change::Created);
        assert!(!Change::Unchanged.is_mutation());
        assert!(Change::Removed.is_mutation());
    }

    #[test]
    fn test_command_display() {
        let cmd = CommandSpec::new("openssl", ["genrsa", "-out", "/tmp/k.pem"]);
        assert_eq!(cmd.to_string(), "openssl genrsa -out /tmp/k.pem");
    }

    #[test]
    fn test_guard_evaluated_live() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        let guard = Guard::Creates(path.clone());
        assert!(!guard.holds());
        std::fs::write(&path, "x").unwrap();
        assert!(guard.holds());
    }

    #[test]
    fn test_permission_errors_stay_distinct() {
        let err = CollabError::from_io(
            Path::new("/root/x"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        assert!(matches!(err, CollabError::PermissionDenied(_)));
    }
}
