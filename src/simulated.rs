//! In-process collaborators
//!
//! Stand-ins for the package manager, the key tool and the shared catalog,
//! so whole convergence runs can be exercised in a temp directory without
//! root, `apt` or `openssl`. Files are still written for real through
//! `LocalFileWriter`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::collab::{
    Change, CollabError, CommandExecutor, CommandOutcome, CommandSpec, Guard, PackageInstaller,
};
use crate::config::VersionSpec;
use crate::plan::catalog::digest;
use crate::plan::{Artifact, ArtifactCatalog};

/// Version reported for packages installed as `present` or `latest`.
pub const SIMULATED_VERSION: &str = "2.12.1-1";

/// Key tool stand-in. Honors guards like the real executor and writes a
/// placeholder into the guarded path instead of running anything.
#[derive(Default)]
pub struct SimulatedCommandExecutor {
    invocations: Mutex<Vec<CommandSpec>>,
    fail_patterns: Mutex<Vec<String>>,
    produce_nothing: AtomicBool,
}

impl SimulatedCommandExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail any command whose rendered form contains `pattern`.
    pub async fn fail_when(&self, pattern: &str) {
        self.fail_patterns.lock().await.push(pattern.to_string());
    }

    pub async fn clear_failures(&self) {
        self.fail_patterns.lock().await.clear();
    }

    /// Exit successfully without creating the guarded file.
    pub async fn produce_nothing(&self) {
        self.produce_nothing.store(true, Ordering::SeqCst);
    }

    /// Commands that actually ran, in order.
    pub async fn invocations(&self) -> Vec<CommandSpec> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl CommandExecutor for SimulatedCommandExecutor {
    async fn run(
        &self,
        command: &CommandSpec,
        guard: &Guard,
    ) -> Result<CommandOutcome, CollabError> {
        if guard.holds() {
            return Ok(CommandOutcome::Skipped);
        }

        let rendered = command.to_string();
        let serial = {
            let mut invocations = self.invocations.lock().await;
            invocations.push(command.clone());
            invocations.len()
        };

        if self
            .fail_patterns
            .lock()
            .await
            .iter()
            .any(|p| rendered.contains(p.as_str()))
        {
            return Err(CollabError::CommandFailed {
                command: rendered,
                status: "exit status: 1".to_string(),
                stderr: "simulated failure".to_string(),
            });
        }

        if !self.produce_nothing.load(Ordering::SeqCst) {
            let Guard::Creates(path) = guard;
            tokio::fs::write(path, format!("simulated output #{} of `{}`\n", serial, rendered))
                .await
                .map_err(|e| CollabError::from_io(path, e))?;
        }
        Ok(CommandOutcome::Ran)
    }
}

/// Package database held in memory.
#[derive(Default)]
pub struct SimulatedPackageInstaller {
    installed: Mutex<HashMap<String, String>>,
}

impl SimulatedPackageInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn installed(&self, name: &str) -> Option<String> {
        self.installed.lock().await.get(name).cloned()
    }
}

#[async_trait]
impl PackageInstaller for SimulatedPackageInstaller {
    async fn ensure(&self, name: &str, version: &VersionSpec) -> Result<Change, CollabError> {
        let mut installed = self.installed.lock().await;
        let current = installed.get(name).cloned();

        let change = match (version, current) {
            (VersionSpec::Absent, None) => Change::Unchanged,
            (VersionSpec::Absent, Some(_)) => {
                installed.remove(name);
                Change::Removed
            }
            (VersionSpec::Present | VersionSpec::Latest, Some(_)) => Change::Unchanged,
            (VersionSpec::Present | VersionSpec::Latest, None) => {
                installed.insert(name.to_string(), SIMULATED_VERSION.to_string());
                Change::Created
            }
            (VersionSpec::Exact(wanted), Some(have)) if *wanted == have => Change::Unchanged,
            (VersionSpec::Exact(wanted), current) => {
                installed.insert(name.to_string(), wanted.clone());
                if current.is_some() {
                    Change::Updated
                } else {
                    Change::Created
                }
            }
        };
        Ok(change)
    }
}

/// Catalog shared between runs in one process.
pub struct MemoryCatalog {
    publisher: String,
    artifacts: RwLock<HashMap<String, Artifact>>,
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::with_publisher("simulated")
    }

    pub fn with_publisher(publisher: &str) -> Self {
        Self {
            publisher: publisher.to_string(),
            artifacts: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ArtifactCatalog for MemoryCatalog {
    async fn publish(&self, name: &str, content: &str) -> Result<Change, CollabError> {
        let mut artifacts = self.artifacts.write().await;
        let change = match artifacts.get(name) {
            Some(existing) if existing.digest == digest(content) => return Ok(Change::Unchanged),
            Some(_) => Change::Updated,
            None => Change::Created,
        };
        artifacts.insert(
            name.to_string(),
            Artifact::new(name, content, &self.publisher),
        );
        Ok(change)
    }

    async fn fetch(&self, name: &str) -> Result<Option<Artifact>, CollabError> {
        Ok(self.artifacts.read().await.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guard_skips_and_records_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, "KEY").unwrap();

        let executor = SimulatedCommandExecutor::new();
        let outcome = executor
            .run(&CommandSpec::new("openssl", ["genrsa"]), &Guard::Creates(path))
            .await
            .unwrap();
        assert_eq!(outcome, CommandOutcome::Skipped);
        assert!(executor.invocations().await.is_empty());
    }

    #[tokio::test]
    async fn test_run_writes_guarded_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");

        let executor = SimulatedCommandExecutor::new();
        executor
            .run(&CommandSpec::new("openssl", ["genrsa"]), &Guard::Creates(path.clone()))
            .await
            .unwrap();
        assert!(path.exists());
        assert_eq!(executor.invocations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_package_versions() {
        let installer = SimulatedPackageInstaller::new();
        let present = VersionSpec::Present;
        assert_eq!(installer.ensure("mco", &present).await.unwrap(), Change::Created);
        assert_eq!(installer.ensure("mco", &present).await.unwrap(), Change::Unchanged);

        let pinned = VersionSpec::Exact("2.0".to_string());
        assert_eq!(installer.ensure("mco", &pinned).await.unwrap(), Change::Updated);
        assert_eq!(installer.installed("mco").await.as_deref(), Some("2.0"));

        assert_eq!(installer.ensure("mco", &VersionSpec::Absent).await.unwrap(), Change::Removed);
        assert!(installer.installed("mco").await.is_none());
    }

    #[tokio::test]
    async fn test_memory_catalog_republish() {
        let catalog = MemoryCatalog::new();
        assert!(catalog.fetch("cert").await.unwrap().is_none());
        assert_eq!(catalog.publish("cert", "A").await.unwrap(), Change::Created);
        assert_eq!(catalog.publish("cert", "A").await.unwrap(), Change::Unchanged);
        assert_eq!(catalog.publish("cert", "B").await.unwrap(), Change::Updated);
    }
}
