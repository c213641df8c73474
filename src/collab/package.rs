//! Debian package installer
//!
//! Inspects installed state with `dpkg-query` before asking `apt-get` to do
//! anything, so an already-satisfied package never triggers an install.

use async_trait::async_trait;

use super::{Change, CollabError, PackageInstaller};
use crate::config::VersionSpec;

#[derive(Debug, Clone)]
pub struct AptPackageInstaller {
    dpkg_query: String,
    apt_get: String,
}

impl Default for AptPackageInstaller {
    fn default() -> Self {
        Self {
            dpkg_query: "dpkg-query".to_string(),
            apt_get: "apt-get".to_string(),
        }
    }
}

impl AptPackageInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installed version, or `None` when the package is not installed.
    async fn installed_version(&self, name: &str) -> Result<Option<String>, CollabError> {
        let output = tokio::process::Command::new(&self.dpkg_query)
            .args(["-W", "-f=${Status}\t${Version}", name])
            .output()
            .await
            .map_err(|e| CollabError::PackageError(format!("Failed to run dpkg-query: {}", e)))?;

        // dpkg-query exits non-zero for packages it has never heard of.
        if !output.status.success() {
            return Ok(None);
        }
        Ok(parse_status(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn apt(&self, args: &[&str]) -> Result<(), CollabError> {
        log::info!("Running {} {}", self.apt_get, args.join(" "));
        let output = tokio::process::Command::new(&self.apt_get)
            .args(args)
            .env("DEBIAN_FRONTEND", "noninteractive")
            .output()
            .await
            .map_err(|e| CollabError::PackageError(format!("Failed to run apt-get: {}", e)))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(CollabError::PackageError(format!(
                "apt-get {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

/// Parse `install ok installed\t2.12.1-1` into a version.
fn parse_status(output: &str) -> Option<String> {
    let (status, version) = output.trim().split_once('\t')?;
    if status.ends_with(" installed") && !version.is_empty() {
        Some(version.to_string())
    } else {
        None
    }
}

#[async_trait]
impl PackageInstaller for AptPackageInstaller {
    async fn ensure(&self, name: &str, version: &VersionSpec) -> Result<Change, CollabError> {
        let before = self.installed_version(name).await?;

        match (version, &before) {
            (VersionSpec::Present, Some(_)) | (VersionSpec::Absent, None) => Ok(Change::Unchanged),
            (VersionSpec::Exact(wanted), Some(installed)) if wanted == installed => {
                Ok(Change::Unchanged)
            }
            (VersionSpec::Absent, Some(_)) => {
                self.apt(&["remove", "-y", name]).await?;
                Ok(Change::Removed)
            }
            (VersionSpec::Present, None) => {
                self.apt(&["install", "-y", name]).await?;
                Ok(Change::Created)
            }
            (VersionSpec::Exact(wanted), _) => {
                let pinned = format!("{}={}", name, wanted);
                self.apt(&["install", "-y", "--allow-downgrades", &pinned]).await?;
                Ok(if before.is_some() {
                    Change::Updated
                } else {
                    Change::Created
                })
            }
            (VersionSpec::Latest, _) => {
                self.apt(&["install", "-y", name]).await?;
                let after = self.installed_version(name).await?;
                Ok(match (before.as_deref(), after.as_deref()) {
                    (None, Some(_)) => Change::Created,
                    (Some(old), Some(new)) if old != new => Change::Updated,
                    _ => Change::Unchanged,
                })
            }
        }
    }
}
