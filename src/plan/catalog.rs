//! Shared artifact catalog for publish/realize
//!
//! A server-role run publishes a named artifact (its public certificate);
//! client-role runs fetch it by name and materialize it locally. The
//! catalog is the only thing the two sides share.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::collab::{Change, CollabError};

/// Name under which the TLS server certificate is published.
pub const SERVER_CERT_ARTIFACT: &str = "mcollective-server-public";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub content: String,
    /// Hex SHA-256 of `content`.
    pub digest: String,
    pub publisher: String,
    pub published_at: DateTime<Utc>,
}

impl Artifact {
    pub fn new(name: &str, content: &str, publisher: &str) -> Self {
        Self {
            name: name.to_string(),
            content: content.to_string(),
            digest: digest(content),
            publisher: publisher.to_string(),
            published_at: Utc::now(),
        }
    }
}

pub fn digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

#[async_trait]
pub trait ArtifactCatalog: Send + Sync {
    /// Publish `content` under `name`. Republishing identical content is a
    /// no-op.
    async fn publish(&self, name: &str, content: &str) -> Result<Change, CollabError>;

    /// `None` until someone has published `name`.
    async fn fetch(&self, name: &str) -> Result<Option<Artifact>, CollabError>;
}

/// Catalog stored as one `{name}.json` file per artifact in a directory,
/// typically on storage shared between hosts.
#[derive(Debug, Clone)]
pub struct DirectoryCatalog {
    root: PathBuf,
    publisher: String,
}

impl DirectoryCatalog {
    pub fn new(root: PathBuf, publisher: &str) -> Self {
        Self {
            root,
            publisher: publisher.to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }
}

#[async_trait]
impl ArtifactCatalog for DirectoryCatalog {
    async fn publish(&self, name: &str, content: &str) -> Result<Change, CollabError> {
        let existing = self.fetch(name).await?;
        if existing.as_ref().map(|a| a.digest.as_str()) == Some(digest(content).as_str()) {
            return Ok(Change::Unchanged);
        }

        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| CollabError::CatalogError(format!("{}: {}", self.root.display(), e)))?;

        let artifact = Artifact::new(name, content, &self.publisher);
        let json = serde_json::to_string_pretty(&artifact)
            .map_err(|e| CollabError::CatalogError(e.to_string()))?;

        // Write then rename so readers never see a partial artifact.
        let path = self.artifact_path(name);
        let staging = self.root.join(format!(".{}.json.tmp", name));
        tokio::fs::write(&staging, json)
            .await
            .map_err(|e| CollabError::CatalogError(format!("{}: {}", staging.display(), e)))?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|e| CollabError::CatalogError(format!("{}: {}", path.display(), e)))?;

        log::info!("Published {} ({})", name, artifact.digest);
        Ok(if existing.is_some() {
            Change::Updated
        } else {
            Change::Created
        })
    }

    async fn fetch(&self, name: &str) -> Result<Option<Artifact>, CollabError> {
        let path = self.artifact_path(name);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CollabError::CatalogError(format!("{}: {}", path.display(), e)))
            }
        };

        let artifact: Artifact = serde_json::from_slice(&data)
            .map_err(|e| CollabError::CatalogError(format!("{}: {}", path.display(), e)))?;
        if artifact.digest != digest(&artifact.content) {
            return Err(CollabError::CatalogError(format!(
                "{}: digest mismatch",
                path.display()
            )));
        }
        Ok(Some(artifact))
    }
}
