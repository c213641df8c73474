//! Local filesystem writer

use async_trait::async_trait;
use std::path::Path;
use tokio::io::AsyncWriteExt;

use super::{Change, CollabError, FileAttributes, FileWriter};

/// Writes straight to the local filesystem.
///
/// Ownership is only converged when `manage_ownership` is set; an
/// unprivileged run (tests, `--noop` previews) leaves owners alone and only
/// converges permission bits.
#[derive(Debug, Clone, Default)]
pub struct LocalFileWriter {
    manage_ownership: bool,
}

impl LocalFileWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ownership(mut self, manage: bool) -> Self {
        self.manage_ownership = manage;
        self
    }

    async fn converge(&self, path: &Path, attrs: &FileAttributes) -> Result<Change, CollabError> {
        let metadata = tokio::fs::symlink_metadata(path)
            .await
            .map_err(|e| CollabError::from_io(path, e))?;

        let mut change = Change::Unchanged;
        if unix::mode_differs(&metadata, attrs.mode) {
            unix::set_mode(path, attrs.mode).await?;
            change = Change::Updated;
        }
        if self.manage_ownership && unix::chown_if_needed(path, &metadata, attrs)? {
            change = Change::Updated;
        }
        Ok(change)
    }
}

#[async_trait]
impl FileWriter for LocalFileWriter {
    async fn ensure_directory(
        &self,
        path: &Path,
        attrs: &FileAttributes,
    ) -> Result<Change, CollabError> {
        match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) if metadata.is_dir() => self.converge(path, attrs).await,
            Ok(_) => Err(CollabError::IoError(format!(
                "{} exists and is not a directory",
                path.display()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tokio::fs::create_dir(path)
                    .await
                    .map_err(|e| CollabError::from_io(path, e))?;
                self.converge(path, attrs).await?;
                Ok(Change::Created)
            }
            Err(e) => Err(CollabError::from_io(path, e)),
        }
    }

    async fn write(
        &self,
        path: &Path,
        attrs: &FileAttributes,
        content: &[u8],
    ) -> Result<Change, CollabError> {
        let existing = match tokio::fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(CollabError::from_io(path, e)),
        };

        if existing.as_deref() == Some(content) {
            return self.converge(path, attrs).await;
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(attrs.mode);

        let mut file = options
            .open(path)
            .await
            .map_err(|e| CollabError::from_io(path, e))?;
        file.write_all(content)
            .await
            .map_err(|e| CollabError::from_io(path, e))?;
        file.flush().await.map_err(|e| CollabError::from_io(path, e))?;
        drop(file);

        self.converge(path, attrs).await?;

        Ok(if existing.is_some() {
            Change::Updated
        } else {
            Change::Created
        })
    }

    async fn ensure_attributes(
        &self,
        path: &Path,
        attrs: &FileAttributes,
    ) -> Result<Change, CollabError> {
        self.converge(path, attrs).await
    }

    async fn remove(&self, path: &Path) -> Result<Change, CollabError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(Change::Removed),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Change::Unchanged),
            Err(e) => Err(CollabError::from_io(path, e)),
        }
    }
}

#[cfg(unix)]
mod unix {
    use std::ffi::CString;
    use std::fs::Metadata;
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::path::Path;

    use crate::collab::{CollabError, FileAttributes};

    pub fn mode_differs(metadata: &Metadata, mode: u32) -> bool {
        metadata.permissions().mode() & 0o7777 != mode
    }

    pub async fn set_mode(path: &Path, mode: u32) -> Result<(), CollabError> {
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| CollabError::from_io(path, e))
    }

    fn lookup_uid(name: &str) -> Result<u32, CollabError> {
        if let Ok(uid) = name.parse::<u32>() {
            return Ok(uid);
        }
        let c_name =
            CString::new(name).map_err(|_| CollabError::UnknownPrincipal(name.to_string()))?;
        // SAFETY: getpwnam returns null or a pointer to static storage that
        // stays valid until the next getpw* call on this thread.
        let entry = unsafe { libc::getpwnam(c_name.as_ptr()) };
        if entry.is_null() {
            return Err(CollabError::UnknownPrincipal(format!("user {}", name)));
        }
        // SAFETY: checked non-null above.
        Ok(unsafe { (*entry).pw_uid })
    }

    fn lookup_gid(name: &str) -> Result<u32, CollabError> {
        if let Ok(gid) = name.parse::<u32>() {
            return Ok(gid);
        }
        let c_name =
            CString::new(name).map_err(|_| CollabError::UnknownPrincipal(name.to_string()))?;
        // SAFETY: see lookup_uid.
        let entry = unsafe { libc::getgrnam(c_name.as_ptr()) };
        if entry.is_null() {
            return Err(CollabError::UnknownPrincipal(format!("group {}", name)));
        }
        // SAFETY: checked non-null above.
        Ok(unsafe { (*entry).gr_gid })
    }

    /// Returns whether ownership was changed.
    pub fn chown_if_needed(
        path: &Path,
        metadata: &Metadata,
        attrs: &FileAttributes,
    ) -> Result<bool, CollabError> {
        let uid = attrs.owner.as_deref().map(lookup_uid).transpose()?;
        let gid = attrs.group.as_deref().map(lookup_gid).transpose()?;

        let uid = uid.filter(|uid| *uid != metadata.uid());
        let gid = gid.filter(|gid| *gid != metadata.gid());
        if uid.is_none() && gid.is_none() {
            return Ok(false);
        }

        std::os::unix::fs::lchown(path, uid, gid).map_err(|e| CollabError::from_io(path, e))?;
        Ok(true)
    }
}

#[cfg(not(unix))]
mod unix {
    use std::fs::Metadata;
    use std::path::Path;

    use crate::collab::{CollabError, FileAttributes};

    pub fn mode_differs(_metadata: &Metadata, _mode: u32) -> bool {
        false
    }

    pub async fn set_mode(_path: &Path, _mode: u32) -> Result<(), CollabError> {
        Ok(())
    }

    pub fn chown_if_needed(
        _path: &Path,
        _metadata: &Metadata,
        _attrs: &FileAttributes,
    ) -> Result<bool, CollabError> {
        Ok(false)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn mode(path: &Path) -> u32 {
        std::fs::metadata(path).unwrap().permissions().mode() & 0o7777
    }

    #[tokio::test]
    async fn test_directory_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state");
        let writer = LocalFileWriter::new();
        let attrs = FileAttributes::mode_only(0o700);

        assert_eq!(writer.ensure_directory(&path, &attrs).await.unwrap(), Change::Created);
        assert_eq!(mode(&path), 0o700);
        assert_eq!(writer.ensure_directory(&path, &attrs).await.unwrap(), Change::Unchanged);
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jill.pem");
        std::fs::write(&path, "PUB").unwrap();
        let writer = LocalFileWriter::new();

        assert_eq!(writer.remove(&path).await.unwrap(), Change::Removed);
        assert!(!path.exists());
        assert_eq!(writer.remove(&path).await.unwrap(), Change::Unchanged);
    }

    #[tokio::test]
    async fn test_directory_requires_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("state");
        let writer = LocalFileWriter::new();
        let result = writer
            .ensure_directory(&path, &FileAttributes::mode_only(0o700))
            .await;
        assert!(matches!(result, Err(CollabError::IoError(_))));
    }

    #[tokio::test]
    async fn test_write_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.cfg");
        let writer = LocalFileWriter::new();
        let attrs = FileAttributes::mode_only(0o600);

        assert_eq!(writer.write(&path, &attrs, b"a = 1\n").await.unwrap(), Change::Created);
        assert_eq!(mode(&path), 0o600);
        assert_eq!(writer.write(&path, &attrs, b"a = 1\n").await.unwrap(), Change::Unchanged);
        assert_eq!(writer.write(&path, &attrs, b"a = 2\n").await.unwrap(), Change::Updated);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a = 2\n");
    }

    #[tokio::test]
    async fn test_mode_drift_is_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key.pem");
        std::fs::write(&path, "key").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let writer = LocalFileWriter::new();
        let change = writer
            .ensure_attributes(&path, &FileAttributes::mode_only(0o600))
            .await
            .unwrap();
        assert_eq!(change, Change::Updated);
        assert_eq!(mode(&path), 0o600);
    }

    #[tokio::test]
    async fn test_unknown_owner_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f");
        std::fs::write(&path, "x").unwrap();

        let writer = LocalFileWriter::new().with_ownership(true);
        let attrs = FileAttributes::new("no-such-user-mco-provision", "nogroup", 0o600);
        let result = writer.ensure_attributes(&path, &attrs).await;
        assert!(matches!(result, Err(CollabError::UnknownPrincipal(_))));
    }
}
