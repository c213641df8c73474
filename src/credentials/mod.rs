//! Key material for the sshkey security provider
//!
//! Each identity gets a private key (inline content, an existing file, or a
//! freshly generated one) and a public key (an external reference, or one
//! derived from the private key). `provisioner` turns that into graph
//! actions; this module holds the layout and the resulting material.

pub mod provisioner;

pub use provisioner::{report_error, CredentialPlan, CredentialProvisioner};

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::collab::CommandSpec;
use crate::plan::PlanError;

pub const PRIVATE_KEYS_DIR: &str = "private_keys";
pub const PUBLIC_KEYS_DIR: &str = "public_keys";
/// Key name used for the system-wide key under `<etcdir>/sshkey`.
pub const SHARED_KEY_NAME: &str = "client";

/// Where default key files live for one owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    pub base_dir: PathBuf,
    pub private_dir: PathBuf,
    pub public_dir: PathBuf,
    pub key_name: String,
}

impl KeyLayout {
    /// `<base>/private_keys/<name>.pem` and `<base>/public_keys/<name>.pem`
    pub fn under(base: PathBuf, key_name: &str) -> Self {
        Self {
            private_dir: base.join(PRIVATE_KEYS_DIR),
            public_dir: base.join(PUBLIC_KEYS_DIR),
            base_dir: base,
            key_name: key_name.to_string(),
        }
    }

    /// System-wide key under `<etcdir>/sshkey`.
    pub fn shared(etcdir: &Path) -> Self {
        Self::under(etcdir.join("sshkey"), SHARED_KEY_NAME)
    }

    pub fn default_private_key(&self) -> PathBuf {
        self.private_dir.join(format!("{}.pem", self.key_name))
    }

    pub fn default_public_key(&self) -> PathBuf {
        self.public_dir.join(format!("{}.pem", self.key_name))
    }
}

/// External key tool invocations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyTool {
    pub program: String,
}

impl Default for KeyTool {
    fn default() -> Self {
        Self::new("openssl")
    }
}

impl KeyTool {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    /// RSA private key at the tool's default strength.
    pub fn genrsa(&self, private_key: &Path) -> CommandSpec {
        CommandSpec::new(
            &self.program,
            ["genrsa".to_string(), "-out".to_string(), path_arg(private_key)],
        )
    }

    pub fn derive_public(&self, private_key: &Path, public_key: &Path) -> CommandSpec {
        CommandSpec::new(
            &self.program,
            [
                "rsa".to_string(),
                "-in".to_string(),
                path_arg(private_key),
                "-pubout".to_string(),
                "-out".to_string(),
                path_arg(public_key),
            ],
        )
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// How a key file came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    InlineContent,
    PreExistingPath,
    Generated,
    Derived,
    /// Supplied by the operator and used verbatim; never written locally.
    ExternalReference,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFile {
    pub path: PathBuf,
    pub exists: bool,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialMaterial {
    pub private_key: KeyFile,
    pub public_key: KeyFile,
}

impl CredentialMaterial {
    /// Re-inspect the filesystem after a run.
    pub fn refresh(&mut self) {
        self.private_key.exists = self.private_key.path.exists();
        self.public_key.exists = self.public_key.path.exists();
    }

    /// Both files present. An external public key counts as present.
    pub fn is_complete(&self) -> bool {
        self.private_key.exists
            && (self.public_key.exists
                || self.public_key.provenance == Provenance::ExternalReference)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    #[error("Permission error for {identity}: {message}")]
    Permission { identity: String, message: String },

    #[error("Key generation failed for {identity}: {message}")]
    Generation { identity: String, message: String },

    #[error("Credentials for {identity} incomplete: {reason}")]
    Incomplete { identity: String, reason: String },

    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),
}
