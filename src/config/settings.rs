//! Fully resolved settings
//!
//! These types are what the resolver produces and the renderer consumes.
//! Every field has a concrete value; optionality only remains where the
//! rendered configuration itself treats a setting as optional.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use super::Secret;
use crate::credentials::CredentialMaterial;

/// Middleware connector plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    Activemq,
    Rabbitmq,
}

impl ConnectorKind {
    pub fn plugin_name(&self) -> &'static str {
        match self {
            Self::Activemq => "activemq",
            Self::Rabbitmq => "rabbitmq",
        }
    }
}

/// Security provider selector as it appears in the raw declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Psk,
    Sshkey,
    Ssl,
    Symmetric,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Psk => "psk",
            Self::Sshkey => "sshkey",
            Self::Ssl => "ssl",
            Self::Symmetric => "symmetric",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoggerType {
    Console,
    File,
    Syslog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// Desired package state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Present,
    Latest,
    Absent,
    Exact(String),
}

impl FromStr for VersionSpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "present" | "installed" => Ok(Self::Present),
            "latest" => Ok(Self::Latest),
            "absent" => Ok(Self::Absent),
            "" => Err("empty version specifier".to_string()),
            other => Ok(Self::Exact(other.to_string())),
        }
    }
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Present => f.write_str("present"),
            Self::Latest => f.write_str("latest"),
            Self::Absent => f.write_str("absent"),
            Self::Exact(version) => f.write_str(version),
        }
    }
}

/// Where the middleware lives and how to reach it.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerEndpoint {
    pub hosts: Vec<String>,
    pub port: u16,
    pub connector: ConnectorKind,
    pub tls_enabled: bool,
    pub tls_ca: Option<PathBuf>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub user: String,
    pub password: Secret,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PskConfig {
    pub key: Secret,
    pub caller_type: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SshKeyConfig {
    pub private_key_path: Option<PathBuf>,
    pub private_key_content: Option<Secret>,
    /// Externally supplied public key. Used verbatim, never derived.
    pub public_key: Option<PathBuf>,
    pub public_key_dir: Option<PathBuf>,
    pub known_hosts: Option<PathBuf>,
    pub send_key: Option<String>,
    pub learn_public_keys: bool,
    pub overwrite_stored_keys: bool,
}

impl SshKeyConfig {
    /// Pin the key paths to the material the provisioner settled on so the
    /// rendered configuration references the real files.
    pub fn bind(&mut self, material: &CredentialMaterial) {
        self.private_key_path = Some(material.private_key.path.clone());
        self.public_key = Some(material.public_key.path.clone());
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TlsConfig {
    pub server_cert: PathBuf,
    pub server_key: Option<PathBuf>,
    pub ca_cert: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymmetricConfig {
    pub plugin: String,
    pub options: BTreeMap<String, String>,
}

/// Exactly one provider is active per resolved record.
#[derive(Debug, Clone, PartialEq)]
pub enum SecurityProvider {
    PreSharedKey(PskConfig),
    SshKey(SshKeyConfig),
    Tls(TlsConfig),
    OtherSymmetric(SymmetricConfig),
}

impl SecurityProvider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::PreSharedKey(_) => ProviderKind::Psk,
            Self::SshKey(_) => ProviderKind::Sshkey,
            Self::Tls(_) => ProviderKind::Ssl,
            Self::OtherSymmetric(_) => ProviderKind::Symmetric,
        }
    }

    /// Value of `securityprovider` in the rendered configuration.
    pub fn plugin_name(&self) -> &str {
        match self {
            Self::PreSharedKey(_) => "psk",
            Self::SshKey(_) => "sshkey",
            Self::Tls(_) => "ssl",
            Self::OtherSymmetric(config) => &config.plugin,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LogDestination {
    Console,
    File(PathBuf),
    Syslog,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingPolicy {
    pub destination: LogDestination,
    pub level: LogLevel,
    /// Number of rotated files to keep.
    pub keep_logs: u32,
    /// Rotation threshold in bytes.
    pub max_size: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryPolicy {
    pub method: String,
    pub options: Vec<String>,
    pub direct_addressing_threshold: u32,
}

/// The merged record handed to the template renderer.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSettings {
    pub broker: BrokerEndpoint,
    pub security: SecurityProvider,
    pub logging: LoggingPolicy,
    pub discovery: DiscoveryPolicy,
    pub main_collective: String,
    pub collectives: Vec<String>,
    pub etcdir: PathBuf,
    pub client_package: String,
    pub server_package: String,
    pub version: VersionSpec,
}

impl ResolvedSettings {
    pub fn client_config_path(&self) -> PathBuf {
        self.etcdir.join("client.cfg")
    }

    pub fn ssl_dir(&self) -> PathBuf {
        self.etcdir.join("ssl")
    }

    pub fn shared_key_dir(&self) -> PathBuf {
        self.etcdir.join("sshkey")
    }
}
