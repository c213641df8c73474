//! Raw declaration input
//!
//! A `SettingsLayer` is one tier of the default chain (global, service class
//! or identity). Every field is optional; numeric and version fields stay as
//! strings so the validation layer sees exactly what the operator wrote.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use super::settings::{ConnectorKind, LogLevel, LoggerType, ProviderKind};
use super::Secret;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsLayer {
    // Middleware
    pub middleware_hosts: Option<Vec<String>>,
    pub middleware_port: Option<String>,
    pub connector: Option<ConnectorKind>,
    pub middleware_ssl: Option<bool>,
    pub middleware_ssl_ca: Option<PathBuf>,
    pub middleware_ssl_cert: Option<PathBuf>,
    pub middleware_ssl_key: Option<PathBuf>,
    pub middleware_user: Option<String>,
    pub middleware_password: Option<Secret>,

    // Security provider
    pub securityprovider: Option<ProviderKind>,
    pub psk: Option<Secret>,
    pub psk_callertype: Option<String>,
    pub sshkey_private_key: Option<PathBuf>,
    pub sshkey_private_key_content: Option<Secret>,
    pub sshkey_public_key: Option<PathBuf>,
    pub sshkey_publickey_dir: Option<PathBuf>,
    pub sshkey_known_hosts: Option<PathBuf>,
    pub sshkey_send_key: Option<String>,
    pub sshkey_learn_public_keys: Option<bool>,
    pub sshkey_overwrite_stored_keys: Option<bool>,
    pub ssl_server_cert: Option<PathBuf>,
    pub ssl_server_key: Option<PathBuf>,
    pub ssl_ca_cert: Option<PathBuf>,
    pub symmetric_plugin: Option<String>,
    pub symmetric_options: Option<BTreeMap<String, String>>,

    // Logging
    pub logger_type: Option<LoggerType>,
    pub loglevel: Option<LogLevel>,
    pub logfile: Option<PathBuf>,
    pub keeplogs: Option<String>,
    pub max_log_size: Option<String>,

    // Discovery
    pub discovery_method: Option<String>,
    pub discovery_options: Option<Vec<String>>,
    pub direct_addressing_threshold: Option<String>,

    // Collectives
    pub main_collective: Option<String>,
    pub collectives: Option<Vec<String>>,

    // Packaging and system layout
    pub etcdir: Option<PathBuf>,
    pub client_package: Option<String>,
    pub server_package: Option<String>,
    pub version: Option<String>,
}

/// One entry of the `identities` mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IdentityDeclaration {
    pub home: Option<PathBuf>,
    pub group: Option<String>,
    /// Config file name relative to the home directory.
    pub filename: Option<String>,
    pub settings: SettingsLayer,
}

/// A complete provisioning declaration as loaded from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Declaration {
    pub global: SettingsLayer,
    pub services: BTreeMap<String, SettingsLayer>,
    pub identities: BTreeMap<String, IdentityDeclaration>,
}
