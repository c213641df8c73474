//! Layered settings resolution
//!
//! Precedence, highest first: identity override, service class, global,
//! hardcoded constant. Each field is resolved on its own; a later tier
//! missing a value never stops an earlier tier from supplying it.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use super::layer::SettingsLayer;
use super::settings::{
    BrokerEndpoint, ConnectorKind, DiscoveryPolicy, LogDestination, LogLevel, LoggerType,
    LoggingPolicy, ProviderKind, PskConfig, ResolvedSettings, SecurityProvider, SshKeyConfig,
    SymmetricConfig, TlsConfig, VersionSpec,
};
use super::Secret;
use crate::validation::{Constraint, Scope, ValidationError};

pub mod defaults {
    pub const CONNECTOR: &str = "activemq";
    pub const PORT: u16 = 61613;
    pub const TLS_PORT: u16 = 61614;
    pub const MIDDLEWARE_USER: &str = "mcollective";
    pub const MIDDLEWARE_PASSWORD: &str = "marionette";
    pub const PSK_CALLERTYPE: &str = "uid";
    pub const LOGFILE: &str = "/var/log/mcollective.log";
    pub const KEEPLOGS: u32 = 5;
    pub const MAX_LOG_SIZE: u64 = 2_097_152;
    pub const DISCOVERY_METHOD: &str = "mc";
    pub const DIRECT_ADDRESSING_THRESHOLD: u32 = 10;
    pub const COLLECTIVE: &str = "mcollective";
    pub const ETCDIR: &str = "/etc/mcollective";
    pub const CLIENT_PACKAGE: &str = "mcollective-client";
    pub const SERVER_PACKAGE: &str = "mcollective";
    pub const SERVER_CERT_FILE: &str = "server_public.pem";
}

/// The three tiers, highest precedence first.
pub struct LayerChain<'a> {
    layers: [&'a SettingsLayer; 3],
}

impl<'a> LayerChain<'a> {
    pub fn new(
        global: &'a SettingsLayer,
        service: &'a SettingsLayer,
        identity: &'a SettingsLayer,
    ) -> Self {
        Self {
            layers: [identity, service, global],
        }
    }

    /// First tier that sets the field.
    pub fn pick<T, F>(&self, field: F) -> Option<&'a T>
    where
        F: Fn(&'a SettingsLayer) -> Option<&'a T>,
    {
        self.layers.iter().copied().find_map(field)
    }
}

fn parse_number<T: FromStr>(
    scope: &Scope,
    field: &str,
    raw: Option<&String>,
    fallback: T,
) -> Result<T, ValidationError> {
    match raw {
        None => Ok(fallback),
        Some(raw) => {
            if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ValidationError::new(scope, field, Constraint::Digits));
            }
            raw.parse::<T>()
                .map_err(|_| ValidationError::new(scope, field, Constraint::OutOfRange))
        }
    }
}

fn resolve_broker(chain: &LayerChain<'_>, scope: &Scope) -> Result<BrokerEndpoint, ValidationError> {
    let hosts = chain
        .pick(|l| l.middleware_hosts.as_ref())
        .cloned()
        .unwrap_or_default();
    if hosts.is_empty() || hosts.iter().any(|h| h.trim().is_empty()) {
        return Err(ValidationError::new(scope, "middleware_hosts", Constraint::Required));
    }

    let tls_enabled = chain.pick(|l| l.middleware_ssl.as_ref()).copied().unwrap_or(false);
    let default_port = if tls_enabled {
        defaults::TLS_PORT
    } else {
        defaults::PORT
    };
    let port = parse_number(
        scope,
        "middleware_port",
        chain.pick(|l| l.middleware_port.as_ref()),
        default_port,
    )?;

    Ok(BrokerEndpoint {
        hosts,
        port,
        connector: chain
            .pick(|l| l.connector.as_ref())
            .copied()
            .unwrap_or(ConnectorKind::Activemq),
        tls_enabled,
        tls_ca: chain.pick(|l| l.middleware_ssl_ca.as_ref()).cloned(),
        tls_cert: chain.pick(|l| l.middleware_ssl_cert.as_ref()).cloned(),
        tls_key: chain.pick(|l| l.middleware_ssl_key.as_ref()).cloned(),
        user: chain
            .pick(|l| l.middleware_user.as_ref())
            .cloned()
            .unwrap_or_else(|| defaults::MIDDLEWARE_USER.to_string()),
        password: chain
            .pick(|l| l.middleware_password.as_ref())
            .cloned()
            .unwrap_or_else(|| Secret::from(defaults::MIDDLEWARE_PASSWORD)),
    })
}

fn resolve_security(
    chain: &LayerChain<'_>,
    scope: &Scope,
    etcdir: &Path,
) -> Result<SecurityProvider, ValidationError> {
    let kind = chain
        .pick(|l| l.securityprovider.as_ref())
        .copied()
        .unwrap_or(ProviderKind::Psk);

    let provider = match kind {
        ProviderKind::Psk => {
            let key = chain
                .pick(|l| l.psk.as_ref())
                .filter(|key| !key.is_empty())
                .cloned()
                .ok_or_else(|| {
                    ValidationError::new(scope, "psk", Constraint::RequiredByProvider("psk"))
                })?;
            SecurityProvider::PreSharedKey(PskConfig {
                key,
                caller_type: chain
                    .pick(|l| l.psk_callertype.as_ref())
                    .cloned()
                    .unwrap_or_else(|| defaults::PSK_CALLERTYPE.to_string()),
            })
        }
        ProviderKind::Sshkey => SecurityProvider::SshKey(SshKeyConfig {
            private_key_path: chain.pick(|l| l.sshkey_private_key.as_ref()).cloned(),
            private_key_content: chain
                .pick(|l| l.sshkey_private_key_content.as_ref())
                .filter(|content| !content.is_empty())
                .cloned(),
            public_key: chain.pick(|l| l.sshkey_public_key.as_ref()).cloned(),
            public_key_dir: chain.pick(|l| l.sshkey_publickey_dir.as_ref()).cloned(),
            known_hosts: chain.pick(|l| l.sshkey_known_hosts.as_ref()).cloned(),
            send_key: chain.pick(|l| l.sshkey_send_key.as_ref()).cloned(),
            learn_public_keys: chain
                .pick(|l| l.sshkey_learn_public_keys.as_ref())
                .copied()
                .unwrap_or(false),
            overwrite_stored_keys: chain
                .pick(|l| l.sshkey_overwrite_stored_keys.as_ref())
                .copied()
                .unwrap_or(false),
        }),
        ProviderKind::Ssl => {
            let ca_cert = chain.pick(|l| l.ssl_ca_cert.as_ref()).cloned().ok_or_else(|| {
                ValidationError::new(scope, "ssl_ca_cert", Constraint::RequiredByProvider("ssl"))
            })?;
            SecurityProvider::Tls(TlsConfig {
                server_cert: chain
                    .pick(|l| l.ssl_server_cert.as_ref())
                    .cloned()
                    .unwrap_or_else(|| etcdir.join("ssl").join(defaults::SERVER_CERT_FILE)),
                server_key: chain.pick(|l| l.ssl_server_key.as_ref()).cloned(),
                ca_cert,
            })
        }
        ProviderKind::Symmetric => {
            let plugin = chain
                .pick(|l| l.symmetric_plugin.as_ref())
                .filter(|plugin| !plugin.is_empty())
                .cloned()
                .ok_or_else(|| {
                    ValidationError::new(
                        scope,
                        "symmetric_plugin",
                        Constraint::RequiredByProvider("symmetric"),
                    )
                })?;
            SecurityProvider::OtherSymmetric(SymmetricConfig {
                plugin,
                options: chain
                    .pick(|l| l.symmetric_options.as_ref())
                    .cloned()
                    .unwrap_or_default(),
            })
        }
    };

    Ok(provider)
}

fn resolve_logging(chain: &LayerChain<'_>, scope: &Scope) -> Result<LoggingPolicy, ValidationError> {
    let destination = match chain
        .pick(|l| l.logger_type.as_ref())
        .copied()
        .unwrap_or(LoggerType::Console)
    {
        LoggerType::Console => LogDestination::Console,
        LoggerType::Syslog => LogDestination::Syslog,
        LoggerType::File => LogDestination::File(
            chain
                .pick(|l| l.logfile.as_ref())
                .cloned()
                .unwrap_or_else(|| PathBuf::from(defaults::LOGFILE)),
        ),
    };

    Ok(LoggingPolicy {
        destination,
        level: chain.pick(|l| l.loglevel.as_ref()).copied().unwrap_or(LogLevel::Warn),
        keep_logs: parse_number(
            scope,
            "keeplogs",
            chain.pick(|l| l.keeplogs.as_ref()),
            defaults::KEEPLOGS,
        )?,
        max_size: parse_number(
            scope,
            "max_log_size",
            chain.pick(|l| l.max_log_size.as_ref()),
            defaults::MAX_LOG_SIZE,
        )?,
    })
}

fn resolve_discovery(
    chain: &LayerChain<'_>,
    scope: &Scope,
) -> Result<DiscoveryPolicy, ValidationError> {
    Ok(DiscoveryPolicy {
        method: chain
            .pick(|l| l.discovery_method.as_ref())
            .cloned()
            .unwrap_or_else(|| defaults::DISCOVERY_METHOD.to_string()),
        options: chain
            .pick(|l| l.discovery_options.as_ref())
            .cloned()
            .unwrap_or_default(),
        direct_addressing_threshold: parse_number(
            scope,
            "direct_addressing_threshold",
            chain.pick(|l| l.direct_addressing_threshold.as_ref()),
            defaults::DIRECT_ADDRESSING_THRESHOLD,
        )?,
    })
}

/// Merge the three tiers into one resolved record.
///
/// `scope` tags any error with the part of the declaration being resolved;
/// pass `Scope::Global` together with an empty identity layer for the
/// system-wide configuration.
pub fn resolve(
    global: &SettingsLayer,
    service: &SettingsLayer,
    identity: &SettingsLayer,
    scope: &Scope,
) -> Result<ResolvedSettings, ValidationError> {
    let chain = LayerChain::new(global, service, identity);

    let etcdir = chain
        .pick(|l| l.etcdir.as_ref())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(defaults::ETCDIR));

    let version = match chain.pick(|l| l.version.as_ref()) {
        None => VersionSpec::Present,
        Some(raw) => raw
            .parse::<VersionSpec>()
            .map_err(|_| ValidationError::new(scope, "version", Constraint::VersionSpec))?,
    };

    let main_collective = chain
        .pick(|l| l.main_collective.as_ref())
        .cloned()
        .unwrap_or_else(|| defaults::COLLECTIVE.to_string());
    let collectives = chain
        .pick(|l| l.collectives.as_ref())
        .filter(|c| !c.is_empty())
        .cloned()
        .unwrap_or_else(|| vec![main_collective.clone()]);

    Ok(ResolvedSettings {
        broker: resolve_broker(&chain, scope)?,
        security: resolve_security(&chain, scope, &etcdir)?,
        logging: resolve_logging(&chain, scope)?,
        discovery: resolve_discovery(&chain, scope)?,
        main_collective,
        collectives,
        client_package: chain
            .pick(|l| l.client_package.as_ref())
            .cloned()
            .unwrap_or_else(|| defaults::CLIENT_PACKAGE.to_string()),
        server_package: chain
            .pick(|l| l.server_package.as_ref())
            .cloned()
            .unwrap_or_else(|| defaults::SERVER_PACKAGE.to_string()),
        version,
        etcdir,
    })
}
