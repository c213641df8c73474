//! `client.cfg` renderer
//!
//! Emits the flat `key = value` format the messaging client reads. Keys
//! are written in a fixed order so identical settings always render to
//! identical bytes, which is what keeps config writes idempotent.

use super::{CollabError, TemplateRenderer};
use crate::config::{LogDestination, ResolvedSettings, SecurityProvider};

const HEADER: &str = "# Managed by mco-provision. Local changes will be overwritten.";

#[derive(Debug, Clone, Default)]
pub struct ClientCfgRenderer;

impl ClientCfgRenderer {
    pub fn new() -> Self {
        Self
    }
}

struct Lines(Vec<(String, String)>);

impl Lines {
    fn set(&mut self, key: impl Into<String>, value: impl ToString) {
        self.0.push((key.into(), value.to_string()));
    }

    fn finish(self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for (key, value) in self.0 {
            out.push_str(&key);
            out.push_str(" = ");
            out.push_str(&value);
            out.push('\n');
        }
        out
    }
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

impl TemplateRenderer for ClientCfgRenderer {
    fn render(&self, settings: &ResolvedSettings) -> Result<String, CollabError> {
        let mut lines = Lines(Vec::new());

        lines.set("main_collective", &settings.main_collective);
        lines.set("collectives", settings.collectives.join(","));

        // Middleware pool
        let broker = &settings.broker;
        let connector = broker.connector.plugin_name();
        lines.set("connector", connector);
        lines.set(format!("plugin.{}.pool.size", connector), broker.hosts.len());
        for (index, host) in broker.hosts.iter().enumerate() {
            let prefix = format!("plugin.{}.pool.{}", connector, index + 1);
            lines.set(format!("{}.host", prefix), host);
            lines.set(format!("{}.port", prefix), broker.port);
            lines.set(format!("{}.user", prefix), &broker.user);
            lines.set(format!("{}.password", prefix), broker.password.expose());
            lines.set(format!("{}.ssl", prefix), flag(broker.tls_enabled));
            if broker.tls_enabled {
                if let Some(ca) = &broker.tls_ca {
                    lines.set(format!("{}.ssl.ca", prefix), ca.display());
                }
                if let Some(cert) = &broker.tls_cert {
                    lines.set(format!("{}.ssl.cert", prefix), cert.display());
                }
                if let Some(key) = &broker.tls_key {
                    lines.set(format!("{}.ssl.key", prefix), key.display());
                }
            }
        }

        // Security provider
        lines.set("securityprovider", settings.security.plugin_name());
        match &settings.security {
            SecurityProvider::PreSharedKey(psk) => {
                lines.set("plugin.psk", psk.key.expose());
                lines.set("plugin.psk.callertype", &psk.caller_type);
            }
            SecurityProvider::SshKey(ssh) => {
                if let Some(path) = &ssh.private_key_path {
                    lines.set("plugin.sshkey.client.private_key", path.display());
                }
                if let Some(path) = &ssh.public_key {
                    lines.set("plugin.sshkey.client.public_key", path.display());
                }
                if let Some(dir) = &ssh.public_key_dir {
                    lines.set("plugin.sshkey.client.publickey_dir", dir.display());
                }
                if let Some(path) = &ssh.known_hosts {
                    lines.set("plugin.sshkey.client.known_hosts", path.display());
                }
                if let Some(send_key) = &ssh.send_key {
                    lines.set("plugin.sshkey.client.send_key", send_key);
                }
                lines.set(
                    "plugin.sshkey.client.learn_public_keys",
                    flag(ssh.learn_public_keys),
                );
                lines.set(
                    "plugin.sshkey.client.overwrite_stored_keys",
                    flag(ssh.overwrite_stored_keys),
                );
            }
            SecurityProvider::Tls(tls) => {
                lines.set("plugin.ssl_server_public", tls.server_cert.display());
                lines.set("plugin.ssl_ca_cert", tls.ca_cert.display());
            }
            SecurityProvider::OtherSymmetric(symmetric) => {
                for (key, value) in &symmetric.options {
                    lines.set(format!("plugin.{}.{}", symmetric.plugin, key), value);
                }
            }
        }

        // Logging
        let logging = &settings.logging;
        match &logging.destination {
            LogDestination::Console => lines.set("logger_type", "console"),
            LogDestination::Syslog => lines.set("logger_type", "syslog"),
            LogDestination::File(path) => {
                lines.set("logger_type", "file");
                lines.set("logfile", path.display());
            }
        }
        lines.set("loglevel", logging.level);
        lines.set("keeplogs", logging.keep_logs);
        lines.set("max_log_size", logging.max_size);

        // Discovery
        let discovery = &settings.discovery;
        lines.set("default_discovery_method", &discovery.method);
        if !discovery.options.is_empty() {
            lines.set("default_discovery_options", discovery.options.join(","));
        }
        lines.set("direct_addressing", "1");
        lines.set(
            "direct_addressing_threshold",
            discovery.direct_addressing_threshold,
        );

        Ok(lines.finish())
    }
}
