//! Provisioning identities
//!
//! An identity is a user (or the system itself) that gets its own client
//! configuration and key material. Identities are re-derived from the
//! declaration on every run; nothing about them is persisted on its own.

use std::path::PathBuf;

use crate::config::{IdentityDeclaration, SettingsLayer};
use crate::credentials::KeyLayout;

pub const DEFAULT_CONFIG_FILENAME: &str = ".mcollective";
pub const STATE_DIR: &str = ".mcollective.d";

#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub home: PathBuf,
    /// File owner for everything written on this identity's behalf.
    pub owner: String,
    pub group: String,
    pub filename: String,
    pub overrides: SettingsLayer,
}

impl Identity {
    /// Apply declaration defaults: home under `/home` (or `/root`), group
    /// named after the user, config file `.mcollective`.
    pub fn from_declaration(name: &str, decl: &IdentityDeclaration) -> Self {
        let home = decl.home.clone().unwrap_or_else(|| {
            if name == "root" {
                PathBuf::from("/root")
            } else {
                PathBuf::from("/home").join(name)
            }
        });

        Self {
            name: name.to_string(),
            home,
            owner: name.to_string(),
            group: decl.group.clone().unwrap_or_else(|| name.to_string()),
            filename: decl
                .filename
                .clone()
                .unwrap_or_else(|| DEFAULT_CONFIG_FILENAME.to_string()),
            overrides: decl.settings.clone(),
        }
    }

    /// `<home>/<filename>`
    pub fn config_path(&self) -> PathBuf {
        self.home.join(&self.filename)
    }

    /// `<home>/.mcollective.d`
    pub fn state_dir(&self) -> PathBuf {
        self.home.join(STATE_DIR)
    }

    pub fn key_layout(&self) -> KeyLayout {
        KeyLayout::under(self.state_dir(), &self.name)
    }
}
