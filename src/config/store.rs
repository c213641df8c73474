//! Sources of the three-tier default chain

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::layer::{Declaration, IdentityDeclaration, SettingsLayer};
use super::ConfigError;

/// Supplies the global, service-class and per-identity tiers.
pub trait ConfigurationStore: Send + Sync {
    fn global(&self) -> &SettingsLayer;

    fn services(&self) -> &BTreeMap<String, SettingsLayer>;

    fn identities(&self) -> &BTreeMap<String, IdentityDeclaration>;

    fn service(&self, class: &str) -> Option<&SettingsLayer> {
        self.services().get(class)
    }
}

/// Declaration loaded from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
    declaration: Declaration,
}

impl JsonConfigStore {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path)
            .map_err(|e| ConfigError::IoError(format!("{}: {}", path.display(), e)))?;
        let declaration: Declaration = serde_json::from_slice(&data)
            .map_err(|e| ConfigError::DeserializationError(format!("{}: {}", path.display(), e)))?;

        log::debug!(
            "Loaded declaration from {} ({} identities)",
            path.display(),
            declaration.identities.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            declaration,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn declaration(&self) -> &Declaration {
        &self.declaration
    }
}

impl ConfigurationStore for JsonConfigStore {
    fn global(&self) -> &SettingsLayer {
        &self.declaration.global
    }

    fn services(&self) -> &BTreeMap<String, SettingsLayer> {
        &self.declaration.services
    }

    fn identities(&self) -> &BTreeMap<String, IdentityDeclaration> {
        &self.declaration.identities
    }
}

/// Declaration assembled in code.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigStore {
    declaration: Declaration,
}

impl StaticConfigStore {
    pub fn new(global: SettingsLayer) -> Self {
        Self {
            declaration: Declaration {
                global,
                ..Default::default()
            },
        }
    }

    pub fn with_service(mut self, class: &str, layer: SettingsLayer) -> Self {
        self.declaration.services.insert(class.to_string(), layer);
        self
    }

    pub fn with_identity(mut self, name: &str, decl: IdentityDeclaration) -> Self {
        self.declaration.identities.insert(name.to_string(), decl);
        self
    }
}

impl From<Declaration> for StaticConfigStore {
    fn from(declaration: Declaration) -> Self {
        Self { declaration }
    }
}

impl ConfigurationStore for StaticConfigStore {
    fn global(&self) -> &SettingsLayer {
        &self.declaration.global
    }

    fn services(&self) -> &BTreeMap<String, SettingsLayer> {
        &self.declaration.services
    }

    fn identities(&self) -> &BTreeMap<String, IdentityDeclaration> {
        &self.declaration.identities
    }
}
