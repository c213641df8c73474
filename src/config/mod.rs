//! Layered configuration
//!
//! - `layer`: raw, all-optional input tiers as written by the operator
//! - `resolver`: merges global → service class → identity into one record
//! - `settings`: the resolved record handed to the renderer
//! - `store`: where the tiers come from (JSON file or built in code)

pub mod layer;
pub mod resolver;
pub mod secret;
pub mod settings;
pub mod store;

pub use layer::{Declaration, IdentityDeclaration, SettingsLayer};
pub use resolver::{defaults, resolve, LayerChain};
pub use secret::Secret;
pub use settings::{
    BrokerEndpoint, ConnectorKind, DiscoveryPolicy, LogDestination, LogLevel, LoggerType,
    LoggingPolicy, ProviderKind, PskConfig, ResolvedSettings, SecurityProvider, SshKeyConfig,
    SymmetricConfig, TlsConfig, VersionSpec,
};
pub use store::{ConfigurationStore, JsonConfigStore, StaticConfigStore};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}
