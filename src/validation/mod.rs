//! Input validation
//!
//! Shape, length and charset checks on raw declaration fields. Runs before
//! resolution and before any filesystem mutation. A violation in the global
//! or service tiers aborts the whole run; a violation inside one identity's
//! declaration only disqualifies that identity.

use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

use crate::config::{IdentityDeclaration, SettingsLayer};

pub const NAME_PATTERN: &str = "[._0-9A-Za-z-]+";
pub const MIN_USERNAME_LEN: usize = 5;
pub const MIN_PASSWORD_LEN: usize = 12;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[._0-9A-Za-z-]+$").expect("name pattern compiles"));
static DIGITS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+$").expect("digits pattern compiles"));
static VERSION_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[._0-9A-Za-z:~+-]+$").expect("version pattern compiles"));

/// Which part of the declaration a violation belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    Global,
    Identity(String),
}

impl Scope {
    pub fn identity(name: &str) -> Self {
        Self::Identity(name.to_string())
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("global"),
            Self::Identity(name) => write!(f, "identity '{}'", name),
        }
    }
}

/// The specific rule a field broke.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constraint {
    Charset(&'static str),
    Digits,
    OutOfRange,
    VersionSpec,
    MinLength(usize),
    Required,
    RequiredByProvider(&'static str),
    /// `.` and `..` would escape the directory they are joined onto.
    DotsOnly,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charset(pattern) => write!(f, "must match {}", pattern),
            Self::Digits => f.write_str("must contain only digits"),
            Self::OutOfRange => f.write_str("is out of range"),
            Self::VersionSpec => {
                f.write_str("must be 'present', 'latest', 'absent' or an explicit version")
            }
            Self::MinLength(min) => write!(f, "must be at least {} characters", min),
            Self::Required => f.write_str("is required"),
            Self::RequiredByProvider(provider) => {
                write!(f, "is required by the '{}' security provider", provider)
            }
            Self::DotsOnly => f.write_str("must not consist only of dots"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid {field} ({scope}): {constraint}")]
pub struct ValidationError {
    pub scope: Scope,
    pub field: String,
    pub constraint: Constraint,
}

impl ValidationError {
    pub fn new(scope: &Scope, field: &str, constraint: Constraint) -> Self {
        Self {
            scope: scope.clone(),
            field: field.to_string(),
            constraint,
        }
    }
}

pub fn check_name(scope: &Scope, field: &str, value: &str) -> Result<(), ValidationError> {
    if !NAME_RE.is_match(value) {
        return Err(ValidationError::new(scope, field, Constraint::Charset(NAME_PATTERN)));
    }
    if value.chars().all(|c| c == '.') {
        return Err(ValidationError::new(scope, field, Constraint::DotsOnly));
    }
    Ok(())
}

pub fn check_digits(scope: &Scope, field: &str, value: &str) -> Result<(), ValidationError> {
    if DIGITS_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new(scope, field, Constraint::Digits))
    }
}

pub fn check_version_spec(scope: &Scope, field: &str, value: &str) -> Result<(), ValidationError> {
    match value {
        "present" | "latest" | "absent" => Ok(()),
        token if VERSION_TOKEN_RE.is_match(token) => Ok(()),
        _ => Err(ValidationError::new(scope, field, Constraint::VersionSpec)),
    }
}

pub fn check_min_length(
    scope: &Scope,
    field: &str,
    char_len: usize,
    min: usize,
) -> Result<(), ValidationError> {
    if char_len >= min {
        Ok(())
    } else {
        Err(ValidationError::new(scope, field, Constraint::MinLength(min)))
    }
}

/// Validate every raw field of one settings tier.
pub fn validate_layer(scope: &Scope, layer: &SettingsLayer) -> Result<(), ValidationError> {
    if let Some(user) = &layer.middleware_user {
        check_min_length(scope, "middleware_user", user.chars().count(), MIN_USERNAME_LEN)?;
    }
    if let Some(password) = &layer.middleware_password {
        check_min_length(scope, "middleware_password", password.char_len(), MIN_PASSWORD_LEN)?;
    }

    let numeric = [
        ("middleware_port", &layer.middleware_port),
        ("keeplogs", &layer.keeplogs),
        ("max_log_size", &layer.max_log_size),
        ("direct_addressing_threshold", &layer.direct_addressing_threshold),
    ];
    for (field, value) in numeric {
        if let Some(value) = value {
            check_digits(scope, field, value)?;
        }
    }

    if let Some(version) = &layer.version {
        check_version_spec(scope, "version", version)?;
    }

    if let Some(main) = &layer.main_collective {
        check_name(scope, "main_collective", main)?;
    }
    for collective in layer.collectives.iter().flatten() {
        check_name(scope, "collectives", collective)?;
    }
    for package in [&layer.client_package, &layer.server_package].into_iter().flatten() {
        check_name(scope, "package", package)?;
    }
    if let Some(plugin) = &layer.symmetric_plugin {
        check_name(scope, "symmetric_plugin", plugin)?;
    }

    Ok(())
}

/// Validate the tiers shared by every identity. Any error here is fatal to
/// the run.
pub fn validate_global(
    global: &SettingsLayer,
    services: &BTreeMap<String, SettingsLayer>,
) -> Result<(), ValidationError> {
    let scope = Scope::Global;
    validate_layer(&scope, global)?;
    for (class, layer) in services {
        check_name(&scope, "service class", class)?;
        validate_layer(&scope, layer)?;
    }
    Ok(())
}

/// Validate one identity's declaration in isolation.
pub fn validate_identity(name: &str, decl: &IdentityDeclaration) -> Result<(), ValidationError> {
    let scope = Scope::identity(name);
    check_name(&scope, "identity", name)?;
    if let Some(group) = &decl.group {
        check_name(&scope, "group", group)?;
    }
    if let Some(filename) = &decl.filename {
        check_name(&scope, "filename", filename)?;
    }
    validate_layer(&scope, &decl.settings)
}
