//! Configuration layer (C9, ambient, §4.4).
//!
//! TOML on disk, typed and validated before any port is constructed,
//! mirroring the teacher's `Config::load` + separate `validate` pass.

use crate::acl::validators::{AcceptedPattern, AttributeValidator, FixedValidator, RangeValidator, StrInCsv};
use crate::model::AclAction;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse toml: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    pub sid: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoomActionAcl {
    #[serde(default)]
    pub excludes: Vec<String>,
    #[serde(default)]
    pub acls: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclAvailable {
    #[serde(default)]
    pub acls: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AclSection {
    #[serde(default)]
    pub room: HashMap<String, RoomActionAcl>,
    #[serde(default)]
    pub available: AclAvailable,
    #[serde(default)]
    pub validation: HashMap<String, ValidationSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FormatSection {
    pub date_format: String,
}

/// The fully parsed configuration tree (§4.4).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerSection,
    #[serde(default)]
    pub acl: AclSection,
    pub database: DatabaseSection,
    pub cache: CacheSection,
    pub format: FormatSection,
}

impl Config {
    /// Parse and validate `path`, aborting before any port is built on
    /// failure (§4.4: validation failures are `Error::Fatal`).
    pub fn load(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject: an action referencing an attribute absent from
    /// `acl.available`, an unimplemented validator `type`, or a
    /// malformed `date_format` (§4.4).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let available: std::collections::HashSet<&str> =
            self.acl.available.acls.iter().map(String::as_str).collect();

        for (action, rule) in &self.acl.room {
            acl_action_from_str(action).ok_or_else(|| {
                ConfigError::Invalid(format!("acl.room has unknown action {action:?}"))
            })?;
            for attr in rule.acls.iter().chain(rule.excludes.iter()) {
                if !available.contains(attr.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "action {action:?} references attribute {attr:?} absent from acl.available"
                    )));
                }
            }
        }

        for (attr, spec) in &self.acl.validation {
            build_validator(spec).map_err(|e| {
                ConfigError::Invalid(format!("acl.validation.{attr}: {e}"))
            })?;
        }

        // A strftime template must contain at least one conversion
        // specifier to be meaningful.
        if !self.format.date_format.contains('%') {
            return Err(ConfigError::Invalid(format!(
                "format.date_format {:?} has no strftime specifiers",
                self.format.date_format
            )));
        }

        Ok(())
    }

    /// Look up the validator configured for a given ACL attribute.
    pub fn validator_for(&self, attribute: &str) -> Option<Box<dyn AttributeValidator>> {
        let spec = self.acl.validation.get(attribute)?;
        build_validator(spec).ok()
    }
}

fn acl_action_from_str(s: &str) -> Option<AclAction> {
    match s {
        "join" => Some(AclAction::Join),
        "message" => Some(AclAction::Message),
        "crossroom" => Some(AclAction::Crossroom),
        "list" => Some(AclAction::List),
        "history" => Some(AclAction::History),
        "setacl" => Some(AclAction::Setacl),
        "kick" => Some(AclAction::Kick),
        "ban" => Some(AclAction::Ban),
        _ => None,
    }
}

fn build_validator(spec: &ValidationSpec) -> Result<Box<dyn AttributeValidator>, String> {
    match spec.kind.as_str() {
        "str_in_csv" => {
            let csv = spec
                .value
                .as_deref()
                .ok_or_else(|| "str_in_csv requires a value".to_string())?;
            Ok(Box::new(StrInCsv::new(csv)))
        }
        "range" => {
            let (min, max) = spec
                .value
                .as_deref()
                .and_then(|v| v.split_once(':'))
                .and_then(|(lo, hi)| Some((lo.parse().ok()?, hi.parse().ok()?)))
                .ok_or_else(|| "range requires a value of the form \"min:max\"".to_string())?;
            Ok(Box::new(RangeValidator { min, max }))
        }
        "accepted_pattern" => match &spec.value {
            Some(pattern) => AcceptedPattern::new(pattern)
                .map(|v| Box::new(v) as Box<dyn AttributeValidator>)
                .map_err(|e| e.to_string()),
            None => Ok(Box::new(AcceptedPattern::default_pattern())),
        },
        "is_admin" | "is_super_user" | "same_room" | "same_channel" => {
            Ok(Box::new(FixedValidator::AcceptYOnly))
        }
        "disallow" => Ok(Box::new(FixedValidator::Disallow)),
        other => Err(format!("unknown validator type {other:?}")),
    }
}
