//! normcache Configuration Management
//!
//! Provides configuration loading with support for:
//! - Global config: `~/.normcache/config.toml`
//! - Local config: `.normcache/config.toml` (in the working directory)
//! - CLI overrides via `ConfigOverrides`
//!
//! Configuration is merged in order: global → local → CLI overrides.

mod error;
mod loader;

pub use error::{ConfigError, FileOp};
pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default GraphQL endpoint.
pub const DEFAULT_URI: &str = "http://localhost:4000/";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default entity id field.
pub const DEFAULT_ID_FIELD: &str = "id";

/// Default entity type name field.
pub const DEFAULT_TYPENAME_FIELD: &str = "__typename";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration for normcache.
///
/// Represents the fully merged configuration from all sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct NormCacheConfig {
    /// Cache behaviour
    pub cache: CacheConfig,

    /// Network link
    pub link: LinkConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Cache configuration.
///
/// # Example TOML
///
/// ```toml
/// [cache]
/// gc_after_mutation = true
/// id_field = "id"
///
/// [cache.type_policies.Query.entries]
/// key_args = ["search"]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Field policies per type name, then field name
    pub type_policies: BTreeMap<String, BTreeMap<String, FieldPolicy>>,

    /// Run garbage collection after each mutation resolves
    pub gc_after_mutation: bool,

    /// Field holding an entity's id
    pub id_field: String,

    /// Field holding an entity's type name
    pub typename_field: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            type_policies: BTreeMap::new(),
            gc_after_mutation: true,
            id_field: DEFAULT_ID_FIELD.to_string(),
            typename_field: DEFAULT_TYPENAME_FIELD.to_string(),
        }
    }
}

impl CacheConfig {
    /// Declared key arguments as `(type, field, args)`, sorted.
    pub fn key_args(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.type_policies.iter().flat_map(|(type_name, fields)| {
            fields.iter().filter_map(move |(field, policy)| {
                policy
                    .key_args
                    .as_deref()
                    .map(|args| (type_name.as_str(), field.as_str(), args))
            })
        })
    }
}

/// Policy for a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FieldPolicy {
    /// Arguments that identify the field's slot (`None` = all arguments)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_args: Option<Vec<String>>,
}

/// Which link the CLI talks to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkKind {
    /// In-process demo server
    #[default]
    Demo,
    /// GraphQL over HTTP
    Http,
}

impl std::fmt::Display for LinkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "demo"),
            Self::Http => write!(f, "http"),
        }
    }
}

impl std::str::FromStr for LinkKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "demo" | "local" => Ok(Self::Demo),
            "http" | "remote" => Ok(Self::Http),
            _ => Err(ConfigError::invalid_value(
                "link.kind",
                format!("unknown link '{}', expected 'demo' or 'http'", s),
            )),
        }
    }
}

/// Network link configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Link implementation
    pub kind: LinkKind,

    /// GraphQL endpoint (http link)
    pub uri: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Extra headers sent with every request
    pub headers: BTreeMap<String, String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            kind: LinkKind::default(),
            uri: DEFAULT_URI.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            headers: BTreeMap::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// CLI overrides for configuration values.
///
/// Used to apply command-line arguments over file-based config.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override link implementation
    pub link_kind: Option<LinkKind>,

    /// Override endpoint
    pub uri: Option<String>,

    /// Override request timeout
    pub timeout_secs: Option<u64>,

    /// Override post-mutation garbage collection
    pub gc_after_mutation: Option<bool>,

    /// Override log level
    pub log_level: Option<String>,
}

impl NormCacheConfig {
    /// Apply CLI overrides to this configuration.
    ///
    /// Giving a URI implies the http link unless a link kind is given too.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref uri) = overrides.uri {
            self.link.uri = uri.clone();
            self.link.kind = LinkKind::Http;
        }

        if let Some(kind) = overrides.link_kind {
            self.link.kind = kind;
        }

        if let Some(timeout) = overrides.timeout_secs {
            self.link.timeout_secs = timeout;
        }

        if let Some(gc) = overrides.gc_after_mutation {
            self.cache.gc_after_mutation = gc;
        }

        if let Some(ref level) = overrides.log_level {
            self.logging.level = level.clone();
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.id_field.is_empty() {
            return Err(ConfigError::invalid_value("cache.id_field", "must not be empty"));
        }
        if self.cache.typename_field.is_empty() {
            return Err(ConfigError::invalid_value(
                "cache.typename_field",
                "must not be empty",
            ));
        }
        for (type_name, field, args) in self.cache.key_args() {
            if args.iter().any(String::is_empty) {
                return Err(ConfigError::invalid_value(
                    format!("cache.type_policies.{}.{}.key_args", type_name, field),
                    "argument names must not be empty",
                ));
            }
        }
        if self.link.kind == LinkKind::Http && self.link.uri.is_empty() {
            return Err(ConfigError::invalid_value(
                "link.uri",
                "required for the http link",
            ));
        }
        if self.link.timeout_secs == 0 {
            return Err(ConfigError::invalid_value(
                "link.timeout_secs",
                "must be greater than 0",
            ));
        }
        if !LOG_LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.level",
                format!("unknown level '{}'", self.logging.level),
            ));
        }
        Ok(())
    }
}
