//! Configuration loader with inheritance support.
//!
//! Loads configuration from multiple sources and merges them:
//! 1. Global config: `~/.normcache/config.toml`
//! 2. Local config: `.normcache/config.toml` (in the project directory)
//! 3. CLI overrides
//!
//! Later sources override earlier ones.

use crate::error::ConfigError;
use crate::{
    CacheConfig, ConfigOverrides, LinkConfig, LinkKind, LoggingConfig, NormCacheConfig,
    DEFAULT_ID_FIELD, DEFAULT_TIMEOUT_SECS, DEFAULT_TYPENAME_FIELD, DEFAULT_URI,
};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Configuration file name.
const CONFIG_FILE_NAME: &str = "config.toml";

/// Global and local configuration directory name.
const CONFIG_DIR: &str = ".normcache";

/// Configuration loader with caching and inheritance support.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    /// Global config directory (e.g., `~/.normcache`)
    global_config_dir: Option<PathBuf>,

    /// Cached global config
    global_config: Option<NormCacheConfig>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader.
    ///
    /// Automatically detects the global config directory (`~/.normcache`).
    pub fn new() -> Self {
        Self {
            global_config_dir: dirs::home_dir().map(|h| h.join(CONFIG_DIR)),
            global_config: None,
        }
    }

    /// Create a loader with a custom global config directory.
    pub fn with_global_dir(global_dir: impl Into<PathBuf>) -> Self {
        Self {
            global_config_dir: Some(global_dir.into()),
            global_config: None,
        }
    }

    /// Get the global config file path.
    pub fn global_config_path(&self) -> Option<PathBuf> {
        self.global_config_dir
            .as_ref()
            .map(|d| d.join(CONFIG_FILE_NAME))
    }

    /// Get the local config file path for a project directory.
    pub fn local_config_path(&self, project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE_NAME)
    }

    /// Load configuration for a project directory with optional CLI overrides.
    ///
    /// Merges config in order: global → local → overrides, then validates.
    pub fn load(
        &mut self,
        project_dir: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<NormCacheConfig, ConfigError> {
        let mut config = NormCacheConfig::default();

        if let Some(global_config) = self.load_global()? {
            config = merge_configs(config, global_config);
        }

        if let Some(local_config) = self.load_local(project_dir)? {
            config = merge_configs(config, local_config);
        }

        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a single file, ignoring global and local configs.
    pub fn load_file(
        &self,
        path: &Path,
        overrides: Option<&ConfigOverrides>,
    ) -> Result<NormCacheConfig, ConfigError> {
        debug!("Loading config from {:?}", path);
        let mut config = load_config_file(path)?;
        if let Some(ovr) = overrides {
            config.apply_overrides(ovr);
        }
        config.validate()?;
        Ok(config)
    }

    /// Load only the global configuration.
    pub fn load_global(&mut self) -> Result<Option<NormCacheConfig>, ConfigError> {
        if let Some(ref config) = self.global_config {
            return Ok(Some(config.clone()));
        }

        let Some(global_path) = self.global_config_path() else {
            debug!("No home directory found, skipping global config");
            return Ok(None);
        };

        if !global_path.exists() {
            trace!("Global config not found at {:?}", global_path);
            return Ok(None);
        }

        debug!("Loading global config from {:?}", global_path);
        let config = load_config_file(&global_path)?;
        self.global_config = Some(config.clone());

        Ok(Some(config))
    }

    /// Load only the local configuration for a project directory.
    pub fn load_local(&self, project_dir: &Path) -> Result<Option<NormCacheConfig>, ConfigError> {
        let local_path = self.local_config_path(project_dir);

        if !local_path.exists() {
            trace!("Local config not found at {:?}", local_path);
            return Ok(None);
        }

        debug!("Loading local config from {:?}", local_path);
        load_config_file(&local_path).map(Some)
    }

    /// Save configuration to the global config file.
    pub fn save_global(&self, config: &NormCacheConfig) -> Result<(), ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };

        save_config_file(&global_dir.join(CONFIG_FILE_NAME), config)
    }

    /// Save configuration to the local config file for a project directory.
    pub fn save_local(
        &self,
        project_dir: &Path,
        config: &NormCacheConfig,
    ) -> Result<(), ConfigError> {
        save_config_file(&self.local_config_path(project_dir), config)
    }

    /// Initialize global configuration.
    ///
    /// Creates `~/.normcache/config.toml` with default configuration. An
    /// existing file is left alone.
    pub fn init_global(&self) -> Result<PathBuf, ConfigError> {
        let Some(ref global_dir) = self.global_config_dir else {
            return Err(ConfigError::NoHomeDir);
        };
        init_config_dir(global_dir)
    }

    /// Initialize local configuration for a project directory.
    ///
    /// Creates `.normcache/config.toml` with default configuration.
    pub fn init_local(&self, project_dir: &Path) -> Result<PathBuf, ConfigError> {
        init_config_dir(&project_dir.join(CONFIG_DIR))
    }

    /// Clear cached global configuration.
    ///
    /// Forces reload on next `load_global()` call.
    pub fn clear_cache(&mut self) {
        self.global_config = None;
    }
}

fn init_config_dir(dir: &Path) -> Result<PathBuf, ConfigError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::create_dir(dir, e))?;
    }

    let config_path = dir.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        save_config_file(&config_path, &NormCacheConfig::default())?;
    }

    Ok(config_path)
}

/// Load a configuration file from disk.
fn load_config_file(path: &Path) -> Result<NormCacheConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::read_file(path, e))?;

    toml::from_str(&content).map_err(|e| ConfigError::parse_toml(path, e))
}

/// Save a configuration file to disk.
fn save_config_file(path: &Path, config: &NormCacheConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::create_dir(parent, e))?;
        }
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|e| ConfigError::write_file(path, e))
}

/// Merge two configurations, with `overlay` taking precedence.
///
/// Field-by-field, so partial files only override what they set.
fn merge_configs(base: NormCacheConfig, overlay: NormCacheConfig) -> NormCacheConfig {
    NormCacheConfig {
        cache: merge_cache(base.cache, overlay.cache),
        link: merge_link(base.link, overlay.link),
        logging: merge_logging(base.logging, overlay.logging),
    }
}

/// Merge cache config. Type policies merge per field.
fn merge_cache(base: CacheConfig, overlay: CacheConfig) -> CacheConfig {
    CacheConfig {
        type_policies: {
            let mut policies = base.type_policies;
            for (type_name, fields) in overlay.type_policies {
                policies.entry(type_name).or_default().extend(fields);
            }
            policies
        },
        gc_after_mutation: base.gc_after_mutation && overlay.gc_after_mutation,
        id_field: if overlay.id_field != DEFAULT_ID_FIELD {
            overlay.id_field
        } else {
            base.id_field
        },
        typename_field: if overlay.typename_field != DEFAULT_TYPENAME_FIELD {
            overlay.typename_field
        } else {
            base.typename_field
        },
    }
}

/// Merge link config.
fn merge_link(base: LinkConfig, overlay: LinkConfig) -> LinkConfig {
    LinkConfig {
        kind: if overlay.kind != LinkKind::default() {
            overlay.kind
        } else {
            base.kind
        },
        uri: if overlay.uri != DEFAULT_URI {
            overlay.uri
        } else {
            base.uri
        },
        timeout_secs: if overlay.timeout_secs != DEFAULT_TIMEOUT_SECS {
            overlay.timeout_secs
        } else {
            base.timeout_secs
        },
        headers: {
            let mut headers = base.headers;
            headers.extend(overlay.headers);
            headers
        },
    }
}

/// Merge logging config.
fn merge_logging(base: LoggingConfig, overlay: LoggingConfig) -> LoggingConfig {
    LoggingConfig {
        level: if overlay.level != "info" {
            overlay.level
        } else {
            base.level
        },
    }
}
