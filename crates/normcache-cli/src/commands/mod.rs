//! CLI command implementations

pub mod config;
pub mod demo;
pub mod query;

use std::sync::Arc;

use anyhow::{Context, Result};
use normcache_config::{ConfigLoader, LinkKind, NormCacheConfig};
use normcache_core::{CacheOptions, Link, NormalizedCache, TypePolicies};
use normcache_link::{demo_server, HttpLink, HttpLinkConfig};
use tracing::debug;

use crate::GlobalOptions;

/// Load configuration with CLI overrides applied.
///
/// An explicit `--config` file replaces the global → local merge.
pub fn load_config(global: &GlobalOptions) -> Result<NormCacheConfig> {
    let overrides = global.to_config_overrides();
    let mut loader = ConfigLoader::new();

    if let Some(ref config_path) = global.config {
        if !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }
        return loader
            .load_file(config_path, Some(&overrides))
            .context("Failed to load config file");
    }

    let project_dir = std::env::current_dir().context("Failed to get current directory")?;
    loader
        .load(&project_dir, Some(&overrides))
        .context("Failed to load configuration")
}

/// Cache construction options from configuration.
pub fn cache_options(config: &NormCacheConfig) -> CacheOptions {
    let policies = config
        .cache
        .key_args()
        .fold(TypePolicies::new(), |policies, (type_name, field, args)| {
            policies.with_key_args(type_name, field, args.iter().cloned())
        });

    CacheOptions {
        type_policies: policies,
        gc_after_mutation: config.cache.gc_after_mutation,
        id_field: config.cache.id_field.clone(),
        typename_field: config.cache.typename_field.clone(),
    }
}

/// Build the configured link.
pub fn create_link(config: &NormCacheConfig) -> Result<Arc<dyn Link>> {
    match config.link.kind {
        LinkKind::Demo => {
            debug!("Using in-process demo server");
            Ok(Arc::new(demo_server()))
        }
        LinkKind::Http => {
            let link_config = config.link.headers.iter().fold(
                HttpLinkConfig::new(&config.link.uri).with_timeout(config.link.timeout_secs),
                |link_config, (name, value)| link_config.with_header(name, value),
            );
            let link = HttpLink::new(link_config).context("Failed to create HTTP link")?;
            debug!("Using GraphQL endpoint {}", link.uri());
            Ok(Arc::new(link))
        }
    }
}

/// Create a cache over the configured link.
pub fn create_cache(config: &NormCacheConfig) -> Result<NormalizedCache> {
    let link = create_link(config)?;
    Ok(NormalizedCache::with_options(link, cache_options(config)))
}

/// Print a section header (respects quiet flag).
pub fn print_header(title: &str, quiet: bool) {
    if !quiet {
        println!("\n== {} ==", title);
    }
}

/// Print a JSON value under a label (respects quiet flag).
pub fn print_json(label: &str, value: &serde_json::Value, quiet: bool) -> Result<()> {
    if !quiet {
        println!("{}:", label);
        println!("{}", serde_json::to_string_pretty(value)?);
    }
    Ok(())
}
