//! Demo command - Replay the entries scenario
//!
//! Walks a cache through the full lifecycle against the configured link:
//! 1. cache-only read of `entries(search: "1")` (a miss)
//! 2. cache-only watchers for `search: "1"` and `search: "2"`
//! 3. network-only queries filling both slots
//! 4. `removeEntry(1)`, committed
//! 5. `removeEntryFailed(2)`, rolled back
//! 6. eviction of every `entries` slot followed by garbage collection
//!
//! Watcher deliveries and cache snapshots are printed as they happen.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use normcache_core::{FetchPolicy, NormalizedCache, QueryResult, WatchHandle};
use normcache_link::{entries_query, remove_entry, remove_entry_failed, search_variables};
use serde_json::json;
use tracing::{info, warn};

use super::{create_cache, load_config, print_header, print_json};
use crate::GlobalOptions;

/// Arguments for the demo command
#[derive(Args, Debug)]
pub struct DemoArgs {
    /// Pause between steps, in milliseconds
    #[arg(long, default_value = "0")]
    pub step_delay_ms: u64,

    /// Print cache metrics at the end
    #[arg(long)]
    pub metrics: bool,
}

/// Execute the demo command
pub async fn execute(args: DemoArgs, global: GlobalOptions) -> Result<()> {
    let config = load_config(&global)?;
    let cache = create_cache(&config)?;
    let quiet = global.quiet;
    let delay = Duration::from_millis(args.step_delay_ms);

    info!("Running entries demo over the {} link", config.link.kind);

    print_header("query entries from cache", quiet);
    let cached = cache
        .query(&entries_query(), &search_variables("1"), FetchPolicy::CacheOnly)
        .await
        .context("Cache-only query failed")?;
    print_result("search 1", &cached, quiet)?;

    print_header("setup watchQueries", quiet);
    let watchers = vec![watch(&cache, "1", quiet), watch(&cache, "2", quiet)];
    pause(delay).await;
    print_cache(&cache, quiet)?;

    print_header("trigger queries", quiet);
    futures::future::try_join(
        cache.query(&entries_query(), &search_variables("1"), FetchPolicy::NetworkOnly),
        cache.query(&entries_query(), &search_variables("2"), FetchPolicy::NetworkOnly),
    )
    .await
    .context("Network-only entries query failed")?;
    pause(delay).await;
    print_cache(&cache, quiet)?;

    print_header("removeEntry", quiet);
    cache
        .mutate(remove_entry("1"))
        .await
        .context("removeEntry failed")?;
    print_cache(&cache, quiet)?;
    pause(delay).await;

    print_header("removeEntryFailed", quiet);
    if let Err(e) = cache.mutate(remove_entry_failed("2")).await {
        warn!("removeEntryFailed rejected: {}", e);
    }
    print_cache(&cache, quiet)?;
    pause(delay).await;

    print_header("removeCachedEntriesQueries", quiet);
    let removed = cache.evict_slot("entries");
    let report = cache.gc();
    info!(
        "Evicted {} entries slot(s) and {} entit(ies)",
        removed,
        report.count()
    );
    print_cache(&cache, quiet)?;

    for handle in watchers {
        handle.unsubscribe();
    }

    if args.metrics {
        print_json("metrics", &serde_json::to_value(cache.metrics())?, false)?;
    }

    Ok(())
}

fn watch(cache: &NormalizedCache, search: &str, quiet: bool) -> WatchHandle {
    let label = format!("search {}", search);
    cache.watch(
        entries_query(),
        search_variables(search),
        FetchPolicy::CacheOnly,
        move |result| {
            if quiet {
                return;
            }
            println!("\nentries watchQuery ({})", label);
            println!("data: {}", render_data(result));
        },
    )
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

fn print_result(label: &str, result: &QueryResult, quiet: bool) -> Result<()> {
    if !quiet {
        println!("{}", label);
        println!("data: {}", render_data(result));
    }
    Ok(())
}

fn print_cache(cache: &NormalizedCache, quiet: bool) -> Result<()> {
    print_json("cache", &cache.extract(), quiet)
}

fn render_data(result: &QueryResult) -> String {
    match result.data {
        Some(ref data) => data.to_string(),
        None => json!(null).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use normcache_core::ResultSource;

    #[test]
    fn test_render_miss_as_null() {
        let miss = QueryResult {
            data: None,
            errors: Vec::new(),
            source: ResultSource::Cache,
        };
        assert_eq!(render_data(&miss), "null");
    }

    #[test]
    fn test_render_data_compact() {
        let hit = QueryResult {
            data: Some(json!({"entries": [{"__typename": "Entry", "id": "1"}]})),
            errors: Vec::new(),
            source: ResultSource::Network,
        };
        assert_eq!(
            render_data(&hit),
            r#"{"entries":[{"__typename":"Entry","id":"1"}]}"#
        );
    }
}
