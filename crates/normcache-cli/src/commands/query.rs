//! Query command - Run a single entries query

use anyhow::{Context, Result};
use clap::Args;
use normcache_core::FetchPolicy;
use normcache_link::{entries_query, search_variables};
use serde_json::json;

use super::{create_cache, load_config, print_json};
use crate::GlobalOptions;

/// Arguments for the query command
#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Search term passed as the `search` argument
    #[arg(long, short = 's', default_value = "1")]
    pub search: String,

    /// Fetch policy (network-only, cache-only)
    #[arg(long, short = 'p', default_value = "network-only", value_parser = parse_policy)]
    pub policy: FetchPolicy,

    /// Also print the normalized cache contents
    #[arg(long)]
    pub show_cache: bool,
}

fn parse_policy(s: &str) -> Result<FetchPolicy, String> {
    s.parse()
}

/// Execute the query command
pub async fn execute(args: QueryArgs, global: GlobalOptions) -> Result<()> {
    let config = load_config(&global)?;
    let cache = create_cache(&config)?;

    let result = cache
        .query(&entries_query(), &search_variables(&args.search), args.policy)
        .await
        .with_context(|| format!("entries query ({}) failed", args.policy))?;

    let output = json!({
        "slot": cache.slot_for(&entries_query(), &search_variables(&args.search)).to_string(),
        "result": result,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    if args.show_cache {
        print_json("cache", &cache.extract(), global.quiet)?;
    }

    Ok(())
}
