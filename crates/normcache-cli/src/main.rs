//! normcache CLI - Normalized query cache playground
//!
//! Drives a [`normcache_core::NormalizedCache`] from the command line against
//! the in-process demo server or a GraphQL endpoint.
//!
//! # Usage
//!
//! ```bash
//! # Replay the entries scenario against the built-in server
//! normcache demo
//!
//! # Same scenario against a running GraphQL server, paced like a human
//! normcache --uri http://localhost:4000/ demo --step-delay-ms 2000
//!
//! # One-off query
//! normcache query --search 1
//!
//! # Inspect configuration
//! normcache config show
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use normcache_config::LinkKind;
use tracing::Level;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod commands;

/// normcache - Normalized client-side query cache
#[derive(Parser, Debug)]
#[command(name = "normcache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Path to configuration file (skips global and local config)
    #[arg(long, short = 'c', global = true, env = "NORMCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// GraphQL endpoint (implies the http link)
    #[arg(long, global = true, env = "NORMCACHE_URI")]
    uri: Option<String>,

    /// Link to use (demo, http)
    #[arg(long, global = true, env = "NORMCACHE_LINK", value_parser = parse_link_kind)]
    link: Option<LinkKind>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,
}

/// Parse link kind from string
fn parse_link_kind(s: &str) -> Result<LinkKind, String> {
    s.parse()
        .map_err(|e: normcache_config::ConfigError| e.to_string())
}

impl GlobalOptions {
    /// Convert global options to config overrides
    pub fn to_config_overrides(&self) -> normcache_config::ConfigOverrides {
        normcache_config::ConfigOverrides {
            uri: self.uri.clone(),
            link_kind: self.link,
            timeout_secs: self.timeout_secs,
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay the entries scenario: watchers, queries, mutations, eviction
    Demo(commands::demo::DemoArgs),

    /// Run a single entries query and print the cache afterwards
    Query(commands::query::QueryArgs),

    /// View and manage configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

/// Install the stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise `--quiet`/`--verbose`, then the
/// configured level.
fn init_logging(global: &GlobalOptions, configured: Option<&str>) -> Result<()> {
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
        return Ok(());
    }

    let log_level = if global.quiet {
        Level::ERROR
    } else if global.verbose {
        Level::DEBUG
    } else {
        configured
            .and_then(|level| level.parse().ok())
            .unwrap_or(Level::INFO)
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config file is reported by the command itself
    let configured = commands::load_config(&cli.global)
        .ok()
        .map(|config| config.logging.level);
    init_logging(&cli.global, configured.as_deref())?;

    match cli.command {
        Commands::Demo(args) => commands::demo::execute(args, cli.global).await,
        Commands::Query(args) => commands::query::execute(args, cli.global).await,
        Commands::Config(cmd) => commands::config::execute(cmd, cli.global).await,
    }
}
