//! Knights & Kings CLI
//!
//! Resolves region identifiers against a domain data snapshot and reports on
//! the caches behind the resolver.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use knk_cache::CacheConfig;
use knk_core::constants::{ENV_CACHE_TTL_SECONDS, ENV_LOAD_TIMEOUT_MS};
use knk_core::types::{DomainRegionQuery, RegionResolution, ResolutionEntry, ResolutionStatus};
use knk_core::RequestContext;
use knk_provider::FileProvider;
use knk_regions::{CacheManager, RegionDomainResolver, RegionTransitionService, ResolverConfig};

/// Knights & Kings - region and domain resolution
#[derive(Parser)]
#[command(name = "knk")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Cache time-to-live in seconds
    #[arg(long, global = true, env = ENV_CACHE_TTL_SECONDS)]
    ttl_seconds: Option<u64>,

    /// Per-load timeout in milliseconds
    #[arg(long, global = true, env = ENV_LOAD_TIMEOUT_MS)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve region ids into their domain hierarchy
    Resolve {
        /// Domain data snapshot (JSON)
        #[arg(short, long)]
        data: PathBuf,
        /// List leaves before their towns
        #[arg(long)]
        bottom_up: bool,
        /// Print entries as JSON
        #[arg(long)]
        json: bool,
        /// Region ids to resolve
        #[arg(required = true)]
        regions: Vec<String>,
    },

    /// Print cache health, optionally after resolving some regions
    Health {
        /// Domain data snapshot (JSON)
        #[arg(short, long)]
        data: PathBuf,
        /// Region ids to resolve first
        regions: Vec<String>,
    },

    /// Decide whether a move between region sets is allowed
    Transition {
        /// Domain data snapshot (JSON)
        #[arg(short, long)]
        data: PathBuf,
        /// Regions the player is leaving (comma separated)
        #[arg(long, value_delimiter = ',')]
        from: Vec<String>,
        /// Regions the player is entering (comma separated)
        #[arg(long, value_delimiter = ',')]
        to: Vec<String>,
    },
}

/// Every component, wired once at startup and passed explicitly.
struct AppContext {
    manager: CacheManager,
    resolver: Arc<RegionDomainResolver>,
    transitions: RegionTransitionService,
    request: RequestContext,
}

impl AppContext {
    async fn build(data: &Path, config: &CacheConfig) -> Result<Self> {
        let provider = Arc::new(
            FileProvider::load(data)
                .await
                .with_context(|| format!("Failed to load domain data from {}", data.display()))?,
        );

        let manager = CacheManager::new(provider.clone(), config);
        let resolver_config = match config.timeout() {
            Some(timeout) => ResolverConfig::default().with_load_timeout(timeout),
            None => ResolverConfig::default(),
        };
        let resolver = manager
            .build_resolver(provider, resolver_config)
            .context("Failed to attach resolver")?;
        let transitions = RegionTransitionService::new(resolver.clone());
        debug!(data = %data.display(), ttl_secs = config.ttl().as_secs(), "Application context ready");

        Ok(Self {
            manager,
            resolver,
            transitions,
            request: RequestContext::new(),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "knk=debug,info"
    } else {
        "knk=info,warn"
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cache_config(cli.ttl_seconds, cli.timeout_ms)?;

    match cli.command {
        Commands::Resolve {
            data,
            bottom_up,
            json,
            regions,
        } => cmd_resolve(&data, &config, regions, !bottom_up, json).await,
        Commands::Health { data, regions } => cmd_health(&data, &config, regions).await,
        Commands::Transition { data, from, to } => cmd_transition(&data, &config, from, to).await,
    }
}

/// Environment (and `.env`) first, then flags.
fn cache_config(ttl_seconds: Option<u64>, timeout_ms: Option<u64>) -> Result<CacheConfig> {
    let mut config = CacheConfig::from_env().context("Invalid cache configuration")?;
    if let Some(ttl) = ttl_seconds {
        config.ttl_seconds = ttl;
    }
    if let Some(timeout) = timeout_ms {
        config = config.load_timeout(Duration::from_millis(timeout));
    }
    Ok(config)
}

/// Resolve regions and print each entry
async fn cmd_resolve(
    data: &Path,
    config: &CacheConfig,
    regions: Vec<String>,
    top_down: bool,
    json: bool,
) -> Result<()> {
    let app = AppContext::build(data, config).await?;
    let query = DomainRegionQuery::new(regions, top_down);
    let resolution = app.resolver.resolve(&query, &app.request).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&to_json(&resolution))?);
        return Ok(());
    }

    println!(
        "{} {} region(s), {}",
        "🔍 Resolving".cyan().bold(),
        query.region_ids.len(),
        if top_down { "top-down" } else { "bottom-up" }
    );
    println!();
    for entry in &resolution.entries {
        print_entry(entry);
    }

    let access = resolution.effective_access();
    println!();
    println!(
        "   {} entry {}, exit {}",
        "Effective:".yellow(),
        allow_mark(access.allow_entry),
        allow_mark(access.allow_exit)
    );
    if resolution.is_partial() {
        println!(
            "\n{}",
            "⚠️  Some regions could not be resolved; see FAILED entries above.".yellow()
        );
    }

    Ok(())
}

/// Print cache health
async fn cmd_health(data: &Path, config: &CacheConfig, regions: Vec<String>) -> Result<()> {
    let app = AppContext::build(data, config).await?;

    if !regions.is_empty() {
        let warmed = app.resolver.warm_cache(regions.iter().cloned(), &app.request).await;
        println!(
            "{} {}/{} region(s)",
            "🔥 Warmed".cyan().bold(),
            warmed,
            regions.len()
        );
        println!();
    }

    println!("{}", app.manager.health_summary());
    app.manager.log_metrics();
    Ok(())
}

/// Evaluate a move between two region sets
async fn cmd_transition(data: &Path, config: &CacheConfig, from: Vec<String>, to: Vec<String>) -> Result<()> {
    let app = AppContext::build(data, config).await?;
    let decision = app.transitions.evaluate(from, to, &app.request).await;

    let verdict = if decision.allowed {
        "✅ Allowed".green().bold()
    } else {
        "⛔ Denied".red().bold()
    };
    println!("{} ({:?})", verdict, decision.kind);
    match &decision.message {
        Some(message) => println!("   {}", message),
        None => println!("   {}", "(no message)".dimmed()),
    }

    Ok(())
}

fn print_entry(entry: &ResolutionEntry) {
    let summary = &entry.summary;
    let domain = summary
        .domain_ref()
        .map(|d| d.to_string())
        .unwrap_or_else(|| "-".to_string());
    let marker = if entry.is_requested() { "*" } else { " " };

    println!(
        "   {} {:<10} {:<14} {}",
        marker,
        status_label(entry.status),
        domain,
        summary.label()
    );
    if entry.status.is_usable() {
        println!(
            "      {} entry {}, exit {}  {} entry {}, exit {}",
            "own:".dimmed(),
            allow_mark(summary.allow_entry),
            allow_mark(summary.allow_exit),
            "effective:".dimmed(),
            allow_mark(entry.effective.allow_entry),
            allow_mark(entry.effective.allow_exit)
        );
    }
    match (&entry.error, entry.status) {
        (Some(err), ResolutionStatus::Failed) => println!("      {} {}", "error:".red(), err),
        (Some(err), _) => println!("      {}", err.to_string().dimmed()),
        (None, _) => {}
    }
    if entry.requested_by.len() > 1 {
        println!("      {} {}", "via:".dimmed(), entry.requested_by.join(", "));
    }
}

fn status_label(status: ResolutionStatus) -> ColoredString {
    match status {
        ResolutionStatus::Resolved => "RESOLVED".green(),
        ResolutionStatus::Stale => "STALE".yellow(),
        ResolutionStatus::Unmapped => "UNMAPPED".dimmed(),
        ResolutionStatus::Failed => "FAILED".red(),
    }
}

fn allow_mark(allowed: bool) -> ColoredString {
    if allowed {
        "yes".green()
    } else {
        "no".red()
    }
}

fn to_json(resolution: &RegionResolution) -> serde_json::Value {
    let entries: Vec<_> = resolution
        .entries
        .iter()
        .map(|entry| {
            serde_json::json!({
                "status": entry.status,
                "requested_by": entry.requested_by,
                "effective": entry.effective,
                "summary": entry.summary,
                "error": entry.error.as_ref().map(|e| e.to_string()),
            })
        })
        .collect();
    serde_json::json!({
        "entries": entries,
        "effective": resolution.effective_access(),
    })
}
