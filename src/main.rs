//! CLI entry point for the sourcekit tool.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use sourcekit_core::config::{RuntimeConfig, load_config};
use sourcekit_core::failure::{RetryPolicy, describe, run_with_retry};
use sourcekit_core::model::{CatalogItem, ChapterEntry};
use sourcekit_core::ratelimit::RateLimiter;
use sourcekit_core::runtime::{CallOptions, SourceRuntime};
use sourcekit_core::session::SessionStore;
use sourcekit_core::source::{Source, SourceRegistry, build_default_source_registry};
use sourcekit_core::transport::ReqwestTransport;
use sourcekit_core::user_agent::default_user_agent;
use sourcekit_core::SourceError;
use tracing::{debug, info, warn};

mod cli;

use cli::{Args, Command, ItemArgs, ListingArgs};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if loaded.loaded_from_file {
        debug!(path = ?loaded.path, "configuration loaded");
    }
    let config = loaded.config.merged_with(cli_overrides(&args));
    config.validate().context("Invalid configuration")?;

    let user_agent = config.user_agent.clone().unwrap_or_else(default_user_agent);
    let transport = ReqwestTransport::new(&user_agent, config.http_timeouts())
        .context("Failed to build HTTP transport")?;
    let limiter = match config.rate_budget() {
        Some(budget) => RateLimiter::new(budget),
        None => {
            debug!("rate limiting disabled");
            RateLimiter::disabled()
        }
    };
    let sessions = Arc::new(SessionStore::new());
    if let Some(path) = config.cookies_file.as_deref() {
        load_cookies(&sessions, path)?;
    }

    let runtime = SourceRuntime::new(Arc::new(transport), Arc::new(limiter), Arc::clone(&sessions));
    let registry = build_default_source_registry(&runtime);
    let policy = RetryPolicy::with_max_attempts(args.max_retries);
    let options = config.call_options();

    let outcome = run_command(&args.command, &runtime, &registry, &policy, options).await;

    if let Some(path) = config.cookies_file.as_deref() {
        save_cookies(&sessions, path)?;
    }

    let output = outcome?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn cli_overrides(args: &Args) -> RuntimeConfig {
    RuntimeConfig {
        operation_timeout_secs: args.timeout,
        rate_limit_permits: args.rate_limit_permits,
        rate_limit_window_ms: args.rate_limit_window_ms,
        cookies_file: args.cookies.clone(),
        user_agent: args.user_agent.clone(),
        ..RuntimeConfig::default()
    }
}

async fn run_command(
    command: &Command,
    runtime: &SourceRuntime,
    registry: &SourceRegistry,
    policy: &RetryPolicy,
    options: CallOptions,
) -> Result<serde_json::Value> {
    match command {
        Command::Sources => {
            let sources: Vec<serde_json::Value> = registry
                .iter()
                .map(|source| {
                    json!({
                        "id": source.id(),
                        "name": source.name(),
                        "lang": source.lang(),
                        "base_url": source.base_url().as_str(),
                        "supports_latest": source.supports_latest(),
                    })
                })
                .collect();
            Ok(json!(sources))
        }
        Command::Filters { source } => {
            let source = lookup(registry, source)?;
            to_json(&source.declare_filters())
        }
        Command::Popular(listing) => {
            let (source, page) = listing_target(registry, listing)?;
            let result = run_with_retry(policy, || runtime.fetch_popular(source.as_ref(), page, options))
                .await
                .map_err(report)?;
            to_json(&result)
        }
        Command::Latest(listing) => {
            let (source, page) = listing_target(registry, listing)?;
            let result = run_with_retry(policy, || runtime.fetch_latest(source.as_ref(), page, options))
                .await
                .map_err(report)?;
            to_json(&result)
        }
        Command::Search {
            listing,
            query,
            filters,
        } => {
            let (source, page) = listing_target(registry, listing)?;
            let mut filter_state = source.declare_filters();
            filter_state
                .apply_params(filters)
                .with_context(|| format!("Invalid filter for source '{}'", source.id()))?;
            let result = run_with_retry(policy, || {
                runtime.search(source.as_ref(), page, query, &filter_state, options)
            })
            .await
            .map_err(report)?;
            to_json(&result)
        }
        Command::Details(item) => {
            let (source, item) = item_target(registry, item)?;
            let details = run_with_retry(policy, || runtime.fetch_details(source.as_ref(), &item, options))
                .await
                .map_err(report)?;
            to_json(&details)
        }
        Command::Chapters(item) => {
            let (source, item) = item_target(registry, item)?;
            let chapters =
                run_with_retry(policy, || runtime.fetch_chapter_list(source.as_ref(), &item, options))
                    .await
                    .map_err(report)?;
            info!(count = chapters.len(), "chapters listed");
            to_json(&chapters)
        }
        Command::Pages { item, resolve } => {
            let source = lookup(registry, &item.source)?;
            let chapter = ChapterEntry::new("", item.locator.as_str(), "");
            let pages = run_with_retry(policy, || runtime.fetch_page_list(source.as_ref(), &chapter, options))
                .await
                .map_err(report)?;
            if !*resolve {
                return to_json(&pages);
            }
            let mut resolved = Vec::with_capacity(pages.len());
            for page in &pages {
                let locators =
                    run_with_retry(policy, || runtime.resolve_page(source.as_ref(), page, options))
                        .await
                        .map_err(report)?;
                resolved.push(json!({ "index": page.index, "media": locators }));
            }
            Ok(json!(resolved))
        }
    }
}

fn lookup(registry: &SourceRegistry, id: &str) -> Result<Arc<dyn Source>> {
    registry.get(id).ok_or_else(|| {
        anyhow!(
            "Unknown source '{id}'. Available: {}",
            registry.ids().join(", ")
        )
    })
}

fn listing_target(registry: &SourceRegistry, listing: &ListingArgs) -> Result<(Arc<dyn Source>, NonZeroU32)> {
    let source = lookup(registry, &listing.source)?;
    let page = NonZeroU32::new(listing.page).context("Page numbers start at 1")?;
    Ok((source, page))
}

fn item_target(registry: &SourceRegistry, item: &ItemArgs) -> Result<(Arc<dyn Source>, CatalogItem)> {
    let source = lookup(registry, &item.source)?;
    Ok((source, CatalogItem::new(item.locator.as_str(), "")))
}

fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).context("Failed to serialize output")
}

/// Attaches the user-facing descriptor to a source failure.
fn report(error: SourceError) -> anyhow::Error {
    let descriptor = describe(&error);
    if descriptor.retryable {
        warn!(kind = ?error.kind(), "giving up after retries");
    }
    anyhow!(
        "{} {}: {error}\n  Why: {}\n  Fix: {}",
        descriptor.category.icon(),
        descriptor.what,
        descriptor.why,
        descriptor.fix
    )
}

fn load_cookies(sessions: &SessionStore, path: &Path) -> Result<()> {
    if !path.exists() {
        debug!(path = %path.display(), "cookie file not found, starting empty");
        return Ok(());
    }
    let file = File::open(path)
        .with_context(|| format!("Failed to open cookie file '{}'", path.display()))?;
    let loaded = sessions
        .load_netscape(BufReader::new(file))
        .with_context(|| format!("Failed to parse cookie file '{}'", path.display()))?;
    info!(loaded, path = %path.display(), "cookies loaded");
    Ok(())
}

fn save_cookies(sessions: &SessionStore, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create '{}'", parent.display()))?;
    }
    let file = File::create(path)
        .with_context(|| format!("Failed to write cookie file '{}'", path.display()))?;
    sessions
        .save_netscape(BufWriter::new(file))
        .with_context(|| format!("Failed to write cookie file '{}'", path.display()))?;
    debug!(cookies = sessions.len(), path = %path.display(), "cookies saved");
    Ok(())
}
