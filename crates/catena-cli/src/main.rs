use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use catena_client::{
    FileProxySource, HttpProxySource, ReqwestFetcher, collect_links, page_links, summarize_html,
};
use catena_core::traits::ProxySource;
use catena_core::{ChainConfig, ChainEngine, ChainStep, CrawlConfig, ProxyPool};
use catena_store::{FileStore, StoreKind};

const DEFAULT_PROBE_URL: &str = "https://httpbin.org/ip";

#[derive(Parser)]
#[command(name = "catena", version, about = "Chained web crawler with a self-healing proxy pool")]
struct Cli {
    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crawl URLs, optionally following links through several steps
    Crawl(CrawlArgs),

    /// Fetch proxies from sources, validate them and export the working ones
    Proxies(ProxyArgs),
}

#[derive(Args)]
struct CrawlArgs {
    /// Start URLs
    urls: Vec<String>,

    /// File with one start URL per line (# comments allowed)
    #[arg(long, env = "CATENA_URLS_FILE")]
    urls_file: Option<PathBuf>,

    /// Number of link-following steps before the final page step
    #[arg(long, default_value_t = 0)]
    follow: usize,

    /// Cap on the URLs fetched per step
    #[arg(long, env = "CATENA_MAX_URLS_PER_STEP")]
    max_urls_per_step: Option<usize>,

    /// Concurrent requests
    #[arg(short, long, env = "CATENA_WORKERS")]
    workers: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(long, env = "CATENA_TIMEOUT")]
    timeout: Option<u64>,

    /// Retries after the first attempt
    #[arg(long, env = "CATENA_RETRIES")]
    retries: Option<u32>,

    /// Base retry delay in milliseconds
    #[arg(long, env = "CATENA_RETRY_DELAY_MS")]
    retry_delay: Option<u64>,

    /// Fetch directly, without proxies
    #[arg(long, default_value_t = false)]
    no_proxy: bool,

    #[command(flatten)]
    proxies: ProxySourceArgs,

    /// Probe every proxy before crawling and drop the ones that fail
    #[arg(long, default_value_t = false)]
    validate_proxies: bool,

    /// URL fetched through each proxy during validation
    #[arg(long, env = "CATENA_PROBE_URL", default_value = DEFAULT_PROBE_URL)]
    probe_url: String,

    /// Extra request header, e.g. 'Accept-Language: de-DE' (repeatable)
    #[arg(long = "header", value_name = "'K: V'")]
    headers: Vec<String>,

    /// User-Agent sent with every request
    #[arg(long, env = "CATENA_USER_AGENT")]
    user_agent: Option<String>,

    /// Accept invalid TLS certificates
    #[arg(long, default_value_t = false)]
    insecure: bool,

    /// Output format: json, jsonl or per-url
    #[arg(long, env = "CATENA_STORAGE", default_value = "json")]
    storage: StoreKind,

    /// Output file (json, jsonl) or directory (per-url)
    #[arg(short, long, env = "CATENA_OUTPUT")]
    output: Option<PathBuf>,

    /// JSON config file; flags override its values
    #[arg(short, long, env = "CATENA_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Args)]
struct ProxySourceArgs {
    /// Proxy list endpoint (repeatable); built-in public lists when omitted
    #[arg(long = "proxy-source", value_name = "URL")]
    sources: Vec<String>,

    /// Local proxy list, one per line
    #[arg(long, env = "CATENA_PROXY_FILE")]
    proxy_file: Option<PathBuf>,
}

#[derive(Args)]
struct ProxyArgs {
    /// Proxy list endpoint (repeatable); built-in public lists when omitted
    #[arg(long = "source", value_name = "URL")]
    sources: Vec<String>,

    /// Local proxy list, one per line
    #[arg(long, env = "CATENA_PROXY_FILE")]
    proxy_file: Option<PathBuf>,

    /// Probe every proxy and drop the ones that fail
    #[arg(long, default_value_t = false)]
    validate: bool,

    /// URL fetched through each proxy during validation
    #[arg(long, env = "CATENA_PROBE_URL", default_value = DEFAULT_PROBE_URL)]
    probe_url: String,

    /// Concurrent probes
    #[arg(short, long, default_value_t = 32)]
    workers: usize,

    /// Probe timeout in seconds
    #[arg(long, default_value_t = 10)]
    timeout: u64,

    /// Write working proxies to this file, one per line
    #[arg(long)]
    export: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("warn,catena_core={level},catena_client={level},catena_store={level},catena={level}"))
        }))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Crawl(args) => cmd_crawl(args).await,
        Commands::Proxies(args) => cmd_proxies(args).await,
    }
}

async fn cmd_crawl(args: CrawlArgs) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => CrawlConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => CrawlConfig::default(),
    };
    apply_overrides(&mut config.chain, &args);
    config.validate().map_err(|e| anyhow::anyhow!(e))?;

    let urls = collect_urls(&args.urls, args.urls_file.as_deref())?;
    if urls.is_empty() {
        bail!("No URLs given. Pass them as arguments or with --urls-file.");
    }

    let mut builder = ReqwestFetcher::builder_from_config(&config.chain.fetch);
    if let Some(ua) = &args.user_agent {
        builder = builder.user_agent(ua);
    }
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        builder = builder.header(name, value);
    }
    let fetcher = builder.build().context("Failed to create HTTP client")?;

    let pool = if config.chain.fetch.use_proxy {
        let mut sources = config.proxy.sources.clone();
        sources.extend(args.proxies.sources.iter().cloned());
        let pool = ProxyPool::new(config.proxy.clone()).with_sources(build_sources(
            &sources,
            args.proxies.proxy_file.as_deref(),
        )?);

        let report = pool.fetch().await;
        tracing::info!(
            added = report.added,
            sources = report.sources_queried,
            failed_sources = report.sources_failed,
            "Loaded proxies"
        );
        if args.validate_proxies && !pool.is_empty() {
            let validation = pool
                .validate(
                    &fetcher,
                    &args.probe_url,
                    config.chain.concurrency_limit,
                    config.chain.fetch.timeout(),
                )
                .await;
            let removed = pool.remove_failed();
            tracing::info!(working = validation.working, removed, "Proxies validated");
        }
        Some(pool)
    } else {
        None
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(args.storage.default_path()));
    let store = FileStore::new(args.storage, &output);

    let mut engine = ChainEngine::new(build_steps(args.follow), config.chain, fetcher, store)
        .map_err(|e| anyhow::anyhow!(e))?;
    if let Some(pool) = pool {
        engine = engine.with_proxy_pool(pool);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, finishing in-flight requests");
            on_signal.cancel();
        }
    });

    let outcome = engine
        .run_with_cancel(urls, cancel)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    tracing::info!(
        state = %outcome.state,
        saved = engine.storage().saved_count(),
        output = %output.display(),
        "Crawl finished"
    );

    let summary = json!({
        "state": outcome.state,
        "output": output.display().to_string(),
        "pending_urls": outcome.pending_urls.len(),
        "stats": outcome.stats,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

async fn cmd_proxies(args: ProxyArgs) -> Result<()> {
    let pool = ProxyPool::default().with_sources(build_sources(
        &args.sources,
        args.proxy_file.as_deref(),
    )?);

    let fetched = pool.fetch().await;
    tracing::info!(
        added = fetched.added,
        duplicates = fetched.duplicates,
        rejected = fetched.rejected,
        "Fetched proxies"
    );

    let validation = if args.validate && !pool.is_empty() {
        let fetcher = ReqwestFetcher::builder()
            .timeout(Duration::from_secs(args.timeout))
            .build()
            .context("Failed to create HTTP client")?;
        let report = pool
            .validate(
                &fetcher,
                &args.probe_url,
                args.workers,
                Duration::from_secs(args.timeout),
            )
            .await;
        pool.remove_failed();
        Some(report)
    } else {
        None
    };

    if let Some(path) = &args.export {
        let addresses = pool.healthy_addresses();
        write_proxy_list(path, &addresses)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(count = addresses.len(), path = %path.display(), "Exported proxies");
    }

    let summary = json!({
        "fetch": fetched,
        "validation": validation,
        "pool": pool.stats(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    Ok(())
}

/// Flags win over the config file.
fn apply_overrides(chain: &mut ChainConfig, args: &CrawlArgs) {
    if let Some(workers) = args.workers {
        chain.concurrency_limit = workers;
    }
    if let Some(cap) = args.max_urls_per_step {
        chain.max_urls_per_step = Some(cap);
    }
    if let Some(secs) = args.timeout {
        chain.fetch.timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(retries) = args.retries {
        chain.fetch.max_retries = retries;
    }
    if let Some(delay) = args.retry_delay {
        chain.fetch.retry_base_delay_ms = delay;
        chain.fetch.max_retry_delay_ms = chain.fetch.max_retry_delay_ms.max(delay);
    }
    if args.no_proxy {
        chain.fetch.use_proxy = false;
    }
    if args.insecure {
        chain.fetch.verify_ssl = false;
    }
}

/// `follow` link steps, then a summarizing step.
fn build_steps(follow: usize) -> Vec<ChainStep> {
    let mut steps: Vec<ChainStep> = (1..=follow)
        .map(|i| ChainStep::new(format!("links-{i}"), collect_links).with_extractor(page_links))
        .collect();
    steps.push(ChainStep::new("pages", summarize_html));
    steps
}

/// Explicit sources plus the proxy file; the built-in lists when neither is given.
fn build_sources(urls: &[String], file: Option<&Path>) -> Result<Vec<Arc<dyn ProxySource>>> {
    let mut sources = if urls.is_empty() && file.is_none() {
        HttpProxySource::defaults()?
    } else {
        HttpProxySource::from_urls(urls.iter().cloned())?
    };
    if let Some(path) = file {
        sources.push(Arc::new(FileProxySource::new(path)));
    }
    Ok(sources)
}

/// Arguments first, then the file; duplicates dropped, order kept.
fn collect_urls(args: &[String], file: Option<&Path>) -> Result<Vec<String>> {
    let from_file = match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read URL file: {}", path.display()))?,
        None => String::new(),
    };
    let lines = from_file
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'));

    let mut seen = HashSet::new();
    Ok(args
        .iter()
        .map(|u| u.trim())
        .chain(lines)
        .filter(|u| !u.is_empty() && seen.insert(u.to_string()))
        .map(String::from)
        .collect())
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("Invalid header '{raw}', expected 'Name: value'");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header '{raw}', name is empty");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

fn write_proxy_list(path: &Path, addresses: &[String]) -> std::io::Result<()> {
    let mut body = addresses.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    std::fs::write(path, body)
}
