//! ShieldScout CLI
//!
//! Scans a captured page dump against a detector catalog and prints the
//! detection results with a summary.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use shieldscout::collector::SignalCollector;
use shieldscout::collector::StaticPage;
use shieldscout::coordinator::Coordinator;
use shieldscout::storage::{
    KeyValueStore, MemoryStore, StaticCookies, KEY_ENABLED, KEY_SHOW_FINGERPRINTING,
};
use shieldscout::{aggregate, CatalogLoader, FsCatalogSource, ScoutConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "shieldscout")]
#[command(author, version, about = "Anti-bot, CAPTCHA, and fingerprinting detection scanner")]
struct Args {
    /// Path to the detector catalog directory (index.json plus
    /// per-category definition files)
    #[arg(short = 'd', long, default_value = "detectors")]
    catalog: PathBuf,

    /// Path to the captured page dump (JSON)
    #[arg(short, long)]
    page: PathBuf,

    /// Path to configuration file (JSON or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Exclude fingerprinting detectors from results
    #[arg(long)]
    hide_fingerprinting: bool,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_logging(json: bool, level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let env_filter = EnvFilter::from_default_env().add_directive(level.into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, &args.log_level);

    // Load configuration
    let config: ScoutConfig = if let Some(config_path) = &args.config {
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("reading config {}", config_path.display()))?;
        if config_path
            .extension()
            .is_some_and(|e| e == "yaml" || e == "yml")
        {
            serde_yaml::from_str(&content)?
        } else {
            serde_json::from_str(&content)?
        }
    } else {
        ScoutConfig::default()
    };

    // Load the page dump
    let content = std::fs::read_to_string(&args.page)
        .with_context(|| format!("reading page dump {}", args.page.display()))?;
    let page: StaticPage = serde_json::from_str(&content)
        .with_context(|| format!("parsing page dump {}", args.page.display()))?;

    info!(
        catalog = %args.catalog.display(),
        url = %page.url,
        "Scanning page dump"
    );

    // Assemble the snapshot from the dump. Global checks run once; the
    // delayed re-checks only matter against a live page.
    let cookies = page.cookies.clone();
    let collector = SignalCollector::new(page, config.collector.clone());
    collector.check_globals();
    let snapshot = collector.assemble(cookies.clone());

    // Seed the operator settings from config.
    let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
    store
        .set(KEY_ENABLED, json!(config.detection.enabled))
        .await?;
    let show_fingerprinting = config.detection.show_fingerprinting && !args.hide_fingerprinting;
    store
        .set(KEY_SHOW_FINGERPRINTING, json!(show_fingerprinting))
        .await?;

    let loader = Arc::new(CatalogLoader::new(Arc::new(FsCatalogSource::new(
        args.catalog,
    ))));
    let coordinator = Coordinator::new(loader, store, Arc::new(StaticCookies(cookies)), config);

    let url = snapshot.url.clone();
    let results = coordinator.page_data(0, snapshot).await;
    let summary = aggregate(&results);

    let report = json!({
        "url": url,
        "detections": results,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
