//! evolvebot CLI — runs a universe node and inspects its knowledge state.
//!
//! `start` joins the universe and serves until Ctrl+C. The other commands are
//! one-shot and exit when done.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use evolvebot_kernel::capabilities::build_capability_card;
use evolvebot_kernel::{load_config, registry_client, start_universe, ChatService, OpenAiCompatDriver};
use evolvebot_knowledge::digest::DEFAULT_DIGEST_ITEMS;
use evolvebot_knowledge::{LearningManager, LearningSettings, PublishLoop, PublishLoopConfig};
use evolvebot_types::config::EvolveConfig;
use evolvebot_types::expand_home;
use evolvebot_types::model::CompletionDriver;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser)]
#[command(name = "evolvebot", version, about = "evolvebot universe node")]
struct Cli {
    /// Path to config file (default: ~/.evolvebot/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Join the universe: serve tasks, register, learn, publish.
    Start,
    /// Print the capability card this node would advertise.
    Card,
    /// Print today's digest of learned knowledge packs.
    Digest {
        /// Maximum packs to list.
        #[arg(long, default_value_t = DEFAULT_DIGEST_ITEMS)]
        max_items: usize,
    },
    /// Run one publish pass over the review outbox.
    PublishOnce,
}

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn completion_driver(cfg: &EvolveConfig) -> Option<Arc<dyn CompletionDriver>> {
    OpenAiCompatDriver::from_config(&cfg.model).map(|d| Arc::new(d) as Arc<dyn CompletionDriver>)
}

async fn cmd_start(cfg: EvolveConfig) -> anyhow::Result<()> {
    let driver = completion_driver(&cfg);
    if driver.is_none() {
        info!("No model configured; llm.chat tasks will be refused");
    }
    let registry = registry_client(&cfg.universe);

    let learning = Arc::new(LearningManager::new(
        LearningSettings::from_config(&cfg),
        registry.clone(),
        driver.clone(),
    ));
    let service = Arc::new(ChatService::new(&cfg.universe, driver).with_learning(learning.clone()));

    let handle = start_universe(&cfg, service, registry)
        .await
        .context("universe failed to start")?;
    learning.start_background(Duration::from_secs(
        cfg.universe.knowledge.background_interval_secs,
    ));

    match &handle {
        Some(h) => info!(node_id = %h.node_id(), endpoint = %h.endpoint_url(), "Node running; Ctrl+C to stop"),
        None => info!("Universe disabled; running background learning only. Ctrl+C to stop"),
    }

    tokio::signal::ctrl_c().await.context("failed to listen for Ctrl+C")?;
    info!("Shutting down");

    learning.stop_background().await;
    if let Some(handle) = handle {
        handle.shutdown().await;
    }
    Ok(())
}

fn cmd_card(cfg: &EvolveConfig) -> anyhow::Result<()> {
    let mut uc = cfg.universe.clone();
    if uc.node_id.trim().is_empty() {
        uc.node_id = "(generated at start)".to_string();
    }
    let card = build_capability_card(&uc);
    println!("{}", serde_json::to_string_pretty(&card)?);
    Ok(())
}

/// Digest over `settings`, curated by the configured model when there is one.
async fn build_digest(cfg: &EvolveConfig, settings: LearningSettings, max_items: usize) -> Option<String> {
    let learning = LearningManager::new(settings, None, completion_driver(cfg));
    learning.build_daily_digest(max_items).await
}

async fn cmd_digest(cfg: &EvolveConfig, max_items: usize) -> anyhow::Result<()> {
    match build_digest(cfg, LearningSettings::from_config(cfg), max_items).await {
        Some(digest) => println!("{digest}"),
        None => println!("Nothing new to report."),
    }
    Ok(())
}

async fn cmd_publish_once(cfg: &EvolveConfig) -> anyhow::Result<()> {
    let uc = &cfg.universe;
    let dir = uc.knowledge.publish_dir.trim();
    if dir.is_empty() {
        bail!("universe.knowledge.publish_dir is not set");
    }
    let Some(registry) = registry_client(uc) else {
        bail!("universe.registry_url is not set");
    };
    if uc.node_id.trim().is_empty() {
        bail!("universe.node_id is not set; published packs need an owner");
    }

    let mut config = PublishLoopConfig::new(expand_home(dir), uc.node_id.clone());
    config.max_retries = uc.knowledge.review_publish_max_retries;
    let report = PublishLoop::new(config, registry).run_pass().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing_stderr();

    let cfg = load_config(cli.config.as_deref());
    let rt = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;

    match cli.command {
        Commands::Start => rt.block_on(cmd_start(cfg)),
        Commands::Card => cmd_card(&cfg),
        Commands::Digest { max_items } => rt.block_on(cmd_digest(&cfg, max_items)),
        Commands::PublishOnce => rt.block_on(cmd_publish_once(&cfg)),
    }
}
