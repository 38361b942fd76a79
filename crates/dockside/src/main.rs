//! # dockside
//!
//! Document ingestion and search-consistency engine.
//!
//! Dockside watches an object store bucket, extracts searchable text
//! from uploaded documents (PDF and images via OCR, DOCX, spreadsheets,
//! CSV, plain text), embeds it, and keeps a full-text + vector search
//! index consistent with the bucket through three event sources: a
//! one-shot full scan, a notification queue, and a periodic
//! reconciliation sweep.
//!
//! ## Commands
//!
//! - `dockside run` - serve: scan (if configured), queue, reconcile
//! - `dockside scan` - one-shot full ingest, then exit
//! - `dockside check` - verify every external service is reachable
//!
//! ## Examples
//!
//! ```bash
//! # Continuous ingestion driven by queue notifications
//! dockside run --config /etc/dockside.toml
//!
//! # Backfill the whole bucket once
//! dockside scan --config /etc/dockside.toml
//! ```

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, OcrMode};
use dockside_core::{EventQueue, Embedder, OcrEngine, SearchIndex, ObjectStore};
use dockside_embed::{EmbedderConfig, EmbedderPool, HttpEmbedder};
use dockside_extract::{ElisionTable, Extractor, FastOcrClient, VisionOcrClient};
use dockside_index::ElasticIndex;
use dockside_pipeline::{Coordinator, CoordinatorConfig, Services};
use dockside_store::{S3Config, S3ObjectStore, SqsConfig, SqsQueue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dockside")]
#[command(about = "Document ingestion and search-consistency engine")]
#[command(version)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion service with the configured sources
    Run,

    /// Ingest the whole bucket once, then exit
    Scan {
        /// Key prefixes to ingest (default: configured prefixes)
        #[arg(short, long)]
        prefix: Vec<String>,
    },

    /// Verify the external services are reachable, then exit
    Check,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;

    runtime.block_on(async {
        match cli.command {
            Commands::Run => run(config, None).await,
            Commands::Scan { prefix } => {
                config.queue.enabled = false;
                config.pipeline.full_scan = true;
                config.pipeline.reconcile_enabled = false;
                run(config, Some(prefix)).await
            }
            Commands::Check => check(config).await,
        }
    })
}

/// Log the resolved configuration, secrets excluded.
fn echo_config(config: &Config) {
    info!(
        bucket = %config.store.bucket,
        region = %config.store.region,
        prefixes = ?config.store.prefixes,
        queue = config.queue.enabled,
        full_scan = config.pipeline.full_scan,
        reconcile = config.pipeline.reconcile_enabled,
        reconcile_hours = config.pipeline.reconcile_interval_hours,
        ocr_mode = ?config.ocr.mode,
        embedding_model = %config.embedding.model,
        index = %config.index.name,
        workers = config.pipeline.workers,
        "configuration"
    );
}

/// Build the service graph from configuration.
async fn build_services(config: &Config) -> Result<(Arc<Services>, Option<Arc<dyn EventQueue>>)> {
    let store: Arc<dyn ObjectStore> = Arc::new(
        S3ObjectStore::new(S3Config {
            bucket: config.store.bucket.clone(),
            region: config.store.region.clone(),
            endpoint_url: config.store.endpoint_url.clone(),
            timeout: Duration::from_secs(config.store.fetch_timeout_secs),
        })
        .context("object store client")?,
    );

    let ocr: Arc<dyn OcrEngine> = match config.ocr.mode {
        OcrMode::Fast => Arc::new(
            FastOcrClient::new(
                config.ocr.fast_endpoint.clone(),
                Duration::from_secs(config.ocr.timeout_secs),
            )
            .context("ocr client")?,
        ),
        OcrMode::Llm => Arc::new(
            VisionOcrClient::new(
                config.ocr.llm_endpoint.clone(),
                config.ocr.llm_model.clone(),
                config.ocr.llm_api_key.clone(),
                Duration::from_secs(config.ocr.timeout_secs),
            )
            .context("vision ocr client")?,
        ),
    };
    info!(engine = ocr.name(), "ocr engine selected");

    let mut elisions = ElisionTable::default();
    for (from, to) in &config.ocr.extra_elisions {
        elisions.extend(from.clone(), to.clone());
    }
    let extractor = Arc::new(Extractor::new(ocr, &elisions));

    // Connecting discovers and pins the embedding dimension.
    let embedder = HttpEmbedder::connect(EmbedderConfig {
        endpoint: config.embedding.endpoint.clone(),
        batch_endpoint: config.embedding.batch_endpoint.clone(),
        model: config.embedding.model.clone(),
        timeout: Duration::from_secs(config.embedding.timeout_secs),
    })
    .await
    .context("embedding service")?;
    let dimension = embedder.dimension();
    let embedder = Arc::new(EmbedderPool::new(
        Arc::new(embedder),
        config.embedding.max_concurrent,
    ));

    let index = ElasticIndex::new(
        dockside_index::IndexConfig {
            endpoint: config.index.endpoint.clone(),
            index: config.index.name.clone(),
            username: config.index.username.clone(),
            password: config.index.password.clone(),
            timeout: Duration::from_secs(config.index.timeout_secs),
        },
        dimension,
    )
    .context("index driver")?;
    index.ping().await.context("search index unreachable")?;
    index.ensure_index().await.context("ensure index")?;
    let index: Arc<dyn SearchIndex> = Arc::new(index);

    let queue: Option<Arc<dyn EventQueue>> = if config.queue.enabled {
        let queue = SqsQueue::new(SqsConfig {
            queue_url: config.queue.url.clone(),
            region: config.store.region.clone(),
            wait_time: Duration::from_secs(config.queue.wait_time_secs),
            max_messages: 10,
            timeout: Duration::from_secs(config.queue.wait_time_secs + 10),
        })
        .context("queue client")?;
        Some(Arc::new(queue))
    } else {
        None
    };

    let services = Arc::new(Services {
        store,
        extractor,
        chunking: dockside_core::ChunkConfig {
            window: config.pipeline.chunk_window,
            overlap: config.pipeline.chunk_overlap,
        },
        embedder,
        index,
    });

    Ok((services, queue))
}

async fn run(config: Config, prefix_override: Option<Vec<String>>) -> Result<()> {
    info!("starting dockside");
    echo_config(&config);

    let (services, queue) = build_services(&config).await?;

    let scan_prefixes = match prefix_override {
        Some(prefixes) if !prefixes.is_empty() => prefixes,
        _ => config.store.prefixes.clone(),
    };

    let coordinator = Coordinator::new(
        services,
        queue,
        CoordinatorConfig {
            workers: config.pipeline.workers,
            scan_on_start: config.pipeline.full_scan,
            scan_prefixes,
            reconcile_enabled: config.pipeline.reconcile_enabled,
            reconcile_interval: config.reconcile_interval(),
            queue_max_receives: config.queue.max_receives,
            drain_deadline: Duration::from_secs(config.pipeline.drain_deadline_secs),
            ..CoordinatorConfig::default()
        },
    );

    let handle = coordinator.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining");
        handle.shutdown();
    });

    coordinator.run().await?;
    info!("dockside stopped");
    Ok(())
}

async fn check(config: Config) -> Result<()> {
    echo_config(&config);
    let (services, queue) = build_services(&config).await?;

    // The store and, when enabled, the queue get exercised with a real
    // call each; the index and embedder were already probed above.
    let objects = services.store.list("").await.context("object store")?;
    info!(objects = objects.len(), "object store reachable");

    if let Some(queue) = queue {
        let messages = queue.receive().await.context("queue")?;
        info!(messages = messages.len(), "queue reachable");
        if !messages.is_empty() {
            warn!("received messages were not deleted and will redeliver");
        }
    }

    info!("all services reachable");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
