// ABOUTME: CLI entry point for events-replicator
// ABOUTME: Parses commands and routes to the sync engine

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use mysql_async::Conn;
use std::path::{Path, PathBuf};

use events_replicator::config::{sanitize_url, EtlConfig};
use events_replicator::extract::LOG_COLUMNS;
use events_replicator::load::SinkClient;
use events_replicator::schema::SchemaReconciler;
use events_replicator::sync::SyncOrchestrator;
use events_replicator::watermark::WatermarkStore;

#[derive(Parser)]
#[command(name = "events-replicator")]
#[command(about = "Incremental MySQL-to-ClickHouse event replication", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct ConfigArgs {
    /// Path to the TOML config file (defaults to ./events-etl.toml when present)
    #[arg(long = "config")]
    config_path: Option<PathBuf>,
    /// Source MySQL URL, overriding the config file
    #[arg(long = "source-url", env = "EVENTS_ETL_SOURCE_URL")]
    source_url: Option<String>,
    /// Sink ClickHouse URL, overriding the config file
    #[arg(long = "sink-url", env = "EVENTS_ETL_SINK_URL")]
    sink_url: Option<String>,
    /// Rows per cycle / reload page, overriding the config file
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one bounded incremental sync cycle; a no-op when nothing is new
    RunIncremental {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Truncate the sink and backfill the whole source history
    RunFullLoad {
        #[command(flatten)]
        config: ConfigArgs,
    },
    /// Show the live source and sink column sets and how they reconcile
    Columns {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG takes precedence over --log, default "info"
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::RunIncremental { config } => run_incremental(load_config(&config)?).await,
        Commands::RunFullLoad { config } => run_full_load(load_config(&config)?).await,
        Commands::Columns { config } => show_columns(load_config(&config)?).await,
    }
}

fn load_config(args: &ConfigArgs) -> Result<EtlConfig> {
    let mut config = match &args.config_path {
        Some(path) => EtlConfig::load(path)?,
        None => {
            let default_path = Path::new("events-etl.toml");
            if default_path.exists() {
                EtlConfig::load(default_path)?
            } else {
                EtlConfig::default()
            }
        }
    };

    if let Some(url) = &args.source_url {
        config.source.url = url.clone();
    }
    if let Some(url) = &args.sink_url {
        config.sink.url = url.clone();
    }
    if let Some(batch_size) = args.batch_size {
        config.sync.batch_size = batch_size;
    }

    config.validate()?;
    tracing::debug!("Loaded configuration: {:?}", config);
    Ok(config)
}

fn watermark_store(config: &EtlConfig) -> Result<WatermarkStore> {
    let path = match &config.sync.tracking_file {
        Some(path) => path.clone(),
        None => WatermarkStore::default_path()?,
    };
    Ok(WatermarkStore::new(path))
}

async fn connect_source(config: &EtlConfig) -> Result<Conn> {
    let opts = mysql_async::Opts::from_url(&config.source.url)
        .with_context(|| format!("Invalid source URL {}", sanitize_url(&config.source.url)))?;
    Conn::new(opts).await.with_context(|| {
        format!(
            "Failed to connect to source database {}",
            sanitize_url(&config.source.url)
        )
    })
}

async fn run_incremental(config: EtlConfig) -> Result<()> {
    let store = watermark_store(&config)?;
    let sink = SinkClient::new(&config.sink);
    let mut conn = connect_source(&config).await?;

    let orchestrator = SyncOrchestrator::new(&config);
    let result = orchestrator.run_incremental(&mut conn, &sink, &store).await;
    if let Err(e) = conn.disconnect().await {
        tracing::warn!("Failed to close source connection: {}", e);
    }

    let outcome = result?;
    if outcome.is_noop() {
        println!(
            "No new events - up to date (watermark {})",
            outcome.watermark
        );
    } else {
        println!(
            "Synced {} events in {}ms - watermark now {}",
            outcome.rows_synced, outcome.duration_ms, outcome.watermark
        );
    }
    Ok(())
}

async fn run_full_load(config: EtlConfig) -> Result<()> {
    let store = watermark_store(&config)?;
    let sink = SinkClient::new(&config.sink);
    let mut conn = connect_source(&config).await?;

    let orchestrator = SyncOrchestrator::new(&config);
    let result = orchestrator.run_full_reload(&mut conn, &sink, &store).await;
    if let Err(e) = conn.disconnect().await {
        tracing::warn!("Failed to close source connection: {}", e);
    }

    let outcome = result?;
    println!(
        "Full load complete: {} events in {} pages ({}ms) - watermark {}",
        outcome.rows_synced, outcome.batches, outcome.duration_ms, outcome.watermark
    );
    Ok(())
}

async fn show_columns(config: EtlConfig) -> Result<()> {
    let reconciler = SchemaReconciler::new(&config);
    let sink = SinkClient::new(&config.sink);
    let mut conn = connect_source(&config).await?;

    let result = async {
        let log_cols = reconciler
            .source_columns(&mut conn, &config.source.log_table)
            .await?;
        let entity_cols = reconciler
            .source_columns(&mut conn, &config.source.entity_table)
            .await?;
        let sink_cols = sink.columns(&config.sink.table).await?;
        Ok::<_, anyhow::Error>((log_cols, entity_cols, sink_cols))
    }
    .await;
    if let Err(e) = conn.disconnect().await {
        tracing::warn!("Failed to close source connection: {}", e);
    }
    let (log_cols, entity_cols, sink_cols) = result?;

    println!(
        "Source {} ({} columns):",
        config.source.log_table,
        log_cols.len()
    );
    for col in &log_cols {
        println!("  - {}", col);
    }
    println!(
        "\nSource {} ({} columns):",
        config.source.entity_table,
        entity_cols.len()
    );
    for col in &entity_cols {
        println!("  - {}", col);
    }
    println!(
        "\nSink {}.{} ({} columns):",
        config.sink.database,
        config.sink.table,
        sink_cols.len()
    );
    for col in &sink_cols {
        println!("  - {}", col);
    }

    let business_cols = reconciler.selectable(&entity_cols);
    let mut produced: Vec<String> = LOG_COLUMNS.iter().map(|c| c.to_string()).collect();
    for col in &mut produced {
        if col == "order_log_id" {
            *col = "event_id".to_string();
        } else if col == "created_at_log" {
            *col = "event_timestamp".to_string();
        }
    }
    produced.push("event_type".to_string());
    produced.extend(business_cols.iter().cloned());

    let defaults = reconciler.defaults_for(&sink_cols, &produced);
    println!(
        "\nSelectable business columns: {} of {} canonical",
        business_cols.len(),
        events_replicator::schema::CANONICAL_ENTITY_COLUMNS.len()
    );
    if defaults.is_empty() {
        println!("Every sink column is produced by the transform");
    } else {
        println!("Sink columns that will be default-filled:");
        for (col, value) in &defaults {
            println!("  - {} -> {:?}", col, value);
        }
    }

    Ok(())
}
