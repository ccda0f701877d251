//! dynastream - DynamoDB Streams listener
//!
//! # Usage
//!
//! ```bash
//! # Listen to the configured table's stream (default command)
//! dynastream -c dynastream.yaml
//!
//! # Create a stream-enabled table
//! dynastream create-table --name sampleStreamedTableKeysOnly --key sampleKey
//!
//! # Write an item
//! dynastream put-item --item '{"sampleKey": "789", "data": {"publishingSite": "dplay.no"}}'
//!
//! # Validate configuration
//! dynastream -c dynastream.yaml validate
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use dynastream::common::{
    item_from_json, item_to_json, LoggingSink, PollerMetricsSnapshot, StreamViewType, TableGateway,
    TableRef,
};
use dynastream::config::DynastreamConfig;
use dynastream::dynamodb::DynamoDbClients;
use dynastream::stream::{RunReport, ShardState, StreamConsumer};

/// How often `listen` logs live poller progress
const PROGRESS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "dynastream")]
#[command(version, about = "Change-stream listener for DynamoDB tables")]
struct Cli {
    /// Path to configuration file (defaults target a local DynamoDB)
    #[arg(short, long, env = "DYNASTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Override the service endpoint
    #[arg(long, env = "DYNASTREAM_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Override the region
    #[arg(long, env = "DYNASTREAM_REGION")]
    region: Option<String>,

    /// Override the table to listen to
    #[arg(long, env = "DYNASTREAM_TABLE")]
    table: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the table's stream until every shard closes or Ctrl-C (default)
    Listen,
    /// Create a stream-enabled table and wait until it exists
    CreateTable {
        /// Table name (default: configured table)
        #[arg(long)]
        name: Option<String>,
        /// Hash key attribute name (default: table.key_name)
        #[arg(long)]
        key: Option<String>,
        /// KEYS_ONLY, NEW_IMAGE, OLD_IMAGE or NEW_AND_OLD_IMAGES
        #[arg(long)]
        view_type: Option<StreamViewType>,
    },
    /// Write one item, given as a JSON object
    PutItem {
        #[arg(long)]
        item: String,
        /// Table name (default: configured table)
        #[arg(long)]
        table: Option<String>,
    },
    /// Validate configuration
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => DynastreamConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DynastreamConfig::default(),
    };
    if let Some(endpoint) = cli.endpoint_url {
        config.endpoint_url = Some(endpoint);
    }
    if let Some(region) = cli.region {
        config.region = region;
    }
    if let Some(table) = cli.table {
        config.table_name = table;
    }
    config.validate().context("Invalid configuration")?;

    match cli.command.unwrap_or(Commands::Listen) {
        Commands::Listen => listen(config).await,
        Commands::CreateTable {
            name,
            key,
            view_type,
        } => create_table(config, name, key, view_type).await,
        Commands::PutItem { item, table } => put_item(config, item, table).await,
        Commands::Validate => validate_config(&config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

async fn listen(config: DynastreamConfig) -> Result<()> {
    info!(table = %config.table_name, "Starting dynastream listener");

    let clients = DynamoDbClients::connect(&config).await;
    let consumer = Arc::new(
        StreamConsumer::new(clients.tables, clients.streams)
            .with_settings(config.consumer_settings()),
    );

    let cancel = consumer.cancellation_token();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, stopping shard pollers");
                cancel.cancel();
            }
            Err(e) => warn!("Could not listen for Ctrl-C: {}", e),
        }
    });

    let progress = tokio::spawn(log_progress(consumer.clone()));

    let mut sink = LoggingSink::new();
    let result = consumer
        .run(&TableRef::new(config.table_name.clone()), &mut sink)
        .await;
    progress.abort();
    let report =
        result.with_context(|| format!("Failed to consume stream of table {}", config.table_name))?;

    print_summary(&report);
    Ok(())
}

async fn log_progress(consumer: Arc<StreamConsumer>) {
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let live = consumer.live_metrics();
        let mut total = PollerMetricsSnapshot::default();
        for metrics in &live {
            total += &metrics.snapshot();
        }
        info!(
            shards = live.len(),
            records = total.records_delivered,
            fetches = total.fetches,
            failed_fetches = total.failed_fetches,
            "Listener progress"
        );
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("Table:   {}", report.table);
    println!("Stream:  {}", report.stream);
    println!("Records: {}", report.records_delivered());
    println!("Elapsed: {:.1}s", report.elapsed.as_secs_f64());
    println!();
    println!("{:<40} {:<12} {:>8} {:>8} {:>8}", "SHARD", "STATE", "RECORDS", "FETCHES", "FAILED");
    for outcome in &report.shards {
        println!(
            "{:<40} {:<12} {:>8} {:>8} {:>8}",
            outcome.shard_id,
            outcome.state,
            outcome.records_delivered(),
            outcome.fetch_attempts(),
            outcome.failed_fetches()
        );
        if let Some(e) = &outcome.error {
            println!("    {}", e);
        }
    }

    let failed = report.shards.iter().filter(|o| o.state.is_failure()).count();
    if failed > 0 {
        error!(
            failed,
            exhausted = report.count(ShardState::Exhausted),
            "Some shards ended with errors"
        );
    }
}

async fn create_table(
    config: DynastreamConfig,
    name: Option<String>,
    key: Option<String>,
    view_type: Option<StreamViewType>,
) -> Result<()> {
    let name = name.unwrap_or_else(|| config.table_name.clone());
    let key = key.unwrap_or_else(|| config.table.key_name.clone());
    let view_type = view_type.unwrap_or(config.table.stream_view_type);

    let clients = DynamoDbClients::connect(&config).await;
    let tables: Arc<dyn TableGateway> = clients.tables;

    info!(table = %name, key = %key, view_type = %view_type, "Creating table");
    tables
        .create_table(&name, &key, view_type)
        .await
        .with_context(|| format!("Failed to create table {}", name))?;

    let description = tables
        .wait_until_exists(&TableRef::new(name.clone()))
        .await
        .with_context(|| format!("Table {} did not become available", name))?;

    info!(
        table = %name,
        arn = description.table_arn.as_deref().unwrap_or("-"),
        stream = ?description.stream_ref.as_ref().map(|s| s.as_str()),
        status = description.status.as_deref().unwrap_or("-"),
        "Table ready"
    );
    Ok(())
}

async fn put_item(config: DynastreamConfig, item: String, table: Option<String>) -> Result<()> {
    let table = TableRef::new(table.unwrap_or_else(|| config.table_name.clone()));
    let json: serde_json::Value = serde_json::from_str(&item).context("Item is not valid JSON")?;
    let item = item_from_json(&json)?;

    let clients = DynamoDbClients::connect(&config).await;
    let replaced = clients
        .tables
        .put_item(&table, item)
        .await
        .with_context(|| format!("Failed to write item to {}", table))?;

    info!(table = %table, replaced = %item_to_json(&replaced), "Item written");
    Ok(())
}

fn validate_config(config: &DynastreamConfig) -> Result<()> {
    println!("Configuration is valid.");
    println!();
    println!("Table:     {}", config.table_name);
    println!("Region:    {}", config.region);
    println!(
        "Endpoint:  {}",
        config.endpoint_url.as_deref().unwrap_or("(AWS default)")
    );
    println!("Batch:     {}", config.poller.max_batch_size);
    println!("Timeout:   {}ms", config.poller.fetch_timeout_ms);
    println!("Schedule:  {:?}", config.consumer.scheduling);
    Ok(())
}
