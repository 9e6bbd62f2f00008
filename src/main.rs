//! tierlab
//!
//! Runs one synthetic load test against a simulated serving stack and prints
//! the report together with cache, database and metrics snapshots.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            tierlab                              │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Load      │───▶│ Orchestrator │───▶│   Storage    │       │
//! │  │  Generator   │    │  (balancer)  │    │ cache + dbs  │       │
//! │  └──────────────┘    └──────────────┘    └──────────────┘       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tierlab::monitoring::{HealthResponse, MetricsSnapshot};
use tierlab::storage::{CacheStats, DatabaseStats};
use tierlab::{LoadGenerator, LoadReport, Orchestrator, SimulationConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tierlab - load test a simulated multi-tier serving stack
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Load duration in seconds
    #[arg(long, env = "TIERLAB_DURATION_SECS", default_value = "10")]
    duration_secs: u64,

    /// Work units issued per second
    #[arg(long, env = "TIERLAB_RATE", default_value = "50")]
    rate: u32,

    /// YAML configuration file; flags below override its values
    #[arg(long, env = "TIERLAB_CONFIG")]
    config: Option<PathBuf>,

    /// Web server pool size
    #[arg(long, env = "TIERLAB_SERVERS")]
    servers: Option<usize>,

    /// Per-node capacity
    #[arg(long, env = "TIERLAB_CAPACITY")]
    capacity: Option<u64>,

    /// Number of database replicas
    #[arg(long, env = "TIERLAB_REPLICAS")]
    replicas: Option<usize>,

    /// Cache capacity in entries
    #[arg(long, env = "TIERLAB_CACHE_SIZE")]
    cache_size: Option<usize>,

    /// Metrics rolling window size
    #[arg(long, env = "TIERLAB_WINDOW")]
    window: Option<usize>,

    /// Seed for reproducible runs
    #[arg(long, env = "TIERLAB_SEED")]
    seed: Option<u64>,

    /// Print the final state as JSON
    #[arg(long)]
    json: bool,

    /// Also print metrics in Prometheus text format
    #[arg(long)]
    prometheus: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn simulation_config(&self) -> anyhow::Result<SimulationConfig> {
        let mut config = match &self.config {
            Some(path) => SimulationConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => SimulationConfig::default(),
        };

        if let Some(servers) = self.servers {
            config.servers = servers;
        }
        if let Some(capacity) = self.capacity {
            config.web.capacity = capacity;
        }
        if let Some(replicas) = self.replicas {
            config.replicas = replicas;
        }
        if let Some(size) = self.cache_size {
            config.cache.max_size = size;
        }
        if let Some(window) = self.window {
            config.metrics.window_size = window;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }

        config.validate()?;
        Ok(config)
    }
}

/// Everything printed at the end of a run
#[derive(Serialize)]
struct RunSummary {
    report: LoadReport,
    cache: CacheStats,
    databases: Vec<DatabaseStats>,
    metrics: MetricsSnapshot,
    health: HealthResponse,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = args.simulation_config()?;
    info!("Starting tierlab");
    info!("  Web servers: {} (capacity {})", config.servers, config.web.capacity);
    info!("  Database: 1 primary + {} replicas", config.replicas);
    info!("  Cache size: {}", config.cache.max_size);
    info!("  Load: {} req/s for {}s", args.rate, args.duration_secs);

    let load_config = config.load.clone();
    let orchestrator = Arc::new(Orchestrator::new(config)?);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    let interrupted = orchestrator.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, draining in-flight work");
            interrupted.shutdown();
            ctrl_c.cancel();
        }
    });

    let report = LoadGenerator::new(orchestrator.clone(), load_config)
        .with_cancellation(cancel)
        .run(Duration::from_secs(args.duration_secs), args.rate)
        .await;

    orchestrator.drain_replication().await;

    let summary = RunSummary {
        report,
        cache: orchestrator.snapshot_cache(),
        databases: orchestrator.snapshot_databases(),
        metrics: orchestrator.snapshot_metrics(),
        health: orchestrator.health(),
    };

    if !summary.health.status.is_operational() {
        warn!(status = %summary.health.status, "stack finished in a non-operational state");
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    if args.prometheus {
        print!("{}", orchestrator.export_metrics());
    }

    info!("Run complete");
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    let report = &summary.report;
    println!("Load report");
    println!("  requests:      {}", report.requests);
    println!("  errors:        {}", report.errors);
    println!("  success rate:  {:.2}%", report.success_rate);
    println!(
        "  actual rate:   {:.2} req/s (requested {})",
        report.actual_rate, report.requested_rate
    );
    println!("  avg latency:   {:.2} ms", report.avg_latency_ms);
    for (kind, counts) in &report.per_kind {
        println!(
            "  {:<8} total={} ok={} failed={}",
            kind, counts.total, counts.succeeded, counts.failed
        );
    }

    let cache = &summary.cache;
    println!("Cache {}", cache.name);
    println!("  entries:       {}/{}", cache.entries, cache.max_size);
    println!(
        "  hits/misses:   {}/{} (hit rate {:.2})",
        cache.hits, cache.misses, cache.hit_rate
    );
    println!("  evictions:     {}", cache.evictions);

    for db in &summary.databases {
        println!(
            "Database {} ({}): records={} reads={} writes={} replicated={}",
            db.name, db.role, db.records, db.reads, db.writes, db.replications_applied
        );
    }

    let metrics = &summary.metrics;
    println!("Metrics");
    println!("  window:        {} samples", metrics.window_len);
    println!("  avg latency:   {:.2} ms", metrics.average_latency_ms);
    for (name, value) in &metrics.counters {
        println!("  {:<32} {}", name, value);
    }

    println!("Health: {}", summary.health.status);
    for check in &summary.health.checks {
        match &check.message {
            Some(message) => println!("  {}: {} ({})", check.name, check.status, message),
            None => println!("  {}: {}", check.name, check.status),
        }
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("tokio=warn".parse()?);

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
    Ok(())
}
