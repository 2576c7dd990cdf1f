use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use prometheus::Registry;
use tokio::io::BufReader;

use streamagg::metrics::Metrics;
use streamagg::recovery::CheckpointStore;
use streamagg::webserver::run_webserver;
use streamagg::{logging, run_agent, AgentOptions, Engine, Mode};

/// Aggregate a point stream over the JSON-lines agent protocol on
/// stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "streamagg", version)]
struct Cli {
    /// Aggregation to run.
    #[arg(value_enum)]
    mode: Mode,

    /// trace, debug, info, warn or error. Overridden by STREAMAGG_LOG.
    #[arg(long)]
    log_level: Option<String>,

    /// Responses buffered before input reading pauses.
    #[arg(long, default_value_t = 1024)]
    queue_capacity: usize,

    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    metrics_addr: Option<SocketAddr>,

    /// SQLite file for durable checkpoints.
    #[arg(long)]
    recovery_db: Option<PathBuf>,

    /// Points between durable checkpoints; 0 only checkpoints when the
    /// host asks for a snapshot.
    #[arg(long, default_value_t = 0)]
    checkpoint_every: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::setup(cli.log_level.as_deref()).context("can't set up logging")?;

    let registry = Registry::new();
    let metrics = Metrics::new(&registry).context("can't register metrics")?;
    if let Some(addr) = cli.metrics_addr {
        tokio::spawn(async move {
            if let Err(err) = run_webserver(addr, registry).await {
                tracing::error!("metrics server stopped: {err}");
            }
        });
    }

    let checkpoints = cli
        .recovery_db
        .as_deref()
        .map(CheckpointStore::open)
        .transpose()
        .context("can't open recovery DB")?;

    tracing::info!("starting {} agent", cli.mode);
    let engine = Engine::new(cli.mode, metrics);
    let options = AgentOptions {
        queue_capacity: cli.queue_capacity,
        checkpoint_every: cli.checkpoint_every,
    };
    run_agent(
        engine,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        checkpoints,
        options,
    )
    .await
    .context("agent stopped")?;
    Ok(())
}
