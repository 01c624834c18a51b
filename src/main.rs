//! CloudOps CLI Entry Point
//!
//! Subcommands:
//! - `accepts` - Check whether a descriptor is handled by this driver
//! - `resolve` - Show the resolved (redacted) configuration
//! - `model` - Print the engine connection string for a descriptor
//! - `query` - Run a pushdown scan through the cache against a `SQLite` inventory
//!
//! All output to stdout is JSON-only. Logs go to stderr (`RUST_LOG` or `-v`).

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cloudops::{
    CacheSource, CloudOpsError, Driver, ErrorEnvelope, ErrorInfo, Metadata, Predicate,
    QueryOutcome, QueryRequest, RawParams, SortKey, SuccessEnvelope,
};

const DEFAULT_ENGINE: &str = "cloudops";

/// CloudOps - one SQL surface over Azure, GCP and AWS resources
#[derive(Parser)]
#[command(name = "cloudops")]
#[command(about = "Resolve CloudOps connection descriptors and run cached multi-cloud scans")]
#[command(version)]
struct Cli {
    /// Increase log verbosity on stderr (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a descriptor uses the jdbc:cloudops: scheme
    Accepts { descriptor: String },

    /// Resolve a descriptor into a redacted configuration
    Resolve(Target),

    /// Print the engine connection string for a descriptor
    Model(Target),

    /// Run a scan through the query cache
    Query(QueryArgs),
}

#[derive(Args)]
struct Target {
    /// Connection descriptor, e.g. `jdbc:cloudops:aws.region=us-east-1;...`
    descriptor: String,

    /// Connection property (`key=value`), below the descriptor in precedence
    #[arg(short = 'p', long = "property")]
    properties: Vec<String>,
}

impl Target {
    fn properties(&self) -> RawParams {
        cloudops::config::parse(&self.properties.join(";"))
    }
}

#[derive(Args)]
struct QueryArgs {
    #[command(flatten)]
    target: Target,

    /// SQLite inventory file holding one table per relation
    #[arg(long)]
    database: std::path::PathBuf,

    /// Relation to scan, e.g. compute_resources
    #[arg(long)]
    table: String,

    /// Comma-separated projection
    #[arg(long, value_delimiter = ',')]
    columns: Vec<String>,

    /// Filter term such as `region=eu-west-1` or `cpu_count>=4` (repeatable)
    #[arg(long = "filter")]
    filters: Vec<String>,

    /// Sort term `column[:asc|desc]` (repeatable)
    #[arg(long = "order-by")]
    order_by: Vec<String>,

    #[arg(long)]
    limit: Option<u64>,

    #[arg(long)]
    offset: Option<u64>,

    /// Run the query this many times per caller
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// Number of concurrent callers sharing the connection
    #[arg(long, default_value_t = 1)]
    callers: usize,
}

impl QueryArgs {
    fn request(&self) -> cloudops::Result<QueryRequest> {
        let mut request = QueryRequest::scan(&self.table).select(self.columns.iter().cloned());
        for filter in &self.filters {
            request = request.filter(Predicate::parse(filter)?);
        }
        for key in &self.order_by {
            request = request.order_by(SortKey::parse(key)?);
        }
        request.limit = self.limit;
        request.offset = self.offset;
        Ok(request)
    }
}

/// Per-source tally across all runs of a query
#[derive(Debug, Default, Serialize)]
struct RunSummary {
    runs: usize,
    hit: usize,
    miss: usize,
    coalesced: usize,
    bypass: usize,
    max_ms: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &QueryOutcome) {
        self.runs += 1;
        match outcome.source {
            CacheSource::Hit => self.hit += 1,
            CacheSource::Miss => self.miss += 1,
            CacheSource::Coalesced => self.coalesced += 1,
            CacheSource::Bypass => self.bypass += 1,
        }
        self.max_ms = self.max_ms.max(millis(outcome.elapsed));
    }
}

/// Successful command output before it is wrapped in an envelope
struct Reply {
    engine: &'static str,
    data: serde_json::Value,
    meta: Metadata,
}

fn millis(d: std::time::Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("Failed to serialize output: {e}"),
    }
}

#[cfg(feature = "sqlite")]
fn sqlite_driver(database: &std::path::Path) -> Driver {
    Driver::new(cloudops::engine::sqlite::SqliteFactory::new(database))
}

/// Driver for commands that never open an executor
fn offline_driver() -> Driver {
    Driver::new(|_: &cloudops::SchemaModel| -> cloudops::Result<Arc<dyn cloudops::QueryExecutor>> {
        Err(CloudOpsError::invalid_input("This command does not execute queries"))
    })
}

fn cmd_accepts(descriptor: &str) -> Reply {
    Reply {
        engine: DEFAULT_ENGINE,
        data: serde_json::json!({ "accepted": cloudops::accepts(Some(descriptor)) }),
        meta: Metadata::new(0),
    }
}

fn cmd_resolve(target: &Target) -> anyhow::Result<Reply> {
    let start = Instant::now();
    let config = offline_driver()
        .resolve(Some(target.descriptor.as_str()), &target.properties())?
        .ok_or_else(|| CloudOpsError::invalid_input("Descriptor must start with jdbc:cloudops:"))?;
    Ok(Reply {
        engine: DEFAULT_ENGINE,
        data: serde_json::to_value(config.redacted()).context("Failed to render configuration")?,
        meta: Metadata::new(millis(start.elapsed())),
    })
}

fn cmd_model(target: &Target) -> anyhow::Result<Reply> {
    let start = Instant::now();
    let url = offline_driver()
        .engine_url(Some(target.descriptor.as_str()), &target.properties())?
        .ok_or_else(|| CloudOpsError::invalid_input("Descriptor must start with jdbc:cloudops:"))?;
    Ok(Reply {
        engine: DEFAULT_ENGINE,
        data: serde_json::json!({ "engine_url": url, "relations": cloudops::schema::RELATIONS }),
        meta: Metadata::new(millis(start.elapsed())),
    })
}

#[cfg(feature = "sqlite")]
async fn cmd_query(args: &QueryArgs) -> anyhow::Result<Reply> {
    let start = Instant::now();
    let request = Arc::new(args.request()?);
    let driver = sqlite_driver(&args.database);
    let conn = driver
        .connect(Some(args.target.descriptor.as_str()), &args.target.properties())?
        .ok_or_else(|| CloudOpsError::invalid_input("Descriptor must start with jdbc:cloudops:"))?;

    let repeat = args.repeat.max(1);
    let mut handles = Vec::with_capacity(args.callers.max(1));
    for caller in 0..args.callers.max(1) {
        let conn = conn.clone();
        let request = Arc::clone(&request);
        handles.push(tokio::task::spawn_blocking(move || {
            tracing::debug!(caller, repeat, "Caller started");
            (0..repeat).map(|_| conn.execute(&request)).collect::<cloudops::Result<Vec<_>>>()
        }));
    }

    let mut summary = RunSummary::default();
    let mut last = None;
    for handle in handles {
        for outcome in handle.await.context("Query caller panicked")?? {
            summary.record(&outcome);
            last = Some(outcome);
        }
    }
    conn.close();

    let last = last.context("No query runs were executed")?;
    let meta = Metadata::with_rows(millis(start.elapsed()), last.result.row_count())
        .cache(last.source, driver.cache().stats());
    Ok(Reply {
        engine: "sqlite",
        data: serde_json::json!({ "result": &*last.result, "runs": summary }),
        meta,
    })
}

#[cfg(not(feature = "sqlite"))]
async fn cmd_query(_args: &QueryArgs) -> anyhow::Result<Reply> {
    Err(CloudOpsError::invalid_input("This build has no embedded engine; enable the `sqlite` feature").into())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let (command, outcome) = match &cli.command {
        Commands::Accepts { descriptor } => ("accepts", Ok(cmd_accepts(descriptor))),
        Commands::Resolve(target) => ("resolve", cmd_resolve(target)),
        Commands::Model(target) => ("model", cmd_model(target)),
        Commands::Query(args) => ("query", cmd_query(args).await),
    };

    match outcome {
        Ok(reply) => emit(&SuccessEnvelope::new(reply.engine, command, reply.data, reply.meta)),
        Err(err) => {
            let envelope = match err.downcast_ref::<CloudOpsError>() {
                Some(e) => ErrorEnvelope::from_error(DEFAULT_ENGINE, command, e),
                None => ErrorEnvelope::new(
                    DEFAULT_ENGINE,
                    command,
                    ErrorInfo::new("INTERNAL_ERROR", format!("{err:#}")),
                ),
            };
            emit(&envelope);
            std::process::exit(1);
        }
    }
}
