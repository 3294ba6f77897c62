//! # Rowpipe CLI - Data Transfer Runner
//!
//! Thin host binary around the rowpipe engine: it binds command-line flags
//! to pipeline options, resolves the source and sink from their connection
//! strings, builds the transformer chain, runs the orchestrator, and maps
//! the error taxonomy to process exit codes.
//!
//! ## Usage
//!
//! ```bash
//! # Copy a CSV file into JSON-Lines
//! rowpipe data.csv out.jsonl
//!
//! # Mask a column and keep only adults, writing at most 1000 rows
//! rowpipe data.csv out.csv \
//!     --transform "mask:CARD=####-####-####-####" \
//!     --transform "filter:return row.Age > 18" \
//!     --limit 1000
//!
//! # Smoke-run against generated rows, printing instead of writing
//! rowpipe generate:100 out.csv --dry-run 5
//!
//! # Provider options use --set PREFIX.FIELD=VALUE
//! rowpipe data.csv out.csv --set csv.delimiter=";" --set csv.header=false
//! ```
//!
//! Exit codes: 0 success, 1 validation or schema error, 2 runtime error,
//! 130 cancelled.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use rowpipe_core::descriptor::{CreateContext, DescriptorSet};
use rowpipe_core::{OptionsRegistry, Orchestrator, PipelineError, PipelineOptions, WriteStrategy};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for the rowpipe runner.
#[derive(Parser, Debug)]
#[command(name = "rowpipe")]
#[command(about = "Batch-streaming data transfer between tabular sources and sinks")]
struct Args {
    /// Source connection string (e.g. `data.csv`, `jsonl:-`, `generate:100`)
    source: String,

    /// Sink connection string (e.g. `out.csv`, `csv:-`)
    dest: String,

    /// SQL text for sources that require one
    #[arg(long)]
    query: Option<String>,

    /// Write strategy: append, truncate, recreate, or upsert
    #[arg(long, default_value = "append")]
    strategy: String,

    /// Transformer spec, repeatable; applied in declaration order
    /// (e.g. `mask:CARD=####`, `filter:return row.Age > 18`)
    #[arg(long = "transform")]
    transforms: Vec<String>,

    /// Provider option, repeatable: PREFIX.FIELD=VALUE
    #[arg(long = "set")]
    sets: Vec<String>,

    /// Rows per batch
    #[arg(long, default_value_t = 50_000)]
    batch_size: usize,

    /// Stop after this many written rows (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    limit: u64,

    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    #[arg(long, default_value_t = 1_000)]
    retry_delay_ms: u64,

    /// Per-row keep probability, applied before the transformers
    #[arg(long, default_value_t = 1.0)]
    sampling_rate: f64,

    #[arg(long)]
    sampling_seed: Option<u64>,

    /// Abort on schema validation errors and raise per-value violations
    #[arg(long)]
    strict_schema: bool,

    #[arg(long)]
    no_schema_validation: bool,

    /// Add missing target columns to an existing sink
    #[arg(long)]
    auto_migrate: bool,

    /// Print up to N transformed rows and exit without writing
    #[arg(long = "dry-run", default_value_t = 0)]
    dry_run: usize,

    #[arg(long)]
    pre_exec: Option<String>,

    #[arg(long)]
    post_exec: Option<String>,

    #[arg(long)]
    on_error_exec: Option<String>,

    #[arg(long)]
    finally_exec: Option<String>,

    /// Suppress the final statistics line
    #[arg(long)]
    no_stats: bool,

    /// Write run metrics as JSON to this path
    #[arg(long)]
    metrics_path: Option<PathBuf>,

    /// Seconds allowed for the reader's query phase
    #[arg(long)]
    query_timeout: Option<u64>,

    /// Seconds allowed for opening the source
    #[arg(long)]
    connection_timeout: Option<u64>,
}

impl Args {
    fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions {
            batch_size: self.batch_size,
            limit: self.limit,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            sampling_rate: self.sampling_rate,
            sampling_seed: self.sampling_seed,
            strict_schema: self.strict_schema,
            no_schema_validation: self.no_schema_validation,
            auto_migrate: self.auto_migrate,
            dry_run_count: self.dry_run,
            pre_exec: self.pre_exec.clone(),
            post_exec: self.post_exec.clone(),
            on_error_exec: self.on_error_exec.clone(),
            finally_exec: self.finally_exec.clone(),
            no_stats: self.no_stats || std::env::var_os("ROWPIPE_NO_TUI").is_some(),
            metrics_path: self.metrics_path.clone(),
            query_timeout: self.query_timeout,
            connection_timeout: self.connection_timeout,
        }
    }
}

/// Apply `--set PREFIX.FIELD=VALUE` flags through the matching descriptor's
/// option bridge.
fn apply_provider_options(
    descriptors: &DescriptorSet,
    registry: &OptionsRegistry,
    sets: &[String],
) -> Result<(), PipelineError> {
    for entry in sets {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            PipelineError::config(format!("expected PREFIX.FIELD=VALUE, got `{entry}`"))
        })?;
        let (prefix, field) = key.split_once('.').ok_or_else(|| {
            PipelineError::config(format!("expected PREFIX.FIELD=VALUE, got `{entry}`"))
        })?;
        let descriptor = descriptors
            .descriptors()
            .iter()
            .find(|d| d.options.prefix == prefix)
            .ok_or_else(|| {
                PipelineError::config(format!("no provider has the option prefix `{prefix}`"))
            })?;
        (descriptor.apply_option)(registry, field, value)?;
    }
    Ok(())
}

async fn run(args: Args) -> Result<(), PipelineError> {
    let strategy: WriteStrategy = args.strategy.parse()?;

    let mut descriptors = DescriptorSet::new();
    descriptors.extend(rowpipe_io::descriptors());
    descriptors.extend(rowpipe_tx::descriptors());

    // Configuration phase: fill the registry, then freeze it for the run.
    let registry = OptionsRegistry::new();
    apply_provider_options(&descriptors, &registry, &args.sets)?;
    registry.freeze();

    let reader_ctx = CreateContext {
        connection_string: &args.source,
        query: args.query.as_deref(),
        strategy,
        registry: &registry,
    };
    let reader = descriptors.create_reader(&reader_ctx)?;
    let writer_ctx = CreateContext {
        connection_string: &args.dest,
        query: None,
        strategy,
        registry: &registry,
    };
    let writer = descriptors.create_writer(&writer_ctx)?;

    let mut stages = Vec::new();
    for spec in &args.transforms {
        stages.push(descriptors.create_transformer(&CreateContext {
            connection_string: spec,
            query: None,
            strategy,
            registry: &registry,
        })?);
    }
    let pipeline = rowpipe_core::TransformerPipeline::new(stages);

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            eprintln!("\nreceived ctrl-c, shutting down...");
            ctrl_c.cancel();
        }
    });

    let options = args.pipeline_options();
    let orchestrator = Orchestrator::new(options);
    let metrics = orchestrator.run(reader, pipeline, writer, cancel).await?;
    info!(
        read = metrics.read_count,
        written = metrics.write_count,
        "transfer complete"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            tracing_subscriber::EnvFilter::new("info")
        }))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
