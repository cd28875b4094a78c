use std::sync::Arc;

use marketsieve_core::{
    CancelToken, DataSource, FailCategory, FetchOutcome, FetchPipeline, Snapshot, Symbol,
};
use serde::Serialize;

use crate::cli::{Cli, OutputFormat, SnapshotArgs};
use crate::error::CliError;
use crate::output;
use crate::universe;

#[derive(Debug, Serialize)]
struct SnapshotReply {
    snapshots: Vec<Snapshot>,
    soft_failures: Vec<FailedSymbol>,
    cache_hits: u64,
    cache_misses: u64,
    cancelled: bool,
}

#[derive(Debug, Serialize)]
struct FailedSymbol {
    symbol: Symbol,
    category: FailCategory,
    message: String,
}

pub async fn run(
    cli: &Cli,
    args: &SnapshotArgs,
    source: Arc<dyn DataSource>,
    cancel: &CancelToken,
) -> Result<(), CliError> {
    let symbols = universe::parse_symbols(&args.symbols)?;
    let pipeline = FetchPipeline::new(args.fetch.to_config(), source)?;

    let run = pipeline.fetch_snapshots(&symbols, cancel).await;

    let mut snapshots = Vec::new();
    let mut soft_failures = Vec::new();
    for (symbol, outcome) in run.results {
        match outcome {
            FetchOutcome::Ok(snapshot) => snapshots.push(snapshot),
            FetchOutcome::Soft(failure) => soft_failures.push(FailedSymbol {
                symbol,
                category: failure.category,
                message: failure.message,
            }),
        }
    }
    snapshots.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    soft_failures.sort_by(|a, b| a.symbol.cmp(&b.symbol));

    let reply = SnapshotReply {
        snapshots,
        soft_failures,
        cache_hits: run.stats.cache_hits,
        cache_misses: run.stats.cache_misses,
        cancelled: run.stats.cancelled,
    };

    match cli.format {
        OutputFormat::Json => output::print_json(&reply, cli.pretty)?,
        OutputFormat::Table => {
            output::print_snapshot_table(&reply.snapshots);
            for failure in &reply.soft_failures {
                println!(
                    "soft failure {}: {} ({})",
                    failure.symbol, failure.message, failure.category
                );
            }
            if reply.cancelled {
                println!("run was cancelled; results are partial");
            }
        }
    }
    Ok(())
}
