use std::sync::Arc;

use marketsieve_core::{CancelToken, DataSource, FetchConfig, FetchOutcome, FetchPipeline, Symbol};

use crate::cli::{BarsArgs, Cli, OutputFormat};
use crate::error::CliError;
use crate::output;

pub async fn run(
    cli: &Cli,
    args: &BarsArgs,
    source: Arc<dyn DataSource>,
    cancel: &CancelToken,
) -> Result<(), CliError> {
    let symbol = Symbol::parse(&args.symbol)?;
    let config = FetchConfig {
        bar_count: args.count,
        ..args.fetch.to_config()
    };
    let pipeline = FetchPipeline::new(config, source)?;

    let mut run = pipeline.fetch_series(&[symbol.clone()], cancel).await;

    if run.stats.cancelled && run.results.is_empty() {
        return Err(CliError::Command(String::from("run cancelled")));
    }

    let Some((_, outcome)) = run.results.pop() else {
        return Err(CliError::Command(format!("no result for {symbol}")));
    };

    match outcome {
        FetchOutcome::Ok(series) => match cli.format {
            OutputFormat::Json => output::print_json(&series, cli.pretty)?,
            OutputFormat::Table => output::print_series_table(&series),
        },
        FetchOutcome::Soft(failure) => {
            return Err(CliError::Command(format!(
                "{symbol} failed: {} ({})",
                failure.message, failure.category
            )));
        }
    }
    Ok(())
}
