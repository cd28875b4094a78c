use std::sync::Arc;

use marketsieve_core::{
    CancelToken, DataSource, FilterConfig, Screener, ScreenerConfig, Scorer, Symbol,
};

use crate::cli::{Cli, OutputFormat, ScreenArgs};
use crate::error::CliError;
use crate::output;
use crate::scoring::weighted_score;
use crate::universe;

pub async fn run(
    cli: &Cli,
    args: &ScreenArgs,
    source: Arc<dyn DataSource>,
    cancel: &CancelToken,
) -> Result<(), CliError> {
    let symbols = gather_universe(args)?;
    if symbols.is_empty() {
        return Err(CliError::Command(String::from(
            "no universe given: pass symbols or --universe-file",
        )));
    }

    let filter = FilterConfig {
        min_price: args.min_price,
        min_volume: args.min_volume,
        min_market_cap: args.min_market_cap,
        max_change_rate: args.max_change_rate,
        min_bars: args.min_bars,
        momentum_window: (args.momentum_window > 0).then_some(args.momentum_window),
        max_volatility: args.max_volatility,
        max_selected: args.limit,
    };
    let config = ScreenerConfig::new(args.fetch.to_config(), filter)?;

    let scorer: Arc<dyn Scorer> = Arc::new(weighted_score);
    let screener = Screener::new(config, source, scorer)?;

    let report = screener.run(&symbols, cancel).await;
    log::info!(
        "screen {}: {} -> {} -> {} -> {}",
        report.run_id,
        report.universe_size,
        report.coarse_survivors,
        report.detail_survivors,
        report.selected_count()
    );

    match cli.format {
        OutputFormat::Json => output::print_json(&report, cli.pretty)?,
        OutputFormat::Table => output::print_screen_table(&report),
    }
    Ok(())
}

fn gather_universe(args: &ScreenArgs) -> Result<Vec<Symbol>, CliError> {
    let mut symbols = universe::parse_symbols(&args.symbols)?;
    if let Some(path) = &args.universe_file {
        symbols.extend(universe::load_universe(path)?);
    }
    Ok(symbols)
}
