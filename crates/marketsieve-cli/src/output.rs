//! Rendering of command results as JSON or plain tables.

use marketsieve_core::{ScreenReport, Series, Snapshot};
use serde::Serialize;

use crate::error::CliError;

pub fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{rendered}");
    Ok(())
}

pub fn print_screen_table(report: &ScreenReport) {
    println!(
        "run {}  universe {} -> coarse {} -> detail {} -> selected {}",
        report.run_id,
        report.universe_size,
        report.coarse_survivors,
        report.detail_survivors,
        report.selected_count()
    );
    println!(
        "cache hits {}  misses {}  soft failures {}",
        report.cache_hits,
        report.cache_misses,
        report.soft_fails.values().sum::<u64>()
    );
    for (category, count) in &report.soft_fails {
        println!("  {category:>16}: {count}");
    }
    if report.cancelled {
        println!("run was cancelled; results are partial");
    }

    if report.selected.is_empty() {
        println!("no candidates selected");
        return;
    }

    println!("{:<4} {:<12} {:>8} {:>10} {:>9}  reason", "#", "symbol", "score", "price", "change");
    for (rank, entry) in report.selected.iter().enumerate() {
        println!(
            "{:<4} {:<12} {:>8.2} {:>10.3} {:>8.2}%  {}",
            rank + 1,
            entry.symbol,
            entry.score,
            entry.last_price,
            entry.change_rate * 100.0,
            entry.reason
        );
    }
}

pub fn print_snapshot_table(snapshots: &[Snapshot]) {
    println!(
        "{:<12} {:>10} {:>10} {:>12} {:>9} {:>14}",
        "symbol", "last", "open", "volume", "change", "market cap"
    );
    for snapshot in snapshots {
        println!(
            "{:<12} {:>10.3} {:>10.3} {:>12} {:>8.2}% {:>14.3e}",
            snapshot.symbol,
            snapshot.last_price,
            snapshot.open_price,
            snapshot.volume,
            snapshot.change_rate * 100.0,
            snapshot.market_cap
        );
    }
}

pub fn print_series_table(series: &Series) {
    println!("{} ({} bars)", series.symbol, series.len());
    println!(
        "{:<22} {:>9} {:>9} {:>9} {:>9} {:>12}",
        "ts", "open", "high", "low", "close", "volume"
    );
    for bar in &series.bars {
        println!(
            "{:<22} {:>9.3} {:>9.3} {:>9.3} {:>9.3} {:>12}",
            bar.ts, bar.open, bar.high, bar.low, bar.close, bar.volume
        );
    }
}
