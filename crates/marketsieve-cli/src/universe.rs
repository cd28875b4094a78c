use std::path::Path;

use marketsieve_core::Symbol;

use crate::error::CliError;

/// Reads a universe file: one symbol per line, blank lines and `#` comments
/// ignored.
pub fn load_universe(path: &Path) -> Result<Vec<Symbol>, CliError> {
    let contents = std::fs::read_to_string(path)?;
    parse_universe(&contents)
}

pub fn parse_universe(contents: &str) -> Result<Vec<Symbol>, CliError> {
    let mut symbols = Vec::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        symbols.push(Symbol::parse(line)?);
    }
    Ok(symbols)
}

/// Parses symbols given directly on the command line.
pub fn parse_symbols(raw: &[String]) -> Result<Vec<Symbol>, CliError> {
    raw.iter()
        .map(|value| Symbol::parse(value).map_err(CliError::from))
        .collect()
}
