use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SYMBOL_LEN: usize = 15;

/// HK instrument code prefixes that denote warrants/CBBCs and other
/// derivatives excluded from the screening universe.
const DERIVATIVE_PREFIXES: &[&str] = &["810", "441", "457", "458", "459", "883", "884"];

/// Normalized market symbol in `MARKET.CODE` form, e.g. `HK.00700`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Parse and normalize a symbol to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_SYMBOL_LEN {
            return Err(ValidationError::SymbolTooLong {
                len,
                max: MAX_SYMBOL_LEN,
            });
        }

        let (market, code) = normalized
            .split_once('.')
            .ok_or_else(|| ValidationError::SymbolMissingMarket {
                value: normalized.clone(),
            })?;

        if market.is_empty() || !market.chars().all(|ch| ch.is_ascii_alphabetic()) {
            return Err(ValidationError::SymbolMissingMarket {
                value: normalized.clone(),
            });
        }

        if code.is_empty() {
            return Err(ValidationError::EmptySymbol);
        }

        for (index, ch) in code.chars().enumerate() {
            if !ch.is_ascii_alphanumeric() {
                return Err(ValidationError::SymbolInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Market segment of the symbol (`HK` in `HK.00700`).
    pub fn market(&self) -> &str {
        self.0.split_once('.').map(|(m, _)| m).unwrap_or("")
    }

    /// Instrument code of the symbol (`00700` in `HK.00700`).
    pub fn code(&self) -> &str {
        self.0.split_once('.').map(|(_, c)| c).unwrap_or(&self.0)
    }

    /// Whether the code matches a known derivative prefix (HK warrants/CBBCs).
    pub fn is_derivative(&self) -> bool {
        self.market() == "HK"
            && DERIVATIVE_PREFIXES
                .iter()
                .any(|prefix| self.code().starts_with(prefix))
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Symbol {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Symbol {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Symbol> for String {
    fn from(value: Symbol) -> Self {
        value.0
    }
}
