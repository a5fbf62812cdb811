//! Ticker symbols and watchlist parsing helpers.

use std::collections::HashSet;
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FeedError;

/// Trait providing watchlist file parsing for symbols.
pub trait SymbolParser: Sized {
    /// Parses symbols from a buffered reader.
    ///
    /// Symbols may be separated by commas, whitespace, or new lines. Duplicates are
    /// dropped while keeping the first occurrence. Returns an error if any token is
    /// not a valid symbol.
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<Self>, FeedError>;
}

/// Ticker identifier of a tradable stock, e.g. `AAPL` or `BRK.B`.
///
/// Always upper-case ASCII alphanumerics plus `.` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Returns the symbol text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Symbol {
    type Err = FeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let valid = !trimmed.is_empty()
            && trimmed
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
        if !valid {
            return Err(FeedError::InvalidSymbol(s.to_string()));
        }
        Ok(Symbol(trimmed.to_ascii_uppercase()))
    }
}

impl TryFrom<String> for Symbol {
    type Error = FeedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl SymbolParser for Symbol {
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<Self>, FeedError> {
        let mut symbols = Vec::new();
        let mut seen = HashSet::new();

        for line_result in reader.lines() {
            let line = line_result.map_err(FeedError::Io)?;
            for token in line
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
            {
                match token.parse::<Self>() {
                    Ok(symbol) => {
                        if seen.insert(symbol.clone()) {
                            symbols.push(symbol);
                        }
                    }
                    Err(e) => return Err(FeedError::ParseSymbolsFile(e.to_string())),
                }
            }
        }
        Ok(symbols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn normalizes_case_and_whitespace() {
        let symbol: Symbol = "  brk.b ".parse().unwrap();
        assert_eq!(symbol.as_str(), "BRK.B");
    }

    #[test]
    fn rejects_empty_and_garbage() {
        assert!(matches!("".parse::<Symbol>(), Err(FeedError::InvalidSymbol(_))));
        assert!(matches!("AA PL".parse::<Symbol>(), Err(FeedError::InvalidSymbol(_))));
        assert!(matches!("$TSLA".parse::<Symbol>(), Err(FeedError::InvalidSymbol(_))));
    }

    #[test]
    fn watchlist_accepts_mixed_separators_and_dedups() {
        let file = Cursor::new("aapl, MSFT\n\n tsla aapl\nNVDA,");
        let symbols = Symbol::parse_from_file(file).unwrap();
        let names: Vec<&str> = symbols.iter().map(Symbol::as_str).collect();
        assert_eq!(names, vec!["AAPL", "MSFT", "TSLA", "NVDA"]);
    }

    #[test]
    fn watchlist_reports_bad_token() {
        let file = Cursor::new("AAPL\nMS#FT\n");
        let err = Symbol::parse_from_file(file).unwrap_err();
        assert!(matches!(err, FeedError::ParseSymbolsFile(_)));
    }

    #[test]
    fn deserializing_validates() {
        let ok: Symbol = serde_json::from_str("\"goog\"").unwrap();
        assert_eq!(ok.as_str(), "GOOG");
        assert!(serde_json::from_str::<Symbol>("\"\"").is_err());
    }
}
