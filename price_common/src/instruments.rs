//! Instrument identifiers and helpers shared between client and server.
//!
//! Instruments are free-form market-data ids (`bitcoin`, `ethereum`, ...). They become
//! part of store keys, so an id must be non-empty and must not contain the `:` key
//! separator.
use std::io::BufRead;

use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};

use crate::error::CacheError;

/// Separator used between the parts of a store key.
pub const KEY_SEPARATOR: char = ':';

/// Returns `Ok(())` if `id` can safely be embedded in a store key.
pub fn validate_id(id: &str) -> Result<(), CacheError> {
    if id.is_empty() || id.contains(KEY_SEPARATOR) || id.chars().any(char::is_whitespace) {
        return Err(CacheError::InvalidInstrument(id.to_string()));
    }
    Ok(())
}

/// Trait providing file parsing for instrument lists.
pub trait InstrumentParser {
    /// Parses instrument ids from a buffered reader.
    ///
    /// Ids may be separated by commas, spaces or new lines. Blank entries are ignored,
    /// duplicates are kept once in first-seen order. Returns an error on the first
    /// invalid id.
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<String>, CacheError>;
}

/// Marker type implementing [`InstrumentParser`] for plain string ids.
pub struct InstrumentList;

impl InstrumentParser for InstrumentList {
    fn parse_from_file<R: BufRead>(reader: R) -> Result<Vec<String>, CacheError> {
        let mut ids: Vec<String> = Vec::new();

        for line_result in reader.lines() {
            let line = line_result.map_err(CacheError::Io)?;
            for raw in line.split(|c: char| c == ',' || c.is_whitespace()) {
                let id = raw.trim();
                if id.is_empty() {
                    continue;
                }
                validate_id(id)?;
                if !ids.iter().any(|known| known == id) {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }
}

impl InstrumentList {
    /// Parses a comma separated list such as the value of a CLI flag.
    pub fn parse_csv(list: &str) -> Result<Vec<String>, CacheError> {
        Self::parse_from_file(list.as_bytes())
    }
}

/// Instruments tracked when no explicit set is configured.
#[allow(missing_docs)]
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Display, EnumString, EnumIter, Hash, Eq, PartialEq,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum DefaultInstrument {
    Bitcoin,
    Ethereum,
    Ripple,
    Cardano,
    Solana,
}

impl DefaultInstrument {
    /// All default instrument ids, in configuration order.
    pub fn ids() -> Vec<String> {
        use strum::IntoEnumIterator;
        Self::iter().map(|i| i.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators_and_dedups() {
        let input = "bitcoin, ethereum\n\nsolana bitcoin\n";
        let ids = InstrumentList::parse_from_file(input.as_bytes()).unwrap();
        assert_eq!(ids, vec!["bitcoin", "ethereum", "solana"]);
    }

    #[test]
    fn rejects_ids_with_separator() {
        let err = InstrumentList::parse_csv("bitcoin,bad:id").unwrap_err();
        assert!(matches!(err, CacheError::InvalidInstrument(id) if id == "bad:id"));
    }

    #[test]
    fn validate_rejects_empty() {
        assert!(validate_id("").is_err());
        assert!(validate_id("usd-coin").is_ok());
    }

    #[test]
    fn default_ids_are_lowercase() {
        assert_eq!(
            DefaultInstrument::ids(),
            vec!["bitcoin", "ethereum", "ripple", "cardano", "solana"]
        );
        assert_eq!("BITCOIN".parse::<DefaultInstrument>().unwrap(), DefaultInstrument::Bitcoin);
    }
}
