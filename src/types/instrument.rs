//! Instrument identity and store-file naming.

use std::path::{Path, PathBuf};

/// One tradable entity, as supplied by the host's active watchlist.
///
/// Immutable for the duration of a backfill run. `instrument_key` identifies
/// the entity against the upstream API (e.g. `NSE_EQ|INE002A01018`);
/// `trading_symbol` names the store file it maps to.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct Instrument {
    /// Unique upstream identifier, used in request URLs.
    pub instrument_key: String,
    /// Human-readable symbol, used (sanitized) as the store file name.
    pub trading_symbol: String,
}

impl Instrument {
    /// Create a new instrument.
    pub fn new(instrument_key: impl Into<String>, trading_symbol: impl Into<String>) -> Self {
        Self {
            instrument_key: instrument_key.into(),
            trading_symbol: trading_symbol.into(),
        }
    }

    /// The store file for this instrument under `root`.
    ///
    /// Path-hostile characters in the trading symbol (notably the `|`
    /// segment separator) are replaced with `_`.
    pub fn store_file(&self, root: &Path) -> PathBuf {
        root.join(format!("{}.csv", sanitize_symbol(&self.trading_symbol)))
    }
}

/// Replace characters that are unsafe in file names.
fn sanitize_symbol(symbol: &str) -> String {
    symbol.replace(['|', '/', '\\', ':'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_file_sanitizes_pipe() {
        let inst = Instrument::new("NSE_EQ|INE002A01018", "NSE_EQ|RELIANCE");
        let path = inst.store_file(Path::new("/data"));
        assert_eq!(path, PathBuf::from("/data/NSE_EQ_RELIANCE.csv"));
    }

    #[test]
    fn store_file_plain_symbol_unchanged() {
        let inst = Instrument::new("NSE_EQ|2963201", "TCS-EQ");
        assert_eq!(
            inst.store_file(Path::new("/data")),
            PathBuf::from("/data/TCS-EQ.csv")
        );
    }
}
