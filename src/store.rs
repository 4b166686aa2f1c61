//! Per-instrument candle persistence.
//!
//! [`CandleStore`] owns a root directory holding one headerless CSV file per
//! instrument. Files are the only durable state of the subsystem: resume
//! points are derived from them, and merges rewrite them as a sorted,
//! timestamp-deduplicated union of old and new records. Files for different
//! instruments are fully independent — a failure on one never touches
//! another.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::error::Result;
use crate::types::{Candle, Instrument};

/// Append-only-in-spirit, rewrite-on-merge store of candle files.
///
/// Invariant after every successful [`merge`](CandleStore::merge): the file
/// contains no duplicate timestamps and is sorted ascending by timestamp.
#[derive(Debug, Clone)]
pub struct CandleStore {
    root: PathBuf,
}

impl CandleStore {
    /// Create a store rooted at `root`. The directory itself is created
    /// lazily, on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// The store file backing `instrument`.
    pub fn path_for(&self, instrument: &Instrument) -> PathBuf {
        instrument.store_file(&self.root)
    }

    /// Determine the date from which a run should (re-)fetch `instrument`.
    ///
    /// Missing or empty file: the directory is created on demand and
    /// `default_start` is returned. Otherwise the calendar date of the
    /// latest stored timestamp is returned — not the day after, because the
    /// final stored day may have been partial when written. The merge step
    /// replaces stale rows for that day with the refetched ones.
    pub async fn resume_point(
        &self,
        instrument: &Instrument,
        default_start: NaiveDate,
    ) -> Result<NaiveDate> {
        let path = self.path_for(instrument);
        if !tokio::fs::try_exists(&path).await? {
            tokio::fs::create_dir_all(&self.root).await?;
            tracing::info!(
                symbol = %instrument.trading_symbol,
                start = %default_start,
                "no stored data, starting from default"
            );
            return Ok(default_start);
        }

        let contents = tokio::fs::read_to_string(&path).await?;
        let Some(last_line) = contents.lines().rev().find(|l| !l.trim().is_empty()) else {
            return Ok(default_start);
        };

        let timestamp = last_line.split(',').next().unwrap_or("");
        let date_prefix: String = timestamp.chars().take(10).collect();
        let resume = NaiveDate::parse_from_str(&date_prefix, "%Y-%m-%d")?;
        tracing::info!(
            symbol = %instrument.trading_symbol,
            resume = %resume,
            "resuming from latest stored day"
        );
        Ok(resume)
    }

    /// Merge freshly fetched candles into the instrument's file.
    ///
    /// The result is the union of old and new rows, deduplicated by
    /// timestamp (new rows win) and sorted ascending. Existing rows whose
    /// calendar date appears among the new rows are dropped first, so a
    /// fresh, complete day fully replaces a stale partial one. The file is
    /// assembled in memory and written with a single call, so a reader never
    /// observes a half-written file. No-op for an empty batch. Idempotent.
    pub async fn merge(&self, instrument: &Instrument, new_candles: &[Candle]) -> Result<usize> {
        if new_candles.is_empty() {
            return Ok(0);
        }

        let path = self.path_for(instrument);
        tokio::fs::create_dir_all(&self.root).await?;

        let refetched_dates: HashSet<&str> = new_candles.iter().map(Candle::date).collect();

        let mut rows: BTreeMap<String, String> = BTreeMap::new();
        if tokio::fs::try_exists(&path).await? {
            let existing = tokio::fs::read_to_string(&path).await?;
            for line in existing.lines().filter(|l| !l.trim().is_empty()) {
                let ts = line.split(',').next().unwrap_or("");
                let date = &ts[..10.min(ts.len())];
                if refetched_dates.contains(date) {
                    continue;
                }
                rows.insert(ts.to_owned(), line.to_owned());
            }
        }
        for candle in new_candles {
            rows.insert(candle.timestamp.clone(), candle.to_csv_row());
        }

        let mut buf = String::with_capacity(rows.len() * 48);
        for line in rows.values() {
            buf.push_str(line);
            buf.push('\n');
        }
        tokio::fs::write(&path, buf).await?;

        tracing::info!(
            symbol = %instrument.trading_symbol,
            merged = new_candles.len(),
            total = rows.len(),
            "saved instrument file"
        );
        Ok(rows.len())
    }
}
