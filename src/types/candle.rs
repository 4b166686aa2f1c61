//! OHLCV candle records and the boundary between raw API tuples and typed data.
//!
//! The upstream API returns candles as JSON 7-tuples
//! `[timestamp, open, high, low, close, volume, openInterest]`. Rows are
//! validated and converted into [`Candle`] immediately on ingest; malformed
//! rows are logged and skipped rather than propagated.

use serde::Deserialize;

/// One OHLCV + open-interest record for a fixed time bucket.
///
/// `timestamp` is normalized to `YYYY-MM-DD HH:MM:SS` so that lexicographic
/// order is chronological order. It is the natural key: unique within a
/// store file, ascending after every merge.
#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub timestamp: String,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
    pub open_interest: i64,
}

/// Raw wire shape of one candle row. The upstream occasionally emits volume
/// and open interest as floats, so both are accepted and truncated.
#[derive(Debug, Deserialize)]
struct RawRow(String, f64, f64, f64, f64, f64, #[serde(default)] f64);

/// JSON envelope returned by both the historical and intraday endpoints.
#[derive(Debug, Deserialize)]
struct CandleEnvelope {
    #[serde(default)]
    data: Option<CandleBlock>,
}

#[derive(Debug, Deserialize)]
struct CandleBlock {
    #[serde(default)]
    candles: Vec<serde_json::Value>,
}

impl Candle {
    /// Validate and convert one raw API row.
    ///
    /// Returns `None` (after logging) when the row is not a well-formed
    /// 7-tuple, so one bad row never poisons the rest of a response.
    pub fn from_row(row: &serde_json::Value) -> Option<Self> {
        match serde_json::from_value::<RawRow>(row.clone()) {
            Ok(raw) => Some(Self {
                timestamp: normalize_timestamp(&raw.0),
                open: raw.1,
                high: raw.2,
                low: raw.3,
                close: raw.4,
                volume: raw.5 as i64,
                open_interest: raw.6 as i64,
            }),
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed candle row");
                None
            }
        }
    }

    /// Parse a response body from the candle endpoints into typed records.
    ///
    /// An absent `data` block or empty `candles` array yields an empty vec —
    /// the "instrument has no data in range" signal used by the probe stage.
    pub fn parse_response(body: &str) -> crate::error::Result<Vec<Candle>> {
        let envelope: CandleEnvelope = serde_json::from_str(body)?;
        let rows = envelope.data.map(|d| d.candles).unwrap_or_default();
        Ok(rows.iter().filter_map(Candle::from_row).collect())
    }

    /// The calendar-date prefix (`YYYY-MM-DD`) of this candle's timestamp.
    pub fn date(&self) -> &str {
        &self.timestamp[..10.min(self.timestamp.len())]
    }

    /// Encode as one headerless CSV row.
    pub fn to_csv_row(&self) -> String {
        format!(
            "{},{},{},{},{},{},{}",
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
            self.open_interest
        )
    }

    /// Decode one CSV row previously written by [`Candle::to_csv_row`].
    pub fn from_csv_row(line: &str) -> Option<Self> {
        let mut fields = line.splitn(7, ',');
        let timestamp = fields.next()?.to_owned();
        let open = fields.next()?.parse().ok()?;
        let high = fields.next()?.parse().ok()?;
        let low = fields.next()?.parse().ok()?;
        let close = fields.next()?.parse().ok()?;
        let volume = fields.next()?.parse().ok()?;
        let open_interest = fields.next()?.trim_end().parse().ok()?;
        Some(Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            open_interest,
        })
    }
}

/// Normalize an upstream ISO timestamp (`2023-01-02T09:15:00+05:30`) to the
/// sortable store form `2023-01-02 09:15:00`: first 19 characters, `T`
/// replaced with a space.
fn normalize_timestamp(raw: &str) -> String {
    let trimmed = if raw.is_char_boundary(19) && raw.len() >= 19 {
        &raw[..19]
    } else {
        raw
    };
    trimmed.replace('T', " ")
}
