//! Data model for the backfill subsystem.
//!
//! - [`instrument`] — tradable entities and their store-file naming
//! - [`candle`] — OHLCV records, API response ingest, and the CSV row codec

pub mod candle;
pub mod instrument;

pub use candle::Candle;
pub use instrument::Instrument;
