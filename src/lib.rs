//! # candlefill
//!
//! Incremental, resumable OHLCV candle backfill for the Upstox
//! historical-candle API.
//!
//! The crate fetches per-instrument minute candles across thousands of
//! instruments and date chunks under a shared, undocumented rate limit —
//! with bounded concurrency, cookie/session rotation on 429s, exponential
//! retry budgets, and crash-safe per-instrument CSV stores that make
//! repeated runs converge instead of duplicating work.
//!
//! ## Quick Start
//!
//! ```no_run
//! use candlefill::{backfill, Instrument};
//!
//! #[tokio::main]
//! async fn main() -> candlefill::Result<()> {
//!     let watchlist = vec![
//!         Instrument::new("NSE_EQ|INE002A01018", "RELIANCE-EQ"),
//!         Instrument::new("NSE_EQ|INE009A01021", "INFY-EQ"),
//!     ];
//!     backfill(&watchlist, "data".as_ref(), "access-token", None).await
//! }
//! ```

pub mod backfill;
pub mod client;
pub mod constants;
pub mod dates;
pub mod error;
pub mod fetch;
pub mod pool;
pub mod store;
pub mod types;

/// Re-export the entry point and main types at crate root for convenience.
pub use backfill::{Backfiller, BackfillOptions, backfill};
pub use client::{HttpReply, HttpSession, Transport};
pub use dates::{DateRange, chunk_date_ranges};
pub use error::{BackfillError, Result};
pub use fetch::{FetchReport, FetcherConfig, RateLimitFetcher};
pub use pool::run_all;
pub use store::CandleStore;
pub use types::{Candle, Instrument};
