//! Constants for the Upstox historical-candle API and backfill defaults.
//!
//! Contains base URLs, interval names, chunking limits, and the retry/backoff
//! defaults used by [`RateLimitFetcher`](crate::fetch::RateLimitFetcher) and
//! [`Backfiller`](crate::backfill::Backfiller). Exported for advanced usage.

// ---------------------------------------------------------------------------
// Base URLs
// ---------------------------------------------------------------------------

/// Base URL for historical candle data (date-ranged chunks).
pub const API_BASE_URL: &str = "https://api.upstox.com/v2/historical-candle";

/// Base URL for current-session intraday candles (no date range).
pub const INTRADAY_BASE_URL: &str = "https://api.upstox.com/v2/historical-candle/intraday";

/// API origin, used for the low-cost session handshake before data requests.
pub const API_ORIGIN: &str = "https://api.upstox.com";

// ---------------------------------------------------------------------------
// Candle intervals and chunking
// ---------------------------------------------------------------------------

/// The candle interval fetched by the backfill pipeline.
pub const MINUTE_INTERVAL: &str = "1minute";

/// Maximum span of one historical request for minute-resolution data, in
/// days. Conservative margin under the upstream per-request window cap.
pub const MINUTE_CHUNK_DAYS: u32 = 28;

/// Earliest date fetched for an instrument with no stored history.
pub const GLOBAL_START_DATE: &str = "2023-01-01";

// ---------------------------------------------------------------------------
// Fetcher defaults
// ---------------------------------------------------------------------------

/// Retry, concurrency, and backoff defaults for the rate-limited fetcher.
pub mod fetcher {
    /// Requests issued concurrently per batch.
    pub const CONCURRENT_REQUESTS: usize = 25;
    /// Requests per session before a proactive cookie rotation.
    pub const CLIENT_REFRESH_THRESHOLD: usize = 250;
    /// Maximum retries per endpoint (429s excluded from the count).
    pub const MAX_RETRIES: u32 = 5;
    /// Per-request timeout in seconds.
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    /// Randomized cooldown bounds after a rate-limited batch, in milliseconds.
    pub const RATE_LIMIT_COOLDOWN_MS: (u64, u64) = (2_000, 4_000);
    /// Pause after a failed mid-run handshake before resuming, in milliseconds.
    pub const REFRESH_FAILURE_PAUSE_MS: u64 = 5_000;
}

// ---------------------------------------------------------------------------
// Store defaults
// ---------------------------------------------------------------------------

/// Concurrency ceiling for the save stage (independent per-instrument files).
pub const SAVE_CONCURRENCY: usize = 8;
