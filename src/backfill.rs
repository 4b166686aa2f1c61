//! The backfill pipeline: probe → intraday → main → save.
//!
//! [`Backfiller`] drives one batch of instruments to a consistent on-disk
//! dataset. Instruments with no tradable history are filtered out by a
//! cheap single-chunk probe before the expensive full-history fan-out, so
//! delisted or mistyped instruments cannot burn the shared rate-limit
//! budget. Stages run sequentially (each stage's endpoint list depends on
//! the previous stage's classification); requests inside a stage run under
//! the fetcher's concurrency ceiling.
//!
//! Failure policy: one chunk failing never aborts the batch — the missing
//! chunk is simply absent and the resume logic refetches it on the next
//! run. Only catastrophic setup errors reject the top-level call.

use std::collections::HashMap;
use std::path::Path;

use chrono::NaiveDate;

use crate::client::{HttpSession, Transport};
use crate::constants::{
    API_BASE_URL, GLOBAL_START_DATE, INTRADAY_BASE_URL, MINUTE_CHUNK_DAYS, MINUTE_INTERVAL,
    SAVE_CONCURRENCY,
};
use crate::dates::{DateRange, chunk_date_ranges};
use crate::error::{BackfillError, Result};
use crate::fetch::{FetchReport, FetcherConfig, RateLimitFetcher};
use crate::pool::run_all;
use crate::store::CandleStore;
use crate::types::{Candle, Instrument};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Tuning for one backfill invocation. `..Default::default()` is the
/// intended way to override a subset.
#[derive(Debug, Clone)]
pub struct BackfillOptions {
    pub concurrent_requests: usize,
    pub client_refresh_threshold: usize,
    pub max_retries: u32,
    /// Earliest date fetched for instruments with no stored history.
    pub start_date: NaiveDate,
    /// Upper bound of the fetch window. `None` means today.
    pub end_date: Option<NaiveDate>,
    pub interval: String,
    pub base_url: String,
    pub intraday_url: String,
    pub handshake_url: String,
    /// Concurrent merges during the save stage.
    pub save_concurrency: usize,
}

impl Default for BackfillOptions {
    fn default() -> Self {
        let start_date = NaiveDate::parse_from_str(GLOBAL_START_DATE, "%Y-%m-%d")
            .unwrap_or_else(|_| unreachable!("GLOBAL_START_DATE is a valid date"));
        Self {
            concurrent_requests: crate::constants::fetcher::CONCURRENT_REQUESTS,
            client_refresh_threshold: crate::constants::fetcher::CLIENT_REFRESH_THRESHOLD,
            max_retries: crate::constants::fetcher::MAX_RETRIES,
            start_date,
            end_date: None,
            interval: MINUTE_INTERVAL.to_owned(),
            base_url: API_BASE_URL.to_owned(),
            intraday_url: INTRADAY_BASE_URL.to_owned(),
            handshake_url: crate::constants::API_ORIGIN.to_owned(),
            save_concurrency: SAVE_CONCURRENCY,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-instrument plan
// ---------------------------------------------------------------------------

/// What one instrument needs this run: its chunked fetch window plus the
/// candles accumulated across stages, merged once in the save stage.
struct InstrumentPlan {
    instrument: Instrument,
    ranges: Vec<DateRange>,
    gathered: Vec<Candle>,
    /// Set when the probe chunk returned data; gates the main stage.
    has_data: bool,
}

// ---------------------------------------------------------------------------
// Backfiller
// ---------------------------------------------------------------------------

/// Orchestrates the four-stage pipeline over one transport and one store.
///
/// Generic over [`Transport`] so the whole pipeline can run against a
/// scripted backend in tests; production code goes through [`backfill`].
pub struct Backfiller<T: Transport> {
    transport: T,
    store: CandleStore,
    options: BackfillOptions,
}

impl<T: Transport> Backfiller<T> {
    pub fn new(transport: T, store: CandleStore, options: BackfillOptions) -> Self {
        Self {
            transport,
            store,
            options,
        }
    }

    /// The underlying transport (tests inspect scripted transports here).
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Run the pipeline for one batch of instruments.
    ///
    /// Rejects only on setup failure (root directory not creatable);
    /// per-instrument and per-chunk problems are logged and isolated.
    pub async fn run(&mut self, instruments: &[Instrument]) -> Result<()> {
        tokio::fs::create_dir_all(self.store.root())
            .await
            .map_err(|e| {
                BackfillError::Setup(format!(
                    "root path {} not writable: {e}",
                    self.store.root().display()
                ))
            })?;

        let end_date = self
            .options
            .end_date
            .unwrap_or_else(|| chrono::Local::now().date_naive());

        let mut plans = self.plan_instruments(instruments, end_date).await;
        if plans.is_empty() {
            tracing::info!("nothing to backfill");
            return Ok(());
        }

        // Stage 1: probe the single most-recent chunk per instrument.
        let probe_urls: Vec<(String, usize)> = plans
            .iter()
            .enumerate()
            .filter_map(|(i, plan)| {
                plan.ranges
                    .last()
                    .map(|range| (self.candle_url(&plan.instrument, range), i))
            })
            .collect();
        let report = self.fetch(probe_urls.iter().map(|(u, _)| u.clone()).collect()).await;
        self.gather(&mut plans, &probe_urls, report, true);
        let valid = plans.iter().filter(|p| p.has_data).count();
        tracing::info!(
            probed = probe_urls.len(),
            valid,
            "probe stage complete"
        );

        // Stage 2: current-session intraday data for every instrument,
        // probed or not — same-day rows are not in any historical chunk yet.
        let intraday_urls: Vec<(String, usize)> = plans
            .iter()
            .enumerate()
            .map(|(i, plan)| (self.intraday_url(&plan.instrument), i))
            .collect();
        let report = self
            .fetch(intraday_urls.iter().map(|(u, _)| u.clone()).collect())
            .await;
        self.gather(&mut plans, &intraday_urls, report, false);

        // Stage 3: full history for instruments the probe validated,
        // skipping the chunk the probe already fetched.
        let mut main_urls: Vec<(String, usize)> = Vec::new();
        for (i, plan) in plans.iter().enumerate() {
            if !plan.has_data {
                continue;
            }
            let skip_last = plan.ranges.len().saturating_sub(1);
            for range in &plan.ranges[..skip_last] {
                main_urls.push((self.candle_url(&plan.instrument, range), i));
            }
        }
        let report = self.fetch(main_urls.iter().map(|(u, _)| u.clone()).collect()).await;
        self.gather(&mut plans, &main_urls, report, false);

        // Stage 4: one merge per instrument file, concurrently across
        // instruments. Files are independent; a failed merge is logged and
        // costs only that instrument's data for this run.
        let store = self.store.clone();
        let to_save: Vec<&InstrumentPlan> =
            plans.iter().filter(|p| !p.gathered.is_empty()).collect();
        let saved = run_all(self.options.save_concurrency, to_save, |plan| {
            let store = store.clone();
            async move {
                store
                    .merge(&plan.instrument, &plan.gathered)
                    .await
                    .map_err(|e| {
                        tracing::error!(
                            symbol = %plan.instrument.trading_symbol,
                            error = %e,
                            "failed to save instrument file"
                        );
                        e
                    })
                    .is_ok()
            }
        })
        .await;

        tracing::info!(
            instruments = instruments.len(),
            saved = saved.iter().filter(|ok| **ok).count(),
            "backfill batch complete"
        );
        Ok(())
    }

    /// Resolve each instrument's resume point and chunk its fetch window.
    /// Resume failures are per-file: the instrument is dropped from this
    /// run and its file left untouched.
    async fn plan_instruments(
        &self,
        instruments: &[Instrument],
        end_date: NaiveDate,
    ) -> Vec<InstrumentPlan> {
        let store = &self.store;
        let start_date = self.options.start_date;
        let resumes = run_all(SAVE_CONCURRENCY, instruments, |instrument| async move {
            store
                .resume_point(instrument, start_date)
                .await
                .map(|resume| (instrument, resume))
                .map_err(|e| {
                    tracing::error!(
                        symbol = %instrument.trading_symbol,
                        error = %e,
                        "could not resolve resume point, skipping instrument"
                    );
                })
        })
        .await;

        resumes
            .into_iter()
            .flatten()
            .map(|(instrument, resume)| InstrumentPlan {
                instrument: instrument.clone(),
                ranges: chunk_date_ranges(resume, end_date, MINUTE_CHUNK_DAYS),
                gathered: Vec::new(),
                has_data: false,
            })
            .collect()
    }

    /// One fetcher invocation over a stage's endpoint list.
    async fn fetch(&mut self, endpoints: Vec<String>) -> FetchReport {
        let config = FetcherConfig {
            concurrent_requests: self.options.concurrent_requests,
            client_refresh_threshold: self.options.client_refresh_threshold,
            max_retries: self.options.max_retries,
            handshake_url: self.options.handshake_url.clone(),
            ..FetcherConfig::default()
        };
        RateLimitFetcher::new(&mut self.transport, endpoints, config)
            .run()
            .await
    }

    /// Attribute a stage's successes back to their instruments via the
    /// URL → plan map (never positionally: retries reorder the stream) and
    /// stage the parsed candles for the save stage.
    fn gather(
        &self,
        plans: &mut [InstrumentPlan],
        urls: &[(String, usize)],
        report: FetchReport,
        mark_valid: bool,
    ) {
        let by_url: HashMap<&str, usize> =
            urls.iter().map(|(url, i)| (url.as_str(), *i)).collect();

        for success in report.successes {
            let Some(&plan_idx) = by_url.get(success.url.as_str()) else {
                tracing::warn!(url = %success.url, "success for unknown url, dropping");
                continue;
            };
            match Candle::parse_response(&success.body) {
                Ok(candles) => {
                    if !candles.is_empty() {
                        if mark_valid {
                            plans[plan_idx].has_data = true;
                        }
                        plans[plan_idx].gathered.extend(candles);
                    }
                }
                Err(e) => {
                    tracing::error!(
                        url = %success.url,
                        error = %e,
                        "unparseable response body, dropping"
                    );
                }
            }
        }

        for failure in &report.failures {
            tracing::error!(url = %failure.url, reason = %failure.reason, "chunk fetch failed");
        }
    }

    fn candle_url(&self, instrument: &Instrument, range: &DateRange) -> String {
        // Upstream path order is to-date before from-date.
        format!(
            "{}/{}/{}/{}/{}",
            self.options.base_url,
            instrument.instrument_key,
            self.options.interval,
            DateRange::fmt(range.to),
            DateRange::fmt(range.from)
        )
    }

    fn intraday_url(&self, instrument: &Instrument) -> String {
        format!(
            "{}/{}/{}",
            self.options.intraday_url, instrument.instrument_key, self.options.interval
        )
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Backfill candle history for `instruments` into per-instrument files
/// under `root`.
///
/// This is the host-facing entry point, called after a watchlist is
/// finalized and once more on application shutdown with the last active
/// watchlist. Safe to call repeatedly: the stores' resume/merge design
/// makes runs idempotent, and partial progress survives interruption.
///
/// `access_token` is the bearer credential produced by the host's login
/// flow. Rejects only on catastrophic setup failure; per-instrument
/// problems are logged and retried on the next invocation.
pub async fn backfill(
    instruments: &[Instrument],
    root: &Path,
    access_token: &str,
    options: Option<BackfillOptions>,
) -> Result<()> {
    let session = HttpSession::new(access_token)?;
    let store = CandleStore::new(root);
    let mut backfiller = Backfiller::new(session, store, options.unwrap_or_default());
    backfiller.run(instruments).await
}
