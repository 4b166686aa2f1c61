//! Bounded-concurrency fetcher with rate-limit backoff and session rotation.
//!
//! [`RateLimitFetcher`] drains a queue of endpoint URLs through a shared
//! [`Transport`], issuing up to `concurrent_requests` at a time. The
//! upstream enforces an undocumented per-session rate limit, so the fetcher
//! separates two failure ideas: *this request failed* (retry it, bounded by
//! `max_retries`) and *this session is probably poisoned* (rotate cookies
//! and re-handshake, no retry budget spent).
//!
//! State machine: `INIT → HANDSHAKE → (RUNNING ⇄ REFRESHING) → DONE`.
//!
//! No ordering is guaranteed across endpoints — retries and rate-limit
//! requeues reorder the stream, so every success carries its originating
//! URL and callers attribute results through it, never through position.

use std::collections::VecDeque;
use std::time::Duration;

use futures_util::future::join_all;
use rand::Rng;

use crate::client::{HttpReply, Transport};
use crate::constants::fetcher as defaults;
use crate::constants::API_ORIGIN;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning knobs for one fetcher run.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Batch-size ceiling: requests issued concurrently.
    pub concurrent_requests: usize,
    /// Requests per session before a proactive rotation.
    pub client_refresh_threshold: usize,
    /// Retry budget per endpoint (429s are not counted against it).
    pub max_retries: u32,
    /// Low-cost URL probed before data requests and after every rotation.
    pub handshake_url: String,
    /// Randomized cooldown bounds after a rate-limited batch.
    pub rate_limit_cooldown_ms: (u64, u64),
    /// Pause after a failed mid-run handshake before resuming.
    pub refresh_failure_pause_ms: u64,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            concurrent_requests: defaults::CONCURRENT_REQUESTS,
            client_refresh_threshold: defaults::CLIENT_REFRESH_THRESHOLD,
            max_retries: defaults::MAX_RETRIES,
            handshake_url: API_ORIGIN.to_owned(),
            rate_limit_cooldown_ms: defaults::RATE_LIMIT_COOLDOWN_MS,
            refresh_failure_pause_ms: defaults::REFRESH_FAILURE_PAUSE_MS,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One endpoint that returned data, recorded with its originating URL.
#[derive(Debug, Clone)]
pub struct FetchSuccess {
    pub url: String,
    pub body: String,
}

/// One endpoint that permanently failed, with the terminal reason.
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub url: String,
    pub reason: String,
}

/// Outcome of a drained queue.
#[derive(Debug, Default)]
pub struct FetchReport {
    pub successes: Vec<FetchSuccess>,
    pub failures: Vec<FetchFailure>,
}

// ---------------------------------------------------------------------------
// Internal task and classification
// ---------------------------------------------------------------------------

/// A queued endpoint. Lives only inside the fetcher.
#[derive(Debug)]
struct EndpointTask {
    url: String,
    retries: u32,
}

/// What one response means for its task.
enum Disposition {
    Success(String),
    RateLimited,
    Retryable(String),
    Permanent(String),
}

fn classify(result: crate::error::Result<HttpReply>) -> Disposition {
    match result {
        Ok(reply) if (200..300).contains(&reply.status) => Disposition::Success(reply.body),
        Ok(reply) if reply.status == 429 => Disposition::RateLimited,
        Ok(reply) if reply.status >= 500 => {
            Disposition::Retryable(format!("HTTP {}", reply.status))
        }
        Ok(reply) => Disposition::Permanent(format!("HTTP {}", reply.status)),
        Err(e) => Disposition::Retryable(format!("transport error: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Drains a queue of endpoints through a borrowed transport under a fixed
/// concurrency ceiling, with 429-aware session rotation.
pub struct RateLimitFetcher<'a, T: Transport> {
    transport: &'a mut T,
    config: FetcherConfig,
    queue: VecDeque<EndpointTask>,
    /// Requests issued on the current session, reset on rotation.
    requests_since_refresh: usize,
    report: FetchReport,
}

impl<'a, T: Transport> RateLimitFetcher<'a, T> {
    /// Queue `endpoints` for fetching through `transport`.
    pub fn new(transport: &'a mut T, endpoints: Vec<String>, config: FetcherConfig) -> Self {
        let queue = endpoints
            .into_iter()
            .map(|url| EndpointTask { url, retries: 0 })
            .collect();
        Self {
            transport,
            config,
            queue,
            requests_since_refresh: 0,
            report: FetchReport::default(),
        }
    }

    /// Drive the queue to empty and return every success and permanent
    /// failure. Never panics and never returns early except when the
    /// *initial* handshake fails, in which case every queued endpoint is
    /// marked failed without spending its retry budget.
    pub async fn run(mut self) -> FetchReport {
        if self.queue.is_empty() {
            return self.report;
        }

        if let Err(reason) = self.handshake().await {
            tracing::error!(%reason, "initial handshake failed, aborting run");
            while let Some(task) = self.queue.pop_front() {
                self.report.failures.push(FetchFailure {
                    url: task.url,
                    reason: "initial handshake failed".into(),
                });
            }
            return self.report;
        }

        while !self.queue.is_empty() {
            let batch: Vec<EndpointTask> = {
                let n = self.config.concurrent_requests.max(1).min(self.queue.len());
                self.queue.drain(..n).collect()
            };

            let transport: &T = &*self.transport;
            let replies = join_all(batch.iter().map(|task| transport.get(&task.url))).await;
            self.requests_since_refresh += batch.len();

            let mut requeue: Vec<EndpointTask> = Vec::new();
            let mut saw_rate_limit = false;

            for (task, reply) in batch.into_iter().zip(replies) {
                match classify(reply) {
                    Disposition::Success(body) => {
                        self.report.successes.push(FetchSuccess {
                            url: task.url,
                            body,
                        });
                    }
                    Disposition::RateLimited => {
                        // A 429 indicts the session, not the request: the
                        // retry count is deliberately left untouched.
                        tracing::warn!(url = %task.url, "rate limited, requeueing");
                        saw_rate_limit = true;
                        requeue.push(task);
                    }
                    Disposition::Retryable(reason) => {
                        if task.retries < self.config.max_retries {
                            tracing::warn!(
                                url = %task.url,
                                %reason,
                                attempt = task.retries + 1,
                                "retryable failure, requeueing"
                            );
                            requeue.push(EndpointTask {
                                url: task.url,
                                retries: task.retries + 1,
                            });
                        } else {
                            tracing::error!(url = %task.url, %reason, "retry budget exhausted");
                            self.report.failures.push(FetchFailure {
                                url: task.url,
                                reason,
                            });
                        }
                    }
                    Disposition::Permanent(reason) => {
                        tracing::error!(url = %task.url, %reason, "permanent failure");
                        self.report.failures.push(FetchFailure {
                            url: task.url,
                            reason,
                        });
                    }
                }
            }

            let needs_refresh = saw_rate_limit
                || self.requests_since_refresh >= self.config.client_refresh_threshold;
            if needs_refresh {
                self.refresh(saw_rate_limit, requeue).await;
            } else {
                self.queue.extend(requeue);
            }
        }

        tracing::info!(
            successes = self.report.successes.len(),
            failures = self.report.failures.len(),
            "fetch queue drained"
        );
        self.report
    }

    /// One low-cost request validating connectivity and the session.
    /// Server errors (>=500) and transport failures count as handshake
    /// failures; any other answer means the backend is alive.
    async fn handshake(&self) -> std::result::Result<(), String> {
        match self.transport.get(&self.config.handshake_url).await {
            Ok(reply) if reply.status >= 500 => Err(format!("HTTP {}", reply.status)),
            Ok(_) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Rotate the session and re-handshake. On a rate-limit-triggered
    /// refresh, sleep a randomized cooldown first so upstream limits can
    /// recover. If the post-rotation handshake fails, the just-attempted
    /// batch goes back to the *front* of the queue and the run pauses
    /// before resuming, which bounds retry storms against a dead backend.
    async fn refresh(&mut self, rate_limited: bool, requeue: Vec<EndpointTask>) {
        if rate_limited {
            let (lo, hi) = self.config.rate_limit_cooldown_ms;
            let cooldown = rand::thread_rng().gen_range(lo..=hi.max(lo));
            tracing::info!(cooldown_ms = cooldown, "rate limit cooldown before rotation");
            tokio::time::sleep(Duration::from_millis(cooldown)).await;
        }

        if let Err(e) = self.transport.rotate() {
            tracing::error!(error = %e, "session rotation failed, keeping current session");
        }
        self.requests_since_refresh = 0;

        match self.handshake().await {
            Ok(()) => {
                tracing::debug!("session refreshed");
                self.queue.extend(requeue);
            }
            Err(reason) => {
                tracing::warn!(
                    %reason,
                    pause_ms = self.config.refresh_failure_pause_ms,
                    "post-refresh handshake failed, pausing"
                );
                for task in requeue.into_iter().rev() {
                    self.queue.push_front(task);
                }
                tokio::time::sleep(Duration::from_millis(self.config.refresh_failure_pause_ms))
                    .await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BackfillError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HANDSHAKE: &str = "https://mock.test";

    /// Scripted per-URL replies. URLs not in the script answer 200 with a
    /// fixed body; a scripted URL pops one entry per request and falls back
    /// to 200 once exhausted.
    #[derive(Default)]
    struct MockTransport {
        script: Mutex<HashMap<String, VecDeque<Scripted>>>,
        hits: Mutex<HashMap<String, usize>>,
        rotations: AtomicUsize,
        in_flight: AtomicUsize,
        peak_in_flight: AtomicUsize,
    }

    enum Scripted {
        Status(u16),
        NetError,
    }

    impl MockTransport {
        fn with_script(entries: Vec<(&str, Vec<Scripted>)>) -> Self {
            let script = entries
                .into_iter()
                .map(|(url, replies)| (url.to_owned(), replies.into_iter().collect()))
                .collect();
            Self {
                script: Mutex::new(script),
                ..Self::default()
            }
        }

        fn hits(&self, url: &str) -> usize {
            *self.hits.lock().unwrap().get(url).unwrap_or(&0)
        }
    }

    impl Transport for MockTransport {
        async fn get(&self, url: &str) -> crate::error::Result<HttpReply> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

            *self.hits.lock().unwrap().entry(url.to_owned()).or_insert(0) += 1;
            let scripted = self
                .script
                .lock()
                .unwrap()
                .get_mut(url)
                .and_then(|q| q.pop_front());

            tokio::time::sleep(Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match scripted {
                Some(Scripted::Status(status)) => Ok(HttpReply {
                    status,
                    body: String::new(),
                }),
                Some(Scripted::NetError) => {
                    Err(BackfillError::Handshake("connection reset".into()))
                }
                None => Ok(HttpReply {
                    status: 200,
                    body: "ok".into(),
                }),
            }
        }

        fn rotate(&mut self) -> crate::error::Result<()> {
            self.rotations.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config(concurrent: usize, max_retries: u32) -> FetcherConfig {
        FetcherConfig {
            concurrent_requests: concurrent,
            client_refresh_threshold: 10_000,
            max_retries,
            handshake_url: HANDSHAKE.to_owned(),
            rate_limit_cooldown_ms: (1, 2),
            refresh_failure_pause_ms: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn always_500_is_attempted_exactly_max_retries_plus_one_times() {
        let mut transport = MockTransport::with_script(vec![(
            "u1",
            (0..20).map(|_| Scripted::Status(500)).collect(),
        )]);
        let report =
            RateLimitFetcher::new(&mut transport, vec!["u1".into()], config(4, 3)).run().await;

        assert!(report.successes.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].url, "u1");
        assert_eq!(transport.hits("u1"), 4, "initial attempt + 3 retries");
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limits_do_not_consume_the_retry_budget() {
        // 429 eight times (max_retries + 5) and only then 200.
        let mut transport = MockTransport::with_script(vec![(
            "u1",
            (0..8)
                .map(|_| Scripted::Status(429))
                .chain([Scripted::Status(200)])
                .collect(),
        )]);
        let report =
            RateLimitFetcher::new(&mut transport, vec!["u1".into()], config(4, 3)).run().await;

        assert_eq!(report.successes.len(), 1);
        assert!(report.failures.is_empty());
        // Every rate-limited batch triggered a rotation.
        assert_eq!(transport.rotations.load(Ordering::SeqCst), 8);
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_requests_never_exceed_the_ceiling() {
        let urls: Vec<String> = (0..40).map(|i| format!("u{i}")).collect();
        let mut transport = MockTransport::default();
        let report = RateLimitFetcher::new(&mut transport, urls, config(5, 3)).run().await;

        assert_eq!(report.successes.len(), 40);
        assert!(
            transport.peak_in_flight.load(Ordering::SeqCst) <= 5,
            "peak in-flight {} exceeded the ceiling",
            transport.peak_in_flight.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn initial_handshake_failure_fails_every_endpoint() {
        let mut transport =
            MockTransport::with_script(vec![(HANDSHAKE, vec![Scripted::Status(503)])]);
        let report = RateLimitFetcher::new(
            &mut transport,
            vec!["u1".into(), "u2".into()],
            config(4, 3),
        )
        .run()
        .await;

        assert!(report.successes.is_empty());
        assert_eq!(report.failures.len(), 2);
        for failure in &report.failures {
            assert_eq!(failure.reason, "initial handshake failed");
        }
        // No data request was ever issued.
        assert_eq!(transport.hits("u1"), 0);
        assert_eq!(transport.hits("u2"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn client_errors_are_permanent_and_not_retried() {
        let mut transport =
            MockTransport::with_script(vec![("bad", vec![Scripted::Status(404)])]);
        let report = RateLimitFetcher::new(
            &mut transport,
            vec!["bad".into(), "good".into()],
            config(4, 3),
        )
        .run()
        .await;

        assert_eq!(report.successes.len(), 1);
        assert_eq!(report.successes[0].url, "good");
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].reason, "HTTP 404");
        assert_eq!(transport.hits("bad"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried_until_success() {
        let mut transport = MockTransport::with_script(vec![(
            "u1",
            vec![Scripted::NetError, Scripted::NetError, Scripted::Status(200)],
        )]);
        let report =
            RateLimitFetcher::new(&mut transport, vec!["u1".into()], config(4, 3)).run().await;

        assert_eq!(report.successes.len(), 1);
        assert_eq!(transport.hits("u1"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_threshold_triggers_proactive_rotation() {
        let urls: Vec<String> = (0..6).map(|i| format!("u{i}")).collect();
        let mut cfg = config(2, 3);
        cfg.client_refresh_threshold = 2;
        let mut transport = MockTransport::default();
        let report = RateLimitFetcher::new(&mut transport, urls, cfg).run().await;

        assert_eq!(report.successes.len(), 6);
        assert_eq!(transport.rotations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_refresh_handshake_does_not_lose_tasks() {
        // First data attempt is rate limited; the post-rotation handshake
        // fails once, then recovers. The task must still complete.
        let mut transport = MockTransport::with_script(vec![
            ("u1", vec![Scripted::Status(429), Scripted::Status(200)]),
            (HANDSHAKE, vec![Scripted::Status(200), Scripted::Status(503)]),
        ]);
        let report =
            RateLimitFetcher::new(&mut transport, vec!["u1".into()], config(4, 3)).run().await;

        assert_eq!(report.successes.len(), 1);
        assert!(report.failures.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_returns_immediately_without_handshake() {
        let mut transport = MockTransport::default();
        let report =
            RateLimitFetcher::new(&mut transport, Vec::new(), config(4, 3)).run().await;
        assert!(report.successes.is_empty());
        assert!(report.failures.is_empty());
        assert_eq!(transport.hits(HANDSHAKE), 0);
    }
}
