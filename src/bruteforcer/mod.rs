use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, trace};

use crate::detector::{FlagExtractor, MatchReason, ResponseView, SuccessCriteria, Verdict};
use crate::generator::Combination;
use crate::request::{build_request, RequestMethod, RequestTemplate};
use crate::stats::{RunStats, StatsSnapshot};

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub url: String,
    pub method: RequestMethod,
    pub template: RequestTemplate,
    pub concurrency: usize,
    pub batch_size: usize,
    /// Extra sends after the first one fails; zero disables retrying.
    pub retries: u32,
    pub auto_stop: bool,
    pub rate: Option<NonZeroU32>,
    pub excerpt_len: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct SuccessRecord {
    pub combination: Combination,
    pub response_length: usize,
    pub status: u16,
    pub reason: MatchReason,
    pub flags: BTreeSet<String>,
    pub excerpt: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCause {
    Timeout,
    Transport,
}

impl fmt::Display for ErrorCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCause::Timeout => f.write_str("timeout"),
            ErrorCause::Transport => f.write_str("transport"),
        }
    }
}

#[derive(Debug)]
pub enum AttemptResponse {
    Ok(ResponseView),
    TimedOut,
    Transport(String),
}

impl AttemptResponse {
    fn from_error(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AttemptResponse::TimedOut
        } else {
            AttemptResponse::Transport(err.to_string())
        }
    }
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Success(SuccessRecord),
    Failure,
    Error { cause: ErrorCause, message: String },
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Exhausted,
    AutoStop,
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exhausted => f.write_str("payload space exhausted"),
            StopReason::AutoStop => f.write_str("stopped after first success"),
            StopReason::Interrupted => f.write_str("interrupted"),
        }
    }
}

pub enum EngineEvent<'a> {
    Batch(&'a StatsSnapshot),
    Hit(&'a SuccessRecord),
}

#[derive(Clone, Debug)]
pub struct EngineReport {
    pub successes: Vec<SuccessRecord>,
    pub stop_reason: StopReason,
    pub stats: StatsSnapshot,
}

pub struct Engine {
    client: reqwest::Client,
    config: EngineConfig,
    criteria: SuccessCriteria,
    flags: FlagExtractor,
    stats: Arc<RunStats>,
    stop: AtomicBool,
    limiter: Option<DirectLimiter>,
}

impl Engine {
    pub fn new(
        client: reqwest::Client,
        config: EngineConfig,
        criteria: SuccessCriteria,
        flags: FlagExtractor,
        stats: Arc<RunStats>,
    ) -> Self {
        // burst of one keeps requests evenly spaced at the configured rate
        let limiter = config
            .rate
            .map(|rate| RateLimiter::direct(Quota::per_second(rate).allow_burst(NonZeroU32::MIN)));
        Self {
            client,
            config,
            criteria,
            flags,
            stats,
            stop: AtomicBool::new(false),
            limiter,
        }
    }

    pub fn stats(&self) -> Arc<RunStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn run<I, P>(self, combinations: I, on_event: P) -> EngineReport
    where
        I: IntoIterator<Item = Combination>,
        P: FnMut(EngineEvent<'_>),
    {
        self.run_until(combinations, std::future::pending::<()>(), on_event)
            .await
    }

    /// Runs until the combinations are exhausted, auto-stop fires, or `shutdown` resolves.
    /// In-flight attempts always finish; the connection pool is dropped on every path.
    pub async fn run_until<I, F, P>(
        self,
        combinations: I,
        shutdown: F,
        mut on_event: P,
    ) -> EngineReport
    where
        I: IntoIterator<Item = Combination>,
        F: Future<Output = ()>,
        P: FnMut(EngineEvent<'_>),
    {
        let semaphore = Semaphore::new(self.config.concurrency.max(1));
        let batch_size = self.config.batch_size.max(1);
        let mut combinations = combinations.into_iter();
        let mut successes = Vec::new();
        let mut interrupted = false;
        let mut batch_no = 0usize;
        tokio::pin!(shutdown);

        info!(
            url = %self.config.url,
            method = %self.config.method,
            total = self.stats.total(),
            concurrency = self.config.concurrency,
            batch_size,
            "starting run"
        );

        while !self.stop.load(Ordering::SeqCst) {
            let batch: Vec<Combination> = combinations.by_ref().take(batch_size).collect();
            if batch.is_empty() {
                break;
            }
            batch_no += 1;
            debug!(batch = batch_no, size = batch.len(), "dispatching batch");

            let mut pending: FuturesUnordered<_> = batch
                .into_iter()
                .map(|combination| self.attempt(&semaphore, combination))
                .collect();

            loop {
                tokio::select! {
                    next = pending.next() => match next {
                        Some(AttemptOutcome::Success(record)) => {
                            on_event(EngineEvent::Hit(&record));
                            successes.push(record);
                        }
                        Some(AttemptOutcome::Error { cause, message }) => {
                            trace!(%cause, %message, "combination counted as error");
                        }
                        Some(_) => {}
                        None => break,
                    },
                    _ = &mut shutdown, if !interrupted => {
                        info!("interrupt received, waiting for in-flight attempts");
                        interrupted = true;
                        self.stop.store(true, Ordering::SeqCst);
                    }
                }
            }

            self.stats.sample();
            let snapshot = self.stats.snapshot();
            debug!(
                batch = batch_no,
                settled = snapshot.settled,
                errors = snapshot.errors,
                "batch finished"
            );
            on_event(EngineEvent::Batch(&snapshot));
        }

        let stop_reason = if interrupted {
            StopReason::Interrupted
        } else if self.stop.load(Ordering::SeqCst) {
            StopReason::AutoStop
        } else {
            StopReason::Exhausted
        };

        let Engine { client, stats, .. } = self;
        drop(client);
        debug!("connection pool released");

        let snapshot = stats.snapshot();
        info!(
            reason = %stop_reason,
            completed = snapshot.completed,
            success = snapshot.success,
            errors = snapshot.errors,
            retried = snapshot.retried,
            "run finished"
        );
        EngineReport {
            successes,
            stop_reason,
            stats: snapshot,
        }
    }

    async fn attempt(&self, semaphore: &Semaphore, combination: Combination) -> AttemptOutcome {
        let _permit = match semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return AttemptOutcome::Skipped,
        };
        if self.stop.load(Ordering::SeqCst) {
            return AttemptOutcome::Skipped;
        }
        if let Some(limiter) = self.limiter.as_ref() {
            limiter.until_ready().await;
            if self.stop.load(Ordering::SeqCst) {
                return AttemptOutcome::Skipped;
            }
        }

        let data = self.config.template.build(&combination);
        let mut retries_left = self.config.retries;
        let response = loop {
            let (cause, message) = match self.send(&data).await {
                AttemptResponse::Ok(view) => break view,
                AttemptResponse::TimedOut => (ErrorCause::Timeout, "request timed out".to_string()),
                AttemptResponse::Transport(message) => (ErrorCause::Transport, message),
            };
            if retries_left > 0 {
                retries_left -= 1;
                self.stats.record_retry();
                debug!(%cause, %message, retries_left, "retrying attempt");
                continue;
            }
            self.stats.record_error();
            debug!(%cause, %message, "attempt failed");
            return AttemptOutcome::Error { cause, message };
        };

        if self.stats.observe_baseline(response.length) {
            debug!(length = response.length, "baseline length recorded");
        }
        let verdict = self.criteria.classify(
            &response.text,
            response.length,
            response.status,
            self.stats.baseline(),
        );

        match verdict {
            Verdict::Success(reason) => {
                if self.config.auto_stop {
                    self.stop.store(true, Ordering::SeqCst);
                }
                self.stats.record_success();
                let record = SuccessRecord {
                    flags: self.flags.extract(&response.text),
                    excerpt: response.excerpt(self.config.excerpt_len),
                    response_length: response.length,
                    status: response.status,
                    reason,
                    combination,
                };
                info!(
                    status = record.status,
                    length = record.response_length,
                    reason = %record.reason,
                    flags = record.flags.len(),
                    "success"
                );
                AttemptOutcome::Success(record)
            }
            Verdict::Failure => {
                self.stats.record_failure();
                trace!(status = response.status, length = response.length, "failure");
                AttemptOutcome::Failure
            }
        }
    }

    async fn send(&self, data: &[(String, String)]) -> AttemptResponse {
        let request = build_request(&self.client, self.config.method, &self.config.url, data);
        match request.send().await {
            Ok(response) => match ResponseView::capture(response).await {
                Ok(view) => AttemptResponse::Ok(view),
                Err(err) => AttemptResponse::from_error(err),
            },
            Err(err) => AttemptResponse::from_error(err),
        }
    }
}
