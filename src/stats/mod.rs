use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::time::Instant;

// (time, settled) samples kept for the throughput estimate.
pub const SAMPLE_WINDOW: usize = 50;
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);
const MIN_RATE_SPAN: Duration = Duration::from_millis(500);

// A hit increments `success` only. A miss or an exhausted retry loop increments
// `completed`, the latter also bumping `errors`. So `completed + success` is the
// number of settled combinations. Only the sample window needs a lock.
#[derive(Debug)]
pub struct RunStats {
    total: u64,
    started: Instant,
    completed: AtomicU64,
    success: AtomicU64,
    errors: AtomicU64,
    retried: AtomicU64,
    baseline: OnceLock<usize>,
    samples: Mutex<VecDeque<(Instant, u64)>>,
}

impl RunStats {
    pub fn new(total: u64) -> Self {
        Self::starting_at(total, Instant::now())
    }

    pub fn starting_at(total: u64, started: Instant) -> Self {
        Self {
            total,
            started,
            completed: AtomicU64::new(0),
            success: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            baseline: OnceLock::new(),
            samples: Mutex::new(VecDeque::with_capacity(SAMPLE_WINDOW)),
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn retried(&self) -> u64 {
        self.retried.load(Ordering::Relaxed)
    }

    pub fn settled(&self) -> u64 {
        self.completed() + self.success()
    }

    pub fn record_success(&self) {
        self.success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores the first observed response length. Returns `true` only for the call that set it.
    pub fn observe_baseline(&self, length: usize) -> bool {
        let mut won = false;
        self.baseline.get_or_init(|| {
            won = true;
            length
        });
        won
    }

    pub fn baseline(&self) -> Option<usize> {
        self.baseline.get().copied()
    }

    pub fn sample(&self) {
        self.sample_at(Instant::now());
    }

    pub fn sample_at(&self, now: Instant) {
        let settled = self.settled();
        let mut samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((last, _)) = samples.back() {
            if now.saturating_duration_since(*last) < MIN_SAMPLE_INTERVAL {
                return;
            }
        }
        if samples.len() == SAMPLE_WINDOW {
            samples.pop_front();
        }
        samples.push_back((now, settled));
    }

    /// Requests per second: windowed when the window spans long enough, else the run average.
    pub fn speed_at(&self, now: Instant) -> f64 {
        let settled = self.settled();
        let oldest = {
            let samples = self.samples.lock().unwrap_or_else(|p| p.into_inner());
            samples.front().copied()
        };
        if let Some((at, count)) = oldest {
            let span = now.saturating_duration_since(at);
            if span >= MIN_RATE_SPAN {
                return settled.saturating_sub(count) as f64 / span.as_secs_f64();
            }
        }
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < MIN_RATE_SPAN {
            return 0.0;
        }
        settled as f64 / elapsed.as_secs_f64()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(Instant::now())
    }

    pub fn snapshot_at(&self, now: Instant) -> StatsSnapshot {
        let settled = self.settled();
        let remaining = self.total.saturating_sub(settled);
        let speed = self.speed_at(now);
        let eta = if remaining == 0 {
            Some(Duration::ZERO)
        } else if speed > 0.0 {
            Duration::try_from_secs_f64(remaining as f64 / speed).ok()
        } else {
            None
        };
        let progress = if self.total == 0 {
            100.0
        } else {
            (settled as f64 * 100.0 / self.total as f64).min(100.0)
        };
        StatsSnapshot {
            total: self.total,
            completed: self.completed(),
            settled,
            success: self.success(),
            errors: self.errors(),
            retried: self.retried(),
            remaining,
            progress,
            speed,
            eta,
            elapsed: now.saturating_duration_since(self.started),
            baseline: self.baseline(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub completed: u64,
    pub settled: u64,
    pub success: u64,
    pub errors: u64,
    pub retried: u64,
    pub remaining: u64,
    pub progress: f64,
    pub speed: f64,
    #[serde(rename = "eta_secs", serialize_with = "optional_secs")]
    pub eta: Option<Duration>,
    #[serde(rename = "elapsed_secs", serialize_with = "secs")]
    pub elapsed: Duration,
    pub baseline: Option<usize>,
}

impl StatsSnapshot {
    pub fn average_speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs <= 0.0 {
            0.0
        } else {
            self.settled as f64 / secs
        }
    }
}

fn secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

fn optional_secs<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(d) => serializer.serialize_some(&d.as_secs_f64()),
        None => serializer.serialize_none(),
    }
}
