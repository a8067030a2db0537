//! Run-level counters
//!
//! One [`SwarmStats`] instance is shared by every session and the
//! orchestrator. Counters are plain relaxed atomics; bind latencies are
//! collected raw and aggregated once at the end of the run.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::session::{SessionOutcome, SessionReport};

#[derive(Debug, Default)]
pub struct SwarmStats {
    sessions_started: AtomicU64,
    sessions_bound: AtomicU64,
    sessions_released: AtomicU64,
    sessions_failed: AtomicU64,
    restarts: AtomicU64,
    frames_sent: AtomicU64,
    frames_received: AtomicU64,
    active: AtomicU64,
    peak_active: AtomicU64,
    bind_latencies: Mutex<Vec<Duration>>,
}

impl SwarmStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
        let now_active = self.active.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_active.fetch_max(now_active, Ordering::Relaxed);
    }

    /// Fold a finished session into the counters
    ///
    /// A released session counts as bound too: `released <= bound` always
    /// holds in the summary.
    pub fn session_finished(&self, report: &SessionReport) {
        self.active.fetch_sub(1, Ordering::Relaxed);
        match report.outcome {
            SessionOutcome::Bound => {
                self.sessions_bound.fetch_add(1, Ordering::Relaxed);
            }
            SessionOutcome::Released => {
                self.sessions_bound.fetch_add(1, Ordering::Relaxed);
                self.sessions_released.fetch_add(1, Ordering::Relaxed);
            }
            SessionOutcome::Failed(_) => {
                self.sessions_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        if report.restarts > 0 {
            self.restarts.fetch_add(report.restarts as u64, Ordering::Relaxed);
        }
        if let Some(latency) = report.bind_latency {
            self.bind_latencies.lock().push(latency);
        }
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Count leases the shutdown sweep released on behalf of sessions
    pub fn add_swept_releases(&self, count: u64) {
        self.sessions_released.fetch_add(count, Ordering::Relaxed);
    }

    pub fn active(&self) -> u64 {
        self.active.load(Ordering::Relaxed)
    }

    pub fn peak_active(&self) -> u64 {
        self.peak_active.load(Ordering::Relaxed)
    }

    pub fn bound(&self) -> u64 {
        self.sessions_bound.load(Ordering::Relaxed)
    }

    pub fn frames_sent_total(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    /// Snapshot the counters into an immutable end-of-run summary
    pub fn summary(&self, requested: usize, elapsed: Duration) -> RunSummary {
        let mut latencies = self.bind_latencies.lock().clone();
        latencies.sort_unstable();
        RunSummary {
            requested: requested as u64,
            started: self.sessions_started.load(Ordering::Relaxed),
            bound: self.sessions_bound.load(Ordering::Relaxed),
            released: self.sessions_released.load(Ordering::Relaxed),
            failed: self.sessions_failed.load(Ordering::Relaxed),
            restarts: self.restarts.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            peak_active: self.peak_active.load(Ordering::Relaxed),
            elapsed,
            bind_latency_mean: mean(&latencies),
            bind_latency_p50: percentile(&latencies, 50.0),
            bind_latency_p95: percentile(&latencies, 95.0),
        }
    }
}

/// Immutable view of one finished run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub requested: u64,
    pub started: u64,
    pub bound: u64,
    pub released: u64,
    pub failed: u64,
    pub restarts: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub peak_active: u64,
    pub elapsed: Duration,
    pub bind_latency_mean: Option<Duration>,
    pub bind_latency_p50: Option<Duration>,
    pub bind_latency_p95: Option<Duration>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "sessions: {} requested, {} started, {} bound, {} released, {} failed",
            self.requested, self.started, self.bound, self.released, self.failed
        )?;
        writeln!(
            f,
            "traffic:  {} frames sent, {} received, {} exchange restarts, peak {} active",
            self.frames_sent, self.frames_received, self.restarts, self.peak_active
        )?;
        match (self.bind_latency_mean, self.bind_latency_p50, self.bind_latency_p95) {
            (Some(mean), Some(p50), Some(p95)) => writeln!(
                f,
                "latency:  bind mean {mean:.1?}, p50 {p50:.1?}, p95 {p95:.1?}"
            )?,
            _ => writeln!(f, "latency:  no sessions reached bound")?,
        }
        write!(f, "elapsed:  {:.1?}", self.elapsed)
    }
}

fn mean(latencies: &[Duration]) -> Option<Duration> {
    if latencies.is_empty() {
        return None;
    }
    let total: Duration = latencies.iter().sum();
    Some(total / latencies.len() as u32)
}

/// Nearest-rank percentile over an already-sorted slice
fn percentile(sorted: &[Duration], pct: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let rank = (pct / 100.0 * (sorted.len() - 1) as f64).round() as usize;
    sorted.get(rank).copied()
}
