use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Where a request is in its trip through the worker.
///
/// ```text
/// received -> parsed | parse_failed -> inferred | inference_failed
///          -> replied | reply_failed -> acknowledged
/// received -> rejected                       (missing metadata)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Parsed,
    ParseFailed,
    Inferred,
    InferenceFailed,
    Replied,
    ReplyFailed,
    Acknowledged,
    Rejected,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Parsed => "parsed",
            Stage::ParseFailed => "parse_failed",
            Stage::Inferred => "inferred",
            Stage::InferenceFailed => "inference_failed",
            Stage::Replied => "replied",
            Stage::ReplyFailed => "reply_failed",
            Stage::Acknowledged => "acknowledged",
            Stage::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Running counters for one worker. Shared between the consumer task and
/// whoever wants to look at it.
#[derive(Debug, Default)]
pub struct WorkerStats {
    received: AtomicU64,
    parse_failed: AtomicU64,
    inference_failed: AtomicU64,
    replied: AtomicU64,
    reply_failed: AtomicU64,
    acknowledged: AtomicU64,
    rejected: AtomicU64,
    total_latency_us: AtomicU64,
    max_latency_us: AtomicU64,
}

/// Point-in-time copy of [`WorkerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub parse_failed: u64,
    pub inference_failed: u64,
    pub replied: u64,
    pub reply_failed: u64,
    pub acknowledged: u64,
    pub rejected: u64,
    pub total_latency: Duration,
    pub max_latency: Duration,
}

impl StatsSnapshot {
    /// Mean time from receipt to acknowledgment.
    pub fn mean_latency(&self) -> Option<Duration> {
        let count = u32::try_from(self.acknowledged).ok().filter(|c| *c > 0)?;
        Some(self.total_latency / count)
    }
}

impl WorkerStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a stage transition. `Parsed` and `Inferred` are not counted on
    /// their own; they are implied by the absence of the matching failure.
    pub fn record(&self, stage: Stage) {
        let counter = match stage {
            Stage::Received => &self.received,
            Stage::ParseFailed => &self.parse_failed,
            Stage::InferenceFailed => &self.inference_failed,
            Stage::Replied => &self.replied,
            Stage::ReplyFailed => &self.reply_failed,
            Stage::Acknowledged => &self.acknowledged,
            Stage::Rejected => &self.rejected,
            Stage::Parsed | Stage::Inferred => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records the receipt-to-ack latency of one request.
    pub fn record_latency(&self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.total_latency_us.fetch_add(micros, Ordering::Relaxed);
        self.max_latency_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            parse_failed: self.parse_failed.load(Ordering::Relaxed),
            inference_failed: self.inference_failed.load(Ordering::Relaxed),
            replied: self.replied.load(Ordering::Relaxed),
            reply_failed: self.reply_failed.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            total_latency: Duration::from_micros(self.total_latency_us.load(Ordering::Relaxed)),
            max_latency: Duration::from_micros(self.max_latency_us.load(Ordering::Relaxed)),
        }
    }
}
