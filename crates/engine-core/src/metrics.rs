use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    rows_extracted: AtomicU64,
    rows_failed: AtomicU64,
    chunks_committed: AtomicU64,
    chunks_failed: AtomicU64,
    retry_count: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Run-wide counters shared by every worker of a job.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rows_extracted: u64,
    pub rows_failed: u64,
    pub chunks_committed: u64,
    pub chunks_failed: u64,
    pub retry_count: u64,
    pub in_flight: usize,
    pub peak_in_flight: usize,
}

/// Counts one running chunk until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    inner: Arc<InnerMetrics>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn chunk_started(&self) -> InFlightGuard {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            inner: self.inner.clone(),
        }
    }

    pub fn increment_rows(&self, extracted: u64, failed: u64) {
        self.inner
            .rows_extracted
            .fetch_add(extracted, Ordering::Relaxed);
        self.inner.rows_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn increment_committed(&self) {
        self.inner.chunks_committed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_failed(&self) {
        self.inner.chunks_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retry_count.fetch_add(count, Ordering::Relaxed);
    }

    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rows_extracted: self.inner.rows_extracted.load(Ordering::Relaxed),
            rows_failed: self.inner.rows_failed.load(Ordering::Relaxed),
            chunks_committed: self.inner.chunks_committed.load(Ordering::Relaxed),
            chunks_failed: self.inner.chunks_failed.load(Ordering::Relaxed),
            retry_count: self.inner.retry_count.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.inner.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_overlapping_chunks() {
        let metrics = Metrics::new();
        let a = metrics.chunk_started();
        let b = metrics.chunk_started();
        drop(a);
        let _c = metrics.chunk_started();
        drop(b);
        let snap = metrics.snapshot();
        assert_eq!(snap.peak_in_flight, 2);
        assert_eq!(snap.in_flight, 1);
    }
}
