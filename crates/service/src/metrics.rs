use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub struct Metrics {
    // Counters
    total_requests: AtomicUsize,
    successful_requests: AtomicUsize,
    failed_requests: AtomicUsize,

    // Timing (in microseconds)
    total_ingest_time_us: AtomicU64,
    total_chat_time_us: AtomicU64,

    // Counts
    documents_ingested: AtomicUsize,
    total_chunks_indexed: AtomicUsize,
    chat_turns: AtomicUsize,
    bookings_complete: AtomicUsize,
    bookings_incomplete: AtomicUsize,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            total_requests: AtomicUsize::new(0),
            successful_requests: AtomicUsize::new(0),
            failed_requests: AtomicUsize::new(0),
            total_ingest_time_us: AtomicU64::new(0),
            total_chat_time_us: AtomicU64::new(0),
            documents_ingested: AtomicUsize::new(0),
            total_chunks_indexed: AtomicUsize::new(0),
            chat_turns: AtomicUsize::new(0),
            bookings_complete: AtomicUsize::new(0),
            bookings_incomplete: AtomicUsize::new(0),
        })
    }

    pub fn record_request(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_ingest(&self, duration: Duration, chunks: usize) {
        self.total_ingest_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.documents_ingested.fetch_add(1, Ordering::Relaxed);
        self.total_chunks_indexed.fetch_add(chunks, Ordering::Relaxed);
    }

    pub fn record_chat(&self, duration: Duration) {
        self.total_chat_time_us.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.chat_turns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_booking(&self, complete: bool) {
        if complete {
            self.bookings_complete.fetch_add(1, Ordering::Relaxed);
        } else {
            self.bookings_incomplete.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Degradation counts are owned by the fallback facades and passed in
    pub fn snapshot(&self, vector_degradations: usize, memory_degradations: usize) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            avg_ingest_time_ms: avg_time_ms(&self.total_ingest_time_us, &self.documents_ingested),
            avg_chat_time_ms: avg_time_ms(&self.total_chat_time_us, &self.chat_turns),
            documents_ingested: self.documents_ingested.load(Ordering::Relaxed),
            total_chunks_indexed: self.total_chunks_indexed.load(Ordering::Relaxed),
            chat_turns: self.chat_turns.load(Ordering::Relaxed),
            bookings_complete: self.bookings_complete.load(Ordering::Relaxed),
            bookings_incomplete: self.bookings_incomplete.load(Ordering::Relaxed),
            vector_degradations,
            memory_degradations,
        }
    }
}

fn avg_time_ms(total_us: &AtomicU64, count: &AtomicUsize) -> f64 {
    let total = total_us.load(Ordering::Relaxed) as f64;
    let cnt = count.load(Ordering::Relaxed) as f64;
    if cnt > 0.0 {
        total / cnt / 1000.0 // Convert to ms
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub avg_ingest_time_ms: f64,
    pub avg_chat_time_ms: f64,
    pub documents_ingested: usize,
    pub total_chunks_indexed: usize,
    pub chat_turns: usize,
    pub bookings_complete: usize,
    pub bookings_incomplete: usize,
    pub vector_degradations: usize,
    pub memory_degradations: usize,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_and_averages() {
        let metrics = Metrics::new();
        metrics.record_request(true);
        metrics.record_request(false);
        metrics.record_ingest(Duration::from_millis(4), 3);
        metrics.record_ingest(Duration::from_millis(2), 1);
        metrics.record_booking(true);
        metrics.record_booking(false);
        metrics.record_booking(false);

        let snapshot = metrics.snapshot(1, 0);
        assert_eq!(snapshot.total_requests, 2);
        assert_eq!(snapshot.failed_requests, 1);
        assert_eq!(snapshot.total_chunks_indexed, 4);
        assert!((snapshot.avg_ingest_time_ms - 3.0).abs() < 1e-9);
        assert_eq!(snapshot.avg_chat_time_ms, 0.0);
        assert_eq!(snapshot.bookings_complete, 1);
        assert_eq!(snapshot.bookings_incomplete, 2);
        assert_eq!(snapshot.vector_degradations, 1);
    }
}
