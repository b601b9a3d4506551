//! Transport Metrics
//!
//! Lock-free counters shared between a transport and its background tasks,
//! plus a small latency tracker for successful frame writes.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Point-in-time transport counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportMetrics {
    pub messages_sent: u64,
    pub messages_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub connect_attempts: u64,
    pub reconnects: u64,
    pub send_failures: u64,
    pub malformed_frames: u64,
    pub avg_send_latency_ns: u64,
    pub p99_send_latency_ns: u64,
}

/// Metrics tracker for transport operations. Clones share counters.
#[derive(Clone)]
pub struct MetricsTracker {
    messages_sent: Arc<AtomicU64>,
    messages_received: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    connect_attempts: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    send_failures: Arc<AtomicU64>,
    malformed_frames: Arc<AtomicU64>,

    latency_tracker: Arc<RwLock<LatencyTracker>>,
    last_activity: Arc<RwLock<Option<Instant>>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            messages_sent: Arc::new(AtomicU64::new(0)),
            messages_received: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            bytes_received: Arc::new(AtomicU64::new(0)),
            connect_attempts: Arc::new(AtomicU64::new(0)),
            reconnects: Arc::new(AtomicU64::new(0)),
            send_failures: Arc::new(AtomicU64::new(0)),
            malformed_frames: Arc::new(AtomicU64::new(0)),
            latency_tracker: Arc::new(RwLock::new(LatencyTracker::new())),
            last_activity: Arc::new(RwLock::new(None)),
        }
    }

    #[inline]
    pub fn record_send(&self, bytes: usize, latency_ns: u64) {
        self.messages_sent.fetch_add(1, Ordering::Release);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Release);

        if let Some(mut tracker) = self.latency_tracker.try_write() {
            tracker.record(latency_ns);
        }
        *self.last_activity.write() = Some(Instant::now());
    }

    #[inline]
    pub fn record_receive(&self, bytes: usize) {
        self.messages_received.fetch_add(1, Ordering::Release);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Release);
        *self.last_activity.write() = Some(Instant::now());
    }

    #[inline]
    pub fn record_connect_attempt(&self) {
        self.connect_attempts.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Release);
    }

    #[inline]
    pub fn record_malformed(&self) {
        self.malformed_frames.fetch_add(1, Ordering::Release);
    }

    pub fn last_activity(&self) -> Option<Instant> {
        *self.last_activity.read()
    }

    pub fn snapshot(&self) -> TransportMetrics {
        let latency = self.latency_tracker.read();

        TransportMetrics {
            messages_sent: self.messages_sent.load(Ordering::Acquire),
            messages_received: self.messages_received.load(Ordering::Acquire),
            bytes_sent: self.bytes_sent.load(Ordering::Acquire),
            bytes_received: self.bytes_received.load(Ordering::Acquire),
            connect_attempts: self.connect_attempts.load(Ordering::Acquire),
            reconnects: self.reconnects.load(Ordering::Acquire),
            send_failures: self.send_failures.load(Ordering::Acquire),
            malformed_frames: self.malformed_frames.load(Ordering::Acquire),
            avg_send_latency_ns: latency.average(),
            p99_send_latency_ns: latency.percentile(99),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Ring buffer of recent write latencies
struct LatencyTracker {
    samples: Vec<u64>,
    position: usize,
    total_samples: u64,
    sum: u64,
}

impl LatencyTracker {
    const SAMPLE_SIZE: usize = 1000;

    fn new() -> Self {
        Self {
            samples: Vec::with_capacity(Self::SAMPLE_SIZE),
            position: 0,
            total_samples: 0,
            sum: 0,
        }
    }

    fn record(&mut self, latency_ns: u64) {
        self.sum = self.sum.saturating_add(latency_ns);
        self.total_samples += 1;

        if self.samples.len() < Self::SAMPLE_SIZE {
            self.samples.push(latency_ns);
        } else {
            self.samples[self.position] = latency_ns;
            self.position = (self.position + 1) % Self::SAMPLE_SIZE;
        }
    }

    fn average(&self) -> u64 {
        if self.total_samples > 0 {
            self.sum / self.total_samples
        } else {
            0
        }
    }

    fn percentile(&self, p: usize) -> u64 {
        if self.samples.is_empty() {
            return 0;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();
        let index = ((sorted.len() - 1) * p) / 100;
        sorted[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let metrics = MetricsTracker::new();
        let clone = metrics.clone();

        clone.record_send(10, 1_000);
        clone.record_send(20, 3_000);
        metrics.record_receive(7);
        metrics.record_connect_attempt();
        metrics.record_reconnect();
        metrics.record_send_failure();
        metrics.record_malformed();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.messages_sent, 2);
        assert_eq!(snapshot.bytes_sent, 30);
        assert_eq!(snapshot.messages_received, 1);
        assert_eq!(snapshot.bytes_received, 7);
        assert_eq!(snapshot.connect_attempts, 1);
        assert_eq!(snapshot.reconnects, 1);
        assert_eq!(snapshot.send_failures, 1);
        assert_eq!(snapshot.malformed_frames, 1);
        assert_eq!(snapshot.avg_send_latency_ns, 2_000);
        assert_eq!(snapshot.p99_send_latency_ns, 1_000);
        assert!(metrics.last_activity().is_some());
    }

    #[test]
    fn test_latency_ring_wraps() {
        let mut tracker = LatencyTracker::new();
        for i in 0..(LatencyTracker::SAMPLE_SIZE as u64 + 10) {
            tracker.record(i);
        }
        assert_eq!(tracker.samples.len(), LatencyTracker::SAMPLE_SIZE);
        assert_eq!(tracker.samples[0], LatencyTracker::SAMPLE_SIZE as u64);
        assert_eq!(tracker.position, 10);
    }
}
