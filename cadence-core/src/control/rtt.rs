//! Round-trip latency tracking.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rolling window of the most recent RTT samples (ms) and their mean.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    samples: VecDeque<f64>,
    capacity: usize,
    mean_ms: f64,
}

impl RttEstimator {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity + 1),
            capacity,
            mean_ms: 0.0,
        }
    }

    /// Append a sample, trim to capacity, and return the new mean.
    pub fn push(&mut self, rtt_ms: f64) -> f64 {
        self.samples.push_back(rtt_ms);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.mean_ms = self.samples.iter().sum::<f64>() / self.samples.len() as f64;
        self.mean_ms
    }

    /// Mean of the window; 0 before the first sample.
    pub fn mean_ms(&self) -> f64 {
        self.mean_ms
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Turns keep-alive ping/pong instants into RTT samples.
///
/// Only the latest outstanding ping is tracked; a pong with no ping in flight
/// yields nothing.
#[derive(Debug, Default)]
pub struct PingTracker {
    last_ping: Option<Instant>,
}

impl PingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_sent(&mut self, at: Instant) {
        self.last_ping = Some(at);
    }

    /// RTT in milliseconds for the outstanding ping, if any.
    pub fn pong_received(&mut self, at: Instant) -> Option<f64> {
        let sent = self.last_ping.take()?;
        let rtt: Duration = at.saturating_duration_since(sent);
        Some(rtt.as_secs_f64() * 1000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn window_keeps_last_five() {
        let mut rtt = RttEstimator::new(5);
        for sample in [100.0, 200.0, 300.0, 400.0, 500.0, 600.0] {
            rtt.push(sample);
        }
        assert_eq!(rtt.len(), 5);
        assert_relative_eq!(rtt.mean_ms(), 400.0);
    }

    #[test]
    fn mean_of_partial_window() {
        let mut rtt = RttEstimator::new(5);
        assert!(rtt.is_empty());
        assert_eq!(rtt.mean_ms(), 0.0);
        assert_relative_eq!(rtt.push(40.0), 40.0);
        assert_relative_eq!(rtt.push(80.0), 60.0);
    }

    #[test]
    fn ping_pong_measures_elapsed() {
        let mut tracker = PingTracker::new();
        let t0 = Instant::now();
        assert!(tracker.pong_received(t0).is_none());

        tracker.ping_sent(t0);
        let rtt = tracker
            .pong_received(t0 + Duration::from_millis(85))
            .expect("outstanding ping");
        assert_relative_eq!(rtt, 85.0, epsilon = 1e-6);
        assert!(tracker.pong_received(t0 + Duration::from_millis(90)).is_none());
    }
}
