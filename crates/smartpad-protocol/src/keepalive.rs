//! Keepalive configuration and round-trip statistics.
//!
//! Data channels between browsers go quiet and die if nothing is sent for a
//! while, so both ends exchange pings continuously. The pongs double as a
//! latency probe and as the heartbeat for the deadman timeout.

use std::collections::VecDeque;
use std::time::Duration;

/// Time between two pings.
pub const DEFAULT_KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(100);

/// Silence after which a connection is considered dead.
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(5000);

/// Number of round-trip samples kept for the average.
pub const DEFAULT_STORED_PINGS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveConfig {
    pub interval: Duration,
    pub connection_timeout: Duration,
    pub stored_pings: usize,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_KEEP_ALIVE_INTERVAL,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            stored_pings: DEFAULT_STORED_PINGS,
        }
    }
}

/// Upper bound on pings tracked while awaiting their pong.
const MAX_OUTSTANDING_PINGS: usize = 256;

impl KeepAliveConfig {
    /// How many unanswered pings to remember: one connection timeout's worth
    /// of intervals, so a pong slower than the interval still finds its ping.
    pub fn max_outstanding_pings(&self) -> usize {
        let per_timeout = self.connection_timeout.as_nanos() / self.interval.as_nanos().max(1);
        usize::try_from(per_timeout)
            .unwrap_or(MAX_OUTSTANDING_PINGS)
            .clamp(1, MAX_OUTSTANDING_PINGS)
    }
}

/// Bounded ring of the most recent round-trip times.
#[derive(Debug, Clone)]
pub struct PingSamples {
    samples: VecDeque<Duration>,
    capacity: usize,
    average: Option<Duration>,
}

impl PingSamples {
    /// A ring holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            average: None,
        }
    }

    /// Add a sample, dropping the oldest ones past capacity.
    pub fn record(&mut self, rtt: Duration) {
        self.samples.push_back(rtt);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        let total: Duration = self.samples.iter().sum();
        let count = u32::try_from(self.samples.len()).unwrap_or(u32::MAX);
        self.average = Some(total / count);
    }

    /// Most recent sample.
    pub fn last(&self) -> Option<Duration> {
        self.samples.back().copied()
    }

    /// Arithmetic mean of the stored samples.
    pub fn average(&self) -> Option<Duration> {
        self.average
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Latency snapshot of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStats {
    pub last_ping: Option<Duration>,
    pub average_ping: Option<Duration>,
    pub samples: usize,
}

impl From<&PingSamples> for LinkStats {
    fn from(pings: &PingSamples) -> Self {
        Self {
            last_ping: pings.last(),
            average_ping: pings.average(),
            samples: pings.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn outstanding_pings_cover_one_timeout() {
        assert_eq!(KeepAliveConfig::default().max_outstanding_pings(), 50);

        let tight = KeepAliveConfig {
            interval: ms(500),
            connection_timeout: ms(100),
            ..KeepAliveConfig::default()
        };
        assert_eq!(tight.max_outstanding_pings(), 1);

        let busy = KeepAliveConfig {
            interval: Duration::ZERO,
            ..KeepAliveConfig::default()
        };
        assert_eq!(busy.max_outstanding_pings(), 256);
    }

    #[test]
    fn empty_ring_has_no_stats() {
        let pings = PingSamples::new(3);
        assert!(pings.is_empty());
        assert_eq!(pings.last(), None);
        assert_eq!(pings.average(), None);
    }

    #[test]
    fn average_over_stored_samples() {
        let mut pings = PingSamples::new(3);
        pings.record(ms(10));
        pings.record(ms(20));
        assert_eq!(pings.average(), Some(ms(15)));
        assert_eq!(pings.last(), Some(ms(20)));
    }

    #[test]
    fn oldest_sample_dropped_on_overflow() {
        let mut pings = PingSamples::new(3);
        for rtt in [100, 10, 20, 30] {
            pings.record(ms(rtt));
        }
        assert_eq!(pings.len(), 3);
        assert_eq!(pings.average(), Some(ms(20)));
    }

    #[test]
    fn zero_capacity_keeps_one_sample() {
        let mut pings = PingSamples::new(0);
        pings.record(ms(5));
        pings.record(ms(7));
        assert_eq!(pings.capacity(), 1);
        assert_eq!(pings.average(), Some(ms(7)));
    }

    #[test]
    fn defaults() {
        let config = KeepAliveConfig::default();
        assert_eq!(config.interval, ms(100));
        assert_eq!(config.connection_timeout, ms(5000));
        assert_eq!(config.stored_pings, 20);
    }
}
