//! Round-trip latency samples for the snapshot poll.

use serde::Serialize;

/// Rolling window of the most recent round trips (circular buffer)
#[derive(Clone, Debug, Serialize)]
pub struct LatencyStats {
    /// Total samples ever recorded
    pub sample_count: u64,
    recent_samples: Vec<u64>,
    sample_index: usize,
    capacity: usize,
}

impl LatencyStats {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            sample_count: 0,
            recent_samples: Vec::with_capacity(capacity),
            sample_index: 0,
            capacity,
        }
    }

    pub fn record(&mut self, latency_ms: u64) {
        self.sample_count += 1;

        if self.recent_samples.len() < self.capacity {
            self.recent_samples.push(latency_ms);
        } else {
            self.recent_samples[self.sample_index] = latency_ms;
            self.sample_index = (self.sample_index + 1) % self.capacity;
        }
    }

    pub fn len(&self) -> usize {
        self.recent_samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent_samples.is_empty()
    }

    pub fn min(&self) -> Option<u64> {
        self.recent_samples.iter().min().copied()
    }

    pub fn max(&self) -> Option<u64> {
        self.recent_samples.iter().max().copied()
    }

    pub fn average(&self) -> u64 {
        if self.recent_samples.is_empty() {
            0
        } else {
            self.recent_samples.iter().sum::<u64>() / self.recent_samples.len() as u64
        }
    }

    pub fn summary(&self) -> LatencySummary {
        LatencySummary {
            samples: self.len(),
            min_ms: self.min().unwrap_or(0),
            max_ms: self.max().unwrap_or(0),
            average_ms: self.average(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub samples: usize,
    pub min_ms: u64,
    pub max_ms: u64,
    pub average_ms: u64,
}
