//! Bounded per-user prediction history
//!
//! Time-ascending, most-recent-N samples. Append is the only mutator and
//! evicts the single oldest sample once capacity is exceeded.

use crate::domain::types::HistorySample;
use serde::Serialize;
use std::collections::VecDeque;

/// Default number of samples retained per user
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Rejected append: sample is older than the newest stored sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfOrder {
    pub previous: u64,
    pub attempted: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct HistoryTracker {
    samples: VecDeque<HistorySample>,
    #[serde(skip)]
    capacity: usize,
}

impl HistoryTracker {
    pub fn new(capacity: usize) -> Self {
        Self { samples: VecDeque::with_capacity(capacity + 1), capacity }
    }

    /// Build a tracker from existing samples, oldest first
    ///
    /// Samples beyond capacity are evicted exactly as repeated appends would.
    pub fn from_samples(
        capacity: usize,
        samples: impl IntoIterator<Item = HistorySample>,
    ) -> Result<Self, OutOfOrder> {
        let mut tracker = Self::new(capacity);
        for sample in samples {
            tracker.append(sample)?;
        }
        Ok(tracker)
    }

    /// Check that a sample may be appended without mutating anything
    pub fn check_order(&self, timestamp: u64) -> Result<(), OutOfOrder> {
        match self.samples.back() {
            Some(last) if timestamp < last.timestamp => {
                Err(OutOfOrder { previous: last.timestamp, attempted: timestamp })
            }
            _ => Ok(()),
        }
    }

    /// Append the newest sample, evicting the oldest when over capacity
    pub fn append(&mut self, sample: HistorySample) -> Result<(), OutOfOrder> {
        self.check_order(sample.timestamp)?;
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        Ok(())
    }

    /// Most recent sample
    pub fn latest(&self) -> Option<&HistorySample> {
        self.samples.back()
    }

    /// Sample immediately before the most recent one
    pub fn previous(&self) -> Option<&HistorySample> {
        self.samples.len().checked_sub(2).and_then(|i| self.samples.get(i))
    }

    /// Oldest to newest
    pub fn iter(&self) -> impl Iterator<Item = &HistorySample> {
        self.samples.iter()
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

impl Default for HistoryTracker {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Gate, ScoreVector};

    fn sample(timestamp: u64, confidence: u8) -> HistorySample {
        let mut scores = ScoreVector::default();
        scores.push(Gate::new("A"), confidence);
        HistorySample::from_scores(timestamp, scores).unwrap()
    }

    #[test]
    fn test_empty_history() {
        let history = HistoryTracker::default();
        assert!(history.latest().is_none());
        assert!(history.previous().is_none());
        assert_eq!(history.capacity(), 10);
    }

    #[test]
    fn test_latest_and_previous() {
        let mut history = HistoryTracker::default();
        history.append(sample(0, 10)).unwrap();
        assert_eq!(history.latest().unwrap().timestamp, 0);
        assert!(history.previous().is_none());

        history.append(sample(5000, 20)).unwrap();
        assert_eq!(history.latest().unwrap().timestamp, 5000);
        assert_eq!(history.previous().unwrap().timestamp, 0);
    }

    #[test]
    fn test_fifo_eviction() {
        let mut history = HistoryTracker::default();
        for i in 0..25u64 {
            history.append(sample(i * 1000, 50)).unwrap();
            assert!(history.len() <= 10);
        }

        assert_eq!(history.len(), 10);
        let timestamps: Vec<u64> = history.iter().map(|s| s.timestamp).collect();
        assert_eq!(timestamps, (15..25).map(|i| i * 1000).collect::<Vec<_>>());
    }

    #[test]
    fn test_equal_timestamp_accepted() {
        let mut history = HistoryTracker::default();
        history.append(sample(1000, 10)).unwrap();
        assert!(history.append(sample(1000, 20)).is_ok());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_out_of_order_rejected_without_mutation() {
        let mut history = HistoryTracker::default();
        history.append(sample(5000, 10)).unwrap();

        let err = history.append(sample(4000, 99)).unwrap_err();
        assert_eq!(err, OutOfOrder { previous: 5000, attempted: 4000 });
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().confidence, 10);
    }

    #[test]
    fn test_from_samples_applies_capacity() {
        let history =
            HistoryTracker::from_samples(3, (0..5u64).map(|i| sample(i * 10, 1))).unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().next().unwrap().timestamp, 20);
    }

    #[test]
    fn test_serializes_as_list() {
        let mut history = HistoryTracker::default();
        history.append(sample(1, 77)).unwrap();
        let value = serde_json::to_value(&history).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["predictedGate"], "A");
        assert_eq!(value[0]["confidence"], 77);
    }
}
