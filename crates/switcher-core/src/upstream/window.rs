//! Rolling health window.
//!
//! Keeps the most recent [`WINDOW_SIZE`] probe/request outcomes of one instance, newest first.
//! Health and latency estimates are derived on demand from the retained records only.

use std::collections::VecDeque;

use crate::{config::DetectionConfig, stats};

/// Number of records retained and considered.
pub const WINDOW_SIZE: usize = 5;

/// Outcome of a single probe or tagged request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthRecord {
    pub working: bool,
    pub latency_ms: u64,
}

/// Fixed-capacity, most-recent-first record list.
#[derive(Debug, Clone, Default)]
pub struct RecordWindow {
    records: VecDeque<HealthRecord>,
}

impl RecordWindow {
    #[must_use]
    pub fn new() -> Self {
        Self { records: VecDeque::with_capacity(WINDOW_SIZE + 1) }
    }

    /// Adds a record at the front, dropping the oldest once the window is full.
    pub fn push(&mut self, record: HealthRecord) {
        self.records.push_front(record);
        self.records.truncate(WINDOW_SIZE);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HealthRecord> {
        self.records.iter()
    }

    /// Success ratio over the window, by mean or median. `NaN` when empty.
    #[must_use]
    pub fn working_ratio(&self, use_median: bool) -> f64 {
        let values: Vec<f64> =
            self.records.iter().map(|r| if r.working { 1.0 } else { 0.0 }).collect();
        if use_median {
            stats::median(&values)
        } else {
            stats::mean(&values)
        }
    }

    /// Whether the success ratio reaches the acceptable rate. Always `false` when empty.
    #[must_use]
    pub fn is_working(&self, detection: &DetectionConfig) -> bool {
        self.working_ratio(detection.use_median_working) >= detection.acceptable_working_rate
    }

    /// Rounded mean or median latency, `None` when the window is empty.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn average_latency(&self, use_median: bool) -> Option<u64> {
        if self.records.is_empty() {
            return None;
        }
        let values: Vec<f64> = self.records.iter().map(|r| r.latency_ms as f64).collect();
        let average = if use_median { stats::median(&values) } else { stats::mean(&values) };
        Some(average.round() as u64)
    }
}
