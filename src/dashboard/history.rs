// History Log - In-memory time series of the peer count
// Sampled once per heartbeat tick; the default capacity holds about an
// hour at the 5 s cadence

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Default number of samples retained
pub const HISTORY_CAPACITY: usize = 720;

/// One sample: unix seconds and the count observed then
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub t: u64,
    pub count: usize,
}

/// Bounded ring of count samples
#[derive(Debug)]
pub struct HistoryLog {
    points: Mutex<VecDeque<HistoryPoint>>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            points: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest past capacity
    pub fn record(&self, count: usize) {
        let point = HistoryPoint {
            t: Utc::now().timestamp().max(0) as u64,
            count,
        };
        if let Ok(mut points) = self.points.lock() {
            if points.len() == self.capacity {
                points.pop_front();
            }
            points.push_back(point);
        }
    }

    /// Oldest-first snapshot of the retained samples
    pub fn points(&self) -> Vec<HistoryPoint> {
        self.points
            .lock()
            .map(|p| p.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let log = HistoryLog::new(10);
        log.record(1);
        log.record(2);
        let points = log.points();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].count, 1);
        assert_eq!(points[1].count, 2);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = HistoryLog::new(3);
        for count in 0..5 {
            log.record(count);
        }
        let counts: Vec<usize> = log.points().iter().map(|p| p.count).collect();
        assert_eq!(counts, vec![2, 3, 4]);
    }
}
