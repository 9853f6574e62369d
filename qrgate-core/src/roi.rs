//! Region-of-interest prediction from recent detection positions.
//!
//! When the QR code sits still (a phone on a stand, a login window that
//! does not move) the last few detections land in the same place and the
//! next capture can be narrowed to that spot. As soon as detections
//! scatter or go stale the predictor returns `None` and the caller falls
//! back to the user's region.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::capture::Region;

/// Detections remembered.
pub const HISTORY_SIZE: usize = 5;
/// Recent detections that must agree before predicting.
pub const CONFIDENCE_THRESHOLD: usize = 3;
/// Relative tolerance on every coordinate.
pub const TOLERANCE: f64 = 0.15;
/// Margin added on each side of the predicted rectangle.
pub const MARGIN: f64 = 0.1;
/// Newest detection must be younger than this.
pub const MAX_AGE: Duration = Duration::from_secs(3);

/// Snapshot for logs and the CLI.
#[derive(Debug, Clone, PartialEq)]
pub struct RoiStats {
    pub history: usize,
    pub has_prediction: bool,
    /// Hit rate of predictions, `0.0..=1.0`.
    pub accuracy: f64,
    pub total_predictions: u64,
    pub successful_predictions: u64,
}

/// Rolling history of successful detection regions.
#[derive(Debug)]
pub struct RoiPredictor {
    history: VecDeque<(Region, Instant)>,
    capacity: usize,
    threshold: usize,
    total: u64,
    hits: u64,
}

impl RoiPredictor {
    pub fn new() -> Self {
        Self::with_params(HISTORY_SIZE, CONFIDENCE_THRESHOLD)
    }

    /// `capacity` regions kept, `threshold` of them must agree.
    pub fn with_params(capacity: usize, threshold: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity,
            threshold: threshold.clamp(1, capacity),
            total: 0,
            hits: 0,
        }
    }

    /// Record a region that produced a successful decode.
    pub fn record(&mut self, region: Region) {
        self.record_at(region, Instant::now());
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, region: Region, when: Instant) {
        if region.is_empty() {
            return;
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back((region, when));
    }

    /// Predicted capture rectangle, if recent detections agree.
    pub fn predict(&self) -> Option<Region> {
        self.predict_at(Instant::now())
    }

    /// Prediction as seen at `now`.
    pub fn predict_at(&self, now: Instant) -> Option<Region> {
        let (_, newest) = self.history.back()?;
        if now.saturating_duration_since(*newest) >= MAX_AGE {
            return None;
        }
        if self.history.len() < self.threshold {
            return None;
        }

        let recent: Vec<Region> = self
            .history
            .iter()
            .rev()
            .take(self.threshold)
            .map(|(r, _)| *r)
            .collect();
        let n = recent.len() as f64;
        let avg_x = recent.iter().map(|r| r.x as f64).sum::<f64>() / n;
        let avg_y = recent.iter().map(|r| r.y as f64).sum::<f64>() / n;
        let avg_w = recent.iter().map(|r| r.width as f64).sum::<f64>() / n;
        let avg_h = recent.iter().map(|r| r.height as f64).sum::<f64>() / n;

        let tol_w = avg_w * TOLERANCE;
        let tol_h = avg_h * TOLERANCE;
        let agree = recent.iter().all(|r| {
            (r.x as f64 - avg_x).abs() < tol_w
                && (r.y as f64 - avg_y).abs() < tol_h
                && (r.width as f64 - avg_w).abs() < tol_w
                && (r.height as f64 - avg_h).abs() < tol_h
        });
        if !agree {
            return None;
        }

        let average = Region::new(
            avg_x as i32,
            avg_y as i32,
            avg_w.round() as u32,
            avg_h.round() as u32,
        );
        Some(average.expanded(MARGIN))
    }

    /// Whether a capture of the predicted region found the code. A miss
    /// drops the history so the next capture covers the whole region.
    pub fn verify(&mut self, found: bool) {
        self.total += 1;
        if found {
            self.hits += 1;
        } else {
            self.history.clear();
        }
    }

    /// Fraction of predictions that found the code.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.hits as f64 / self.total as f64
        }
    }

    /// Forget the history, e.g. after the user moves the scan window.
    /// Accuracy counters survive.
    pub fn reset(&mut self) {
        self.history.clear();
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn stats(&self) -> RoiStats {
        RoiStats {
            history: self.history.len(),
            has_prediction: self.predict().is_some(),
            accuracy: self.accuracy(),
            total_predictions: self.total,
            successful_predictions: self.hits,
        }
    }
}

impl Default for RoiPredictor {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_similar_regions_predict_expanded_average() {
        let mut roi = RoiPredictor::new();
        let t0 = Instant::now();
        roi.record_at(Region::new(100, 200, 100, 50), t0);
        roi.record_at(Region::new(102, 201, 98, 50), t0);
        roi.record_at(Region::new(98, 199, 102, 50), t0);

        let predicted = roi.predict_at(t0 + Duration::from_millis(500)).expect("prediction");
        assert_eq!(predicted, Region::new(90, 195, 120, 60));
    }

    #[test]
    fn two_regions_are_not_enough() {
        let mut roi = RoiPredictor::new();
        let t0 = Instant::now();
        roi.record_at(Region::new(100, 200, 100, 50), t0);
        roi.record_at(Region::new(100, 200, 100, 50), t0);
        assert_eq!(roi.predict_at(t0), None);
    }

    #[test]
    fn stale_history_is_ignored() {
        let mut roi = RoiPredictor::new();
        let t0 = Instant::now();
        for _ in 0..3 {
            roi.record_at(Region::new(0, 0, 200, 200), t0);
        }
        assert!(roi.predict_at(t0 + Duration::from_millis(2900)).is_some());
        assert_eq!(roi.predict_at(t0 + Duration::from_secs(3)), None);
    }

    #[test]
    fn scattered_regions_do_not_predict() {
        let mut roi = RoiPredictor::new();
        let t0 = Instant::now();
        roi.record_at(Region::new(0, 0, 100, 100), t0);
        roi.record_at(Region::new(400, 0, 100, 100), t0);
        roi.record_at(Region::new(0, 300, 100, 100), t0);
        assert_eq!(roi.predict_at(t0), None);
    }

    #[test]
    fn only_the_newest_three_count() {
        let mut roi = RoiPredictor::new();
        let t0 = Instant::now();
        roi.record_at(Region::new(900, 900, 50, 50), t0);
        roi.record_at(Region::new(0, 0, 10, 10), t0);
        for _ in 0..3 {
            roi.record_at(Region::new(10, 10, 100, 100), t0);
        }
        assert_eq!(roi.len(), HISTORY_SIZE);
        assert_eq!(roi.predict_at(t0), Some(Region::new(0, 0, 120, 120)));

        roi.record_at(Region::new(10, 10, 100, 100), t0);
        assert_eq!(roi.len(), HISTORY_SIZE);
    }

    #[test]
    fn missed_prediction_is_dropped() {
        let mut roi = RoiPredictor::new();
        let t0 = Instant::now();
        for _ in 0..3 {
            roi.record_at(Region::new(100, 100, 100, 100), t0);
        }
        assert!(roi.predict_at(t0).is_some());

        roi.verify(true);
        assert!(roi.predict_at(t0).is_some());
        roi.verify(false);
        assert_eq!(roi.predict_at(t0), None);
        assert!(roi.is_empty());
        assert_eq!(roi.stats().total_predictions, 2);
        assert_eq!(roi.stats().successful_predictions, 1);
    }

    #[test]
    fn accuracy_and_reset() {
        let mut roi = RoiPredictor::new();
        roi.verify(true);
        roi.verify(false);
        roi.verify(true);
        roi.verify(true);
        assert!((roi.accuracy() - 0.75).abs() < 1e-9);

        roi.record(Region::new(1, 1, 1, 1));
        roi.reset();
        assert!(roi.is_empty());
        assert_eq!(roi.stats().total_predictions, 4);
    }
}
