//! Per-scan stage timing.
//!
//! Keeps the last [`HISTORY`] completed scans (detection through login
//! outcome) and summarises where the time went.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use crate::capture::CaptureMethod;
use crate::decode::CandidateKind;

/// Scans kept in the rolling window.
pub const HISTORY: usize = 100;

// ── ScanRecord ───────────────────────────────────────────────────

/// Wall time of each pipeline stage for one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageTimings {
    pub capture: Duration,
    pub decode: Duration,
    pub validate: Duration,
    pub confirm: Duration,
}

impl StageTimings {
    pub fn total(&self) -> Duration {
        self.capture + self.decode + self.validate + self.confirm
    }
}

impl fmt::Display for StageTimings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "capture {:?} | decode {:?} | validate {:?} | confirm {:?} | total {:?}",
            self.capture,
            self.decode,
            self.validate,
            self.confirm,
            self.total()
        )
    }
}

/// One completed scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRecord {
    pub at: Instant,
    pub timings: StageTimings,
    pub method: CaptureMethod,
    pub candidate: CandidateKind,
    pub success: bool,
}

// ── PerfMonitor ──────────────────────────────────────────────────

/// Rolling window of scan records.
pub struct PerfMonitor {
    records: VecDeque<ScanRecord>,
    capacity: usize,
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn record(&mut self, record: ScanRecord) {
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn last(&self) -> Option<&ScanRecord> {
        self.records.back()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn summary(&self) -> PerfSummary {
        let scans = self.records.len();
        if scans == 0 {
            return PerfSummary::default();
        }
        let successes = self.records.iter().filter(|r| r.success).count();
        let total: Duration = self.records.iter().map(|r| r.timings.total()).sum();

        let mut by_method = BTreeMap::new();
        let mut by_candidate = BTreeMap::new();
        for r in &self.records {
            *by_method.entry(r.method.name()).or_insert(0) += 1;
            *by_candidate.entry(r.candidate.label()).or_insert(0) += 1;
        }

        PerfSummary {
            scans,
            success_rate: successes as f64 / scans as f64,
            avg_total: total / scans as u32,
            by_method,
            by_candidate,
        }
    }
}

impl Default for PerfMonitor {
    fn default() -> Self {
        Self::new()
    }
}

// ── PerfSummary ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerfSummary {
    pub scans: usize,
    /// 0.0 ..= 1.0
    pub success_rate: f64,
    pub avg_total: Duration,
    /// Scans served by each capture backend.
    pub by_method: BTreeMap<&'static str, usize>,
    /// Scans won by each candidate kind.
    pub by_candidate: BTreeMap<&'static str, usize>,
}

impl fmt::Display for PerfSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scans, {:.0}% success, avg {:?}",
            self.scans,
            self.success_rate * 100.0,
            self.avg_total
        )?;
        for (method, n) in &self.by_method {
            write!(f, ", {method}: {n}")?;
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn record(ms: u64, method: CaptureMethod, success: bool) -> ScanRecord {
        ScanRecord {
            at: Instant::now(),
            timings: StageTimings {
                capture: Duration::from_millis(ms),
                decode: Duration::from_millis(ms),
                validate: Duration::ZERO,
                confirm: Duration::ZERO,
            },
            method,
            candidate: CandidateKind::Analysis,
            success,
        }
    }

    #[test]
    fn empty_summary() {
        let perf = PerfMonitor::new();
        assert_eq!(perf.summary(), PerfSummary::default());
        assert!(perf.last().is_none());
    }

    #[test]
    fn summary_averages_and_counts() {
        let mut perf = PerfMonitor::new();
        perf.record(record(10, CaptureMethod::Dxgi, true));
        perf.record(record(30, CaptureMethod::Dxgi, false));
        perf.record(record(20, CaptureMethod::PixelGrab, true));

        let summary = perf.summary();
        assert_eq!(summary.scans, 3);
        assert!((summary.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(summary.avg_total, Duration::from_millis(40));
        assert_eq!(summary.by_method.get("DXGI"), Some(&2));
        assert_eq!(summary.by_method.get("xcap"), Some(&1));
        assert_eq!(summary.by_candidate.get("analysis"), Some(&3));
    }

    #[test]
    fn window_is_bounded() {
        let mut perf = PerfMonitor::with_capacity(2);
        for ms in [1, 2, 3] {
            perf.record(record(ms, CaptureMethod::BitBlt, true));
        }
        assert_eq!(perf.len(), 2);
        assert_eq!(perf.last().map(|r| r.timings.capture), Some(Duration::from_millis(3)));
    }

    #[test]
    fn timings_display() {
        let t = StageTimings {
            capture: Duration::from_millis(5),
            ..Default::default()
        };
        assert!(t.to_string().contains("total 5ms"));
    }
}
