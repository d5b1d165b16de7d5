//! Calibration histogram abstraction.
//!
//! All calibration statistics live in binned profiles: per bin a sum, a sum of
//! squares, and an entry count, enough to report a mean and either error
//! semantic ([`ErrorMode::Mean`] or [`ErrorMode::Spread`]). A bin is
//! *validated* only once its entry count reaches a configurable threshold;
//! correction application must never read an unvalidated bin.
//!
//! Profiles from independent processing passes over disjoint event subsets
//! merge bin-wise additively, so distributed calibration passes combine into
//! exactly the single-pass result.
//!
//! Variants:
//! - [`Profile`] — the scalar base accumulator,
//! - [`ComponentsProfile`](components::ComponentsProfile) — per-harmonic X/Y pairs,
//! - [`ChannelProfile`](channelized::ChannelProfile) — event axes × channel axis,
//! - [`CorrelationProfile`](correlation::CorrelationProfile) / [`ThreeDetectorProfile`](correlation::ThreeDetectorProfile) — component products,
//! - [`SparseHist`] — not-validated QA counters.

pub mod channelized;
pub mod components;
pub mod correlation;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{QnError, Result};

/// Default validation threshold: a bin needs this many entries to be used.
pub const DEFAULT_MIN_ENTRIES: u32 = 2;

/// Which error a profile reports for a bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorMode {
    /// Standard deviation of the mean, sigma / sqrt(n).
    Mean,
    /// Spread of the distribution, sigma.
    Spread,
}

impl std::fmt::Display for ErrorMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mean => write!(f, "mean"),
            Self::Spread => write!(f, "spread"),
        }
    }
}

pub(crate) fn sigma(sum: f64, sum_sq: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let mean = sum / n as f64;
    (sum_sq / n as f64 - mean * mean).abs().sqrt()
}

pub(crate) fn scaled_error(sum: f64, sum_sq: f64, n: u32, mode: ErrorMode) -> f64 {
    let s = sigma(sum, sum_sq, n);
    match mode {
        ErrorMode::Mean if n > 0 => s / (n as f64).sqrt(),
        _ => s,
    }
}

/// Scalar binned profile: per bin sum, sum², entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    entries: Vec<u32>,
    min_entries: u32,
    error_mode: ErrorMode,
}

impl Profile {
    pub fn new(bins: usize, min_entries: u32, error_mode: ErrorMode) -> Self {
        Self {
            sum: vec![0.0; bins],
            sum_sq: vec![0.0; bins],
            entries: vec![0; bins],
            min_entries,
            error_mode,
        }
    }

    pub fn bins(&self) -> usize {
        self.sum.len()
    }

    pub fn fill(&mut self, bin: usize, value: f64) {
        self.sum[bin] += value;
        self.sum_sq[bin] += value * value;
        self.entries[bin] += 1;
    }

    pub fn entries(&self, bin: usize) -> u32 {
        self.entries[bin]
    }

    /// Whether the bin has collected enough statistics to be used.
    pub fn validated(&self, bin: usize) -> bool {
        self.entries[bin] >= self.min_entries
    }

    /// Bin mean. Zero for an empty bin; callers gate on [`Self::validated`].
    pub fn mean(&self, bin: usize) -> f64 {
        if self.entries[bin] == 0 {
            0.0
        } else {
            self.sum[bin] / self.entries[bin] as f64
        }
    }

    /// Bin error per the configured [`ErrorMode`].
    pub fn error(&self, bin: usize) -> f64 {
        scaled_error(self.sum[bin], self.sum_sq[bin], self.entries[bin], self.error_mode)
    }

    /// Bin spread (sigma), independent of the configured error mode.
    pub fn spread(&self, bin: usize) -> f64 {
        sigma(self.sum[bin], self.sum_sq[bin], self.entries[bin])
    }

    /// Bin-wise additive merge of a profile built over a disjoint event set.
    pub fn merge(&mut self, other: &Profile) -> Result<()> {
        if other.bins() != self.bins() {
            return Err(QnError::ShapeMismatch(format!(
                "profile bins {} vs {}",
                self.bins(),
                other.bins()
            )));
        }
        for i in 0..self.sum.len() {
            self.sum[i] += other.sum[i];
            self.sum_sq[i] += other.sum_sq[i];
            self.entries[i] += other.entries[i];
        }
        Ok(())
    }
}

/// Sparse counter over a (possibly large) bin space, used for the
/// not-validated QA tallies where almost every bin stays empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseHist {
    bins: usize,
    counts: HashMap<usize, u32>,
}

impl SparseHist {
    pub fn new(bins: usize) -> Self {
        Self {
            bins,
            counts: HashMap::new(),
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn fill(&mut self, bin: usize) {
        debug_assert!(bin < self.bins);
        *self.counts.entry(bin).or_insert(0) += 1;
    }

    pub fn count(&self, bin: usize) -> u32 {
        self.counts.get(&bin).copied().unwrap_or(0)
    }

    /// Total tallies across all bins.
    pub fn total(&self) -> u64 {
        self.counts.values().map(|&c| c as u64).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn merge(&mut self, other: &SparseHist) -> Result<()> {
        if other.bins != self.bins {
            return Err(QnError::ShapeMismatch(format!(
                "sparse bins {} vs {}",
                self.bins, other.bins
            )));
        }
        for (&bin, &c) in &other.counts {
            *self.counts.entry(bin).or_insert(0) += c;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_mean_and_validation() {
        let mut p = Profile::new(4, 2, ErrorMode::Mean);
        p.fill(1, 10.0);
        assert!(!p.validated(1), "one entry is below the default threshold");
        p.fill(1, 14.0);
        assert!(p.validated(1));
        assert_eq!(p.mean(1), 12.0);
        assert_eq!(p.mean(0), 0.0);
    }

    #[test]
    fn test_profile_error_modes() {
        let mut mean = Profile::new(1, 2, ErrorMode::Mean);
        let mut spread = Profile::new(1, 2, ErrorMode::Spread);
        for v in [8.0, 12.0] {
            mean.fill(0, v);
            spread.fill(0, v);
        }
        // sigma = 2, n = 2
        assert!((spread.error(0) - 2.0).abs() < 1e-12);
        assert!((mean.error(0) - 2.0 / 2f64.sqrt()).abs() < 1e-12);
        // spread() ignores the mode
        assert!((mean.spread(0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_profile_merge_additive() {
        let mut full = Profile::new(2, 2, ErrorMode::Mean);
        let mut a = Profile::new(2, 2, ErrorMode::Mean);
        let mut b = Profile::new(2, 2, ErrorMode::Mean);
        for (i, v) in [(0, 1.0), (0, 3.0), (1, 5.0)] {
            full.fill(i, v);
        }
        a.fill(0, 1.0);
        b.fill(0, 3.0);
        b.fill(1, 5.0);
        a.merge(&b).unwrap();
        assert_eq!(a, full);
    }

    #[test]
    fn test_profile_merge_shape_mismatch() {
        let mut a = Profile::new(2, 2, ErrorMode::Mean);
        let b = Profile::new(3, 2, ErrorMode::Mean);
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_sparse_hist_counts() {
        let mut h = SparseHist::new(100);
        assert!(h.is_empty());
        h.fill(42);
        h.fill(42);
        h.fill(7);
        assert_eq!(h.count(42), 2);
        assert_eq!(h.count(0), 0);
        assert_eq!(h.total(), 3);
    }

    #[test]
    fn test_sparse_hist_merge() {
        let mut a = SparseHist::new(10);
        let mut b = SparseHist::new(10);
        a.fill(3);
        b.fill(3);
        b.fill(5);
        a.merge(&b).unwrap();
        assert_eq!(a.count(3), 2);
        assert_eq!(a.count(5), 1);
    }

    #[test]
    fn test_profile_round_trip_json() {
        let mut p = Profile::new(2, 2, ErrorMode::Spread);
        p.fill(0, 2.5);
        let s = serde_json::to_string(&p).unwrap();
        let back: Profile = serde_json::from_str(&s).unwrap();
        assert_eq!(back, p);
    }
}
