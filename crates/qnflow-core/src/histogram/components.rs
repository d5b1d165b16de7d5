//! Per-harmonic X/Y components profile.
//!
//! Backs recentering and the double-harmonic twist method: for every active
//! harmonic the profile keeps independent X and Y accumulators over the
//! event-class bins, with one shared entry count per bin. A fill covers all
//! active harmonics of one vector at once, so the entry count advances exactly
//! once per event and validation is a per-bin property, not a per-harmonic
//! one.

use serde::{Deserialize, Serialize};

use crate::error::{QnError, Result};
use crate::histogram::{ErrorMode, scaled_error, sigma};
use crate::qvector::{QVector, harmonics_of};

/// X/Y accumulator per active harmonic over the event-class bins.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentsProfile {
    harmonics: u32,
    bins: usize,
    // dense layout: [harmonic slot][event bin]
    x_sum: Vec<f64>,
    x_sum_sq: Vec<f64>,
    y_sum: Vec<f64>,
    y_sum_sq: Vec<f64>,
    entries: Vec<u32>,
    min_entries: u32,
    error_mode: ErrorMode,
}

impl ComponentsProfile {
    pub fn new(harmonics: u32, bins: usize, min_entries: u32, error_mode: ErrorMode) -> Self {
        let slots = harmonics.count_ones() as usize * bins;
        Self {
            harmonics,
            bins,
            x_sum: vec![0.0; slots],
            x_sum_sq: vec![0.0; slots],
            y_sum: vec![0.0; slots],
            y_sum_sq: vec![0.0; slots],
            entries: vec![0; bins],
            min_entries,
            error_mode,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn harmonic_mask(&self) -> u32 {
        self.harmonics
    }

    fn slot(&self, h: usize, bin: usize) -> usize {
        debug_assert!(self.harmonics & (1 << (h - 1)) != 0);
        let rank = (self.harmonics & ((1 << (h - 1)) - 1)).count_ones() as usize;
        rank * self.bins + bin
    }

    /// Fill X and Y for every active harmonic from one vector.
    pub fn fill(&mut self, bin: usize, q: &QVector) {
        for h in harmonics_of(self.harmonics) {
            let s = self.slot(h, bin);
            let x = q.x(h);
            let y = q.y(h);
            self.x_sum[s] += x;
            self.x_sum_sq[s] += x * x;
            self.y_sum[s] += y;
            self.y_sum_sq[s] += y * y;
        }
        self.entries[bin] += 1;
    }

    pub fn entries(&self, bin: usize) -> u32 {
        self.entries[bin]
    }

    pub fn validated(&self, bin: usize) -> bool {
        self.entries[bin] >= self.min_entries
    }

    pub fn x_mean(&self, h: usize, bin: usize) -> f64 {
        let n = self.entries[bin];
        if n == 0 { 0.0 } else { self.x_sum[self.slot(h, bin)] / n as f64 }
    }

    pub fn y_mean(&self, h: usize, bin: usize) -> f64 {
        let n = self.entries[bin];
        if n == 0 { 0.0 } else { self.y_sum[self.slot(h, bin)] / n as f64 }
    }

    pub fn x_error(&self, h: usize, bin: usize) -> f64 {
        let s = self.slot(h, bin);
        scaled_error(self.x_sum[s], self.x_sum_sq[s], self.entries[bin], self.error_mode)
    }

    pub fn y_error(&self, h: usize, bin: usize) -> f64 {
        let s = self.slot(h, bin);
        scaled_error(self.y_sum[s], self.y_sum_sq[s], self.entries[bin], self.error_mode)
    }

    /// Component spread (sigma), used as the width-equalization divisor.
    pub fn x_sigma(&self, h: usize, bin: usize) -> f64 {
        let s = self.slot(h, bin);
        sigma(self.x_sum[s], self.x_sum_sq[s], self.entries[bin])
    }

    pub fn y_sigma(&self, h: usize, bin: usize) -> f64 {
        let s = self.slot(h, bin);
        sigma(self.y_sum[s], self.y_sum_sq[s], self.entries[bin])
    }

    pub fn merge(&mut self, other: &ComponentsProfile) -> Result<()> {
        if other.harmonics != self.harmonics || other.bins != self.bins {
            return Err(QnError::ShapeMismatch(format!(
                "components profile {:#b}/{} vs {:#b}/{}",
                self.harmonics, self.bins, other.harmonics, other.bins
            )));
        }
        for i in 0..self.x_sum.len() {
            self.x_sum[i] += other.x_sum[i];
            self.x_sum_sq[i] += other.x_sum_sq[i];
            self.y_sum[i] += other.y_sum[i];
            self.y_sum_sq[i] += other.y_sum_sq[i];
        }
        for i in 0..self.entries.len() {
            self.entries[i] += other.entries[i];
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qvector::{Normalization, QVectorBuilder, StepTag, harmonic_mask};

    fn vector(h_mask: u32, fills: &[(f64, f64)]) -> QVector {
        let mut b = QVectorBuilder::new(h_mask, 1);
        for &(phi, w) in fills {
            b.add(phi, w);
        }
        b.build(Normalization::None, StepTag::Plain)
    }

    #[test]
    fn test_fill_advances_entries_once_per_vector() {
        let mask = harmonic_mask(&[1, 2]);
        let mut p = ComponentsProfile::new(mask, 3, 2, ErrorMode::Mean);
        let q = vector(mask, &[(0.3, 1.0)]);
        p.fill(1, &q);
        assert_eq!(p.entries(1), 1, "two harmonics, one entry");
        assert_eq!(p.entries(0), 0);
    }

    #[test]
    fn test_means_per_harmonic() {
        let mask = harmonic_mask(&[2]);
        let mut p = ComponentsProfile::new(mask, 1, 2, ErrorMode::Mean);
        let mut q = QVector::new(mask, Normalization::None, StepTag::Plain);
        q.set(2, 4.0, -2.0);
        p.fill(0, &q);
        q.set(2, 6.0, 2.0);
        p.fill(0, &q);
        assert!(p.validated(0));
        assert_eq!(p.x_mean(2, 0), 5.0);
        assert_eq!(p.y_mean(2, 0), 0.0);
        assert!((p.x_sigma(2, 0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_sparse_harmonic_mask_layout() {
        // mask with non-contiguous harmonics must not cross slots
        let mask = harmonic_mask(&[1, 4]);
        let mut p = ComponentsProfile::new(mask, 2, 2, ErrorMode::Mean);
        let mut q = QVector::new(mask, Normalization::None, StepTag::Plain);
        q.set(1, 1.0, 0.0);
        q.set(4, 9.0, 0.0);
        p.fill(1, &q);
        p.fill(1, &q);
        assert_eq!(p.x_mean(1, 1), 1.0);
        assert_eq!(p.x_mean(4, 1), 9.0);
        assert_eq!(p.x_mean(4, 0), 0.0);
    }

    #[test]
    fn test_merge_matches_combined_fill() {
        let mask = harmonic_mask(&[1]);
        let q1 = vector(mask, &[(0.1, 1.0)]);
        let q2 = vector(mask, &[(1.3, 2.0)]);
        let mut full = ComponentsProfile::new(mask, 1, 2, ErrorMode::Mean);
        full.fill(0, &q1);
        full.fill(0, &q2);
        let mut a = ComponentsProfile::new(mask, 1, 2, ErrorMode::Mean);
        let mut b = ComponentsProfile::new(mask, 1, 2, ErrorMode::Mean);
        a.fill(0, &q1);
        b.fill(0, &q2);
        a.merge(&b).unwrap();
        assert_eq!(a, full);
    }

    #[test]
    fn test_merge_rejects_different_masks() {
        let mut a = ComponentsProfile::new(harmonic_mask(&[1]), 1, 2, ErrorMode::Mean);
        let b = ComponentsProfile::new(harmonic_mask(&[2]), 1, 2, ErrorMode::Mean);
        assert!(a.merge(&b).is_err());
    }
}
