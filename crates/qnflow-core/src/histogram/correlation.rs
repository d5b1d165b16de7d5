//! Correlation-component profiles.
//!
//! [`CorrelationProfile`] keeps the four component products XX, XY, YX, YY of
//! two detectors at a single harmonic over the event-class bins — the
//! alignment correction's calibration shape. [`ThreeDetectorProfile`] extends
//! this to the three detector pairs AB, BC, AC per active harmonic, backing
//! the correlation method of twist-and-rescale. Entry counts are shared per
//! bin: one fill covers every component (and, for the three-detector variant,
//! every pair and harmonic) at once.

use serde::{Deserialize, Serialize};

use crate::error::{QnError, Result};
use crate::histogram::{ErrorMode, scaled_error};
use crate::qvector::{QVector, harmonics_of};

/// Component product selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    XX,
    XY,
    YX,
    YY,
}

impl Component {
    const ALL: [Component; 4] = [Self::XX, Self::XY, Self::YX, Self::YY];

    fn index(self) -> usize {
        match self {
            Self::XX => 0,
            Self::XY => 1,
            Self::YX => 2,
            Self::YY => 3,
        }
    }

    fn product(self, a: &QVector, ha: usize, b: &QVector, hb: usize) -> f64 {
        match self {
            Self::XX => a.x(ha) * b.x(hb),
            Self::XY => a.x(ha) * b.y(hb),
            Self::YX => a.y(ha) * b.x(hb),
            Self::YY => a.y(ha) * b.y(hb),
        }
    }
}

/// Detector pair selector for [`ThreeDetectorProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pair {
    AB,
    BC,
    AC,
}

impl Pair {
    fn index(self) -> usize {
        match self {
            Self::AB => 0,
            Self::BC => 1,
            Self::AC => 2,
        }
    }
}

/// XX/XY/YX/YY products of two detectors at one harmonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationProfile {
    bins: usize,
    // [component][bin]
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    entries: Vec<u32>,
    min_entries: u32,
    error_mode: ErrorMode,
}

impl CorrelationProfile {
    pub fn new(bins: usize, min_entries: u32, error_mode: ErrorMode) -> Self {
        Self {
            bins,
            sum: vec![0.0; 4 * bins],
            sum_sq: vec![0.0; 4 * bins],
            entries: vec![0; bins],
            min_entries,
            error_mode,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    /// Fill all four products of `a` and `b` at harmonic `h`.
    pub fn fill(&mut self, bin: usize, a: &QVector, b: &QVector, h: usize) {
        for c in Component::ALL {
            let s = c.index() * self.bins + bin;
            let v = c.product(a, h, b, h);
            self.sum[s] += v;
            self.sum_sq[s] += v * v;
        }
        self.entries[bin] += 1;
    }

    pub fn validated(&self, bin: usize) -> bool {
        self.entries[bin] >= self.min_entries
    }

    pub fn entries(&self, bin: usize) -> u32 {
        self.entries[bin]
    }

    pub fn mean(&self, c: Component, bin: usize) -> f64 {
        let n = self.entries[bin];
        if n == 0 {
            0.0
        } else {
            self.sum[c.index() * self.bins + bin] / n as f64
        }
    }

    pub fn error(&self, c: Component, bin: usize) -> f64 {
        let s = c.index() * self.bins + bin;
        scaled_error(self.sum[s], self.sum_sq[s], self.entries[bin], self.error_mode)
    }

    pub fn merge(&mut self, other: &CorrelationProfile) -> Result<()> {
        if other.bins != self.bins {
            return Err(QnError::ShapeMismatch(format!(
                "correlation profile bins {} vs {}",
                self.bins, other.bins
            )));
        }
        for i in 0..self.sum.len() {
            self.sum[i] += other.sum[i];
            self.sum_sq[i] += other.sum_sq[i];
        }
        for i in 0..self.entries.len() {
            self.entries[i] += other.entries[i];
        }
        Ok(())
    }
}

/// Pairwise products of three detectors per active harmonic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreeDetectorProfile {
    harmonics: u32,
    bins: usize,
    // [pair][component][harmonic slot][bin]
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
    entries: Vec<u32>,
    min_entries: u32,
    error_mode: ErrorMode,
}

impl ThreeDetectorProfile {
    pub fn new(harmonics: u32, bins: usize, min_entries: u32, error_mode: ErrorMode) -> Self {
        let slots = 3 * 4 * harmonics.count_ones() as usize * bins;
        Self {
            harmonics,
            bins,
            sum: vec![0.0; slots],
            sum_sq: vec![0.0; slots],
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

    fn slot(&self, p: Pair, c: Component, h: usize, bin: usize) -> usize {
        debug_assert!(self.harmonics & (1 << (h - 1)) != 0);
        let rank = (self.harmonics & ((1 << (h - 1)) - 1)).count_ones() as usize;
        let n_h = self.harmonics.count_ones() as usize;
        ((p.index() * 4 + c.index()) * n_h + rank) * self.bins + bin
    }

    /// Fill every pair/component product for all active harmonics.
    pub fn fill(&mut self, bin: usize, qa: &QVector, qb: &QVector, qc: &QVector) {
        for h in harmonics_of(self.harmonics) {
            for (pair, first, second) in [
                (Pair::AB, qa, qb),
                (Pair::BC, qb, qc),
                (Pair::AC, qa, qc),
            ] {
                for comp in Component::ALL {
                    let s = self.slot(pair, comp, h, bin);
                    let v = comp.product(first, h, second, h);
                    self.sum[s] += v;
                    self.sum_sq[s] += v * v;
                }
            }
        }
        self.entries[bin] += 1;
    }

    pub fn validated(&self, bin: usize) -> bool {
        self.entries[bin] >= self.min_entries
    }

    pub fn entries(&self, bin: usize) -> u32 {
        self.entries[bin]
    }

    pub fn mean(&self, p: Pair, c: Component, h: usize, bin: usize) -> f64 {
        let n = self.entries[bin];
        if n == 0 {
            0.0
        } else {
            self.sum[self.slot(p, c, h, bin)] / n as f64
        }
    }

    pub fn merge(&mut self, other: &ThreeDetectorProfile) -> Result<()> {
        if other.harmonics != self.harmonics || other.bins != self.bins {
            return Err(QnError::ShapeMismatch(format!(
                "three-detector profile {:#b}/{} vs {:#b}/{}",
                self.harmonics, self.bins, other.harmonics, other.bins
            )));
        }
        for i in 0..self.sum.len() {
            self.sum[i] += other.sum[i];
            self.sum_sq[i] += other.sum_sq[i];
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
    use crate::qvector::{Normalization, StepTag, harmonic_mask};

    fn vec_with(h_mask: u32, h: usize, x: f64, y: f64) -> QVector {
        let mut q = QVector::new(h_mask, Normalization::None, StepTag::Plain);
        q.set(h, x, y);
        q.set_quality(true);
        q
    }

    #[test]
    fn test_correlation_products() {
        let mask = harmonic_mask(&[2]);
        let a = vec_with(mask, 2, 2.0, 3.0);
        let b = vec_with(mask, 2, -1.0, 4.0);
        let mut p = CorrelationProfile::new(1, 2, ErrorMode::Mean);
        p.fill(0, &a, &b, 2);
        p.fill(0, &a, &b, 2);
        assert!(p.validated(0));
        assert_eq!(p.mean(Component::XX, 0), -2.0);
        assert_eq!(p.mean(Component::XY, 0), 8.0);
        assert_eq!(p.mean(Component::YX, 0), -3.0);
        assert_eq!(p.mean(Component::YY, 0), 12.0);
    }

    #[test]
    fn test_correlation_error_identical_fills_is_zero() {
        let mask = harmonic_mask(&[1]);
        let a = vec_with(mask, 1, 1.0, 1.0);
        let b = vec_with(mask, 1, 1.0, 1.0);
        let mut p = CorrelationProfile::new(1, 2, ErrorMode::Mean);
        p.fill(0, &a, &b, 1);
        p.fill(0, &a, &b, 1);
        assert!(p.error(Component::XY, 0).abs() < 1e-12);
    }

    #[test]
    fn test_three_detector_pairs_and_harmonics() {
        let mask = harmonic_mask(&[1, 2]);
        let mut qa = QVector::new(mask, Normalization::None, StepTag::Plain);
        let mut qb = QVector::new(mask, Normalization::None, StepTag::Plain);
        let mut qc = QVector::new(mask, Normalization::None, StepTag::Plain);
        qa.set(1, 1.0, 0.0);
        qa.set(2, 3.0, 1.0);
        qb.set(1, 2.0, 0.0);
        qb.set(2, 0.5, -1.0);
        qc.set(1, 4.0, 0.0);
        qc.set(2, 2.0, 2.0);

        let mut p = ThreeDetectorProfile::new(mask, 1, 1, ErrorMode::Mean);
        p.fill(0, &qa, &qb, &qc);
        assert_eq!(p.entries(0), 1);
        assert_eq!(p.mean(Pair::AB, Component::XX, 1, 0), 2.0);
        assert_eq!(p.mean(Pair::BC, Component::XX, 1, 0), 8.0);
        assert_eq!(p.mean(Pair::AC, Component::XX, 1, 0), 4.0);
        assert_eq!(p.mean(Pair::AB, Component::XX, 2, 0), 1.5);
        assert_eq!(p.mean(Pair::AB, Component::XY, 2, 0), -3.0);
        assert_eq!(p.mean(Pair::AC, Component::YY, 2, 0), 2.0);
    }

    #[test]
    fn test_merge_additivity() {
        let mask = harmonic_mask(&[1]);
        let a1 = vec_with(mask, 1, 1.0, 2.0);
        let b1 = vec_with(mask, 1, 0.5, 0.5);
        let c1 = vec_with(mask, 1, 2.0, -1.0);

        let mut full = ThreeDetectorProfile::new(mask, 2, 2, ErrorMode::Mean);
        let mut left = ThreeDetectorProfile::new(mask, 2, 2, ErrorMode::Mean);
        let mut right = ThreeDetectorProfile::new(mask, 2, 2, ErrorMode::Mean);
        full.fill(1, &a1, &b1, &c1);
        full.fill(1, &b1, &c1, &a1);
        left.fill(1, &a1, &b1, &c1);
        right.fill(1, &b1, &c1, &a1);
        left.merge(&right).unwrap();
        assert_eq!(left, full);
    }
}
