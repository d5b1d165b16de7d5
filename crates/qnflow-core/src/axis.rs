//! Event-class axes and linearized multi-axis bin lookup.
//!
//! Every calibration histogram is keyed by the ordered tuple of event-class
//! variable values (centrality, vertex position, ...), each quantized into a
//! fixed [`Axis`]. Bin lookup is deterministic: the same axes always produce
//! the same linear bin for the same values, so the input (read) and
//! calibration (write) histograms of a step stay aligned across runs.

use serde::{Deserialize, Serialize};

use crate::error::{QnError, Result};

/// One binning axis over a named event-class variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    name: String,
    edges: Vec<f64>,
}

impl Axis {
    /// Axis with `nbins` equal-width bins over `[low, high)`.
    pub fn uniform(name: impl Into<String>, nbins: usize, low: f64, high: f64) -> Result<Self> {
        let name = name.into();
        if nbins == 0 || !(high > low) {
            return Err(QnError::InvalidAxis(format!(
                "'{name}': need nbins > 0 and high > low"
            )));
        }
        let width = (high - low) / nbins as f64;
        let edges = (0..=nbins).map(|i| low + i as f64 * width).collect();
        Ok(Self { name, edges })
    }

    /// Axis with explicit, strictly increasing bin edges.
    pub fn variable(name: impl Into<String>, edges: Vec<f64>) -> Result<Self> {
        let name = name.into();
        if edges.len() < 2 || edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(QnError::InvalidAxis(format!(
                "'{name}': need at least two strictly increasing edges"
            )));
        }
        Ok(Self { name, edges })
    }

    /// Name of the event-class variable this axis quantizes.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn nbins(&self) -> usize {
        self.edges.len() - 1
    }

    pub fn low(&self) -> f64 {
        self.edges[0]
    }

    pub fn high(&self) -> f64 {
        self.edges[self.edges.len() - 1]
    }

    /// Bin index for `value`, `None` outside `[low, high)`.
    pub fn bin(&self, value: f64) -> Option<usize> {
        if value < self.low() || value >= self.high() {
            return None;
        }
        // partition_point: number of edges <= value; first edge always qualifies
        let idx = self.edges.partition_point(|&e| e <= value);
        Some(idx - 1)
    }
}

/// Total linear bin count over a set of axes. One bin when the set is empty.
pub fn total_bins(axes: &[Axis]) -> usize {
    axes.iter().map(Axis::nbins).product()
}

/// Linearized bin for one value per axis, row-major in axis order.
///
/// `None` as soon as any value falls outside its axis.
pub fn linear_bin(axes: &[Axis], values: &[f64]) -> Option<usize> {
    debug_assert_eq!(axes.len(), values.len());
    let mut bin = 0usize;
    for (axis, &value) in axes.iter().zip(values) {
        bin = bin * axis.nbins() + axis.bin(value)?;
    }
    Some(bin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_axis_bins() {
        let a = Axis::uniform("centrality", 10, 0.0, 100.0).unwrap();
        assert_eq!(a.nbins(), 10);
        assert_eq!(a.bin(0.0), Some(0));
        assert_eq!(a.bin(9.999), Some(0));
        assert_eq!(a.bin(55.0), Some(5));
        assert_eq!(a.bin(99.999), Some(9));
    }

    #[test]
    fn test_axis_out_of_range() {
        let a = Axis::uniform("vtx_z", 4, -10.0, 10.0).unwrap();
        assert_eq!(a.bin(-10.001), None);
        assert_eq!(a.bin(10.0), None, "upper edge belongs to overflow");
    }

    #[test]
    fn test_variable_axis() {
        let a = Axis::variable("centrality", vec![0.0, 5.0, 10.0, 20.0, 40.0, 80.0]).unwrap();
        assert_eq!(a.nbins(), 5);
        assert_eq!(a.bin(4.9), Some(0));
        assert_eq!(a.bin(5.0), Some(1));
        assert_eq!(a.bin(39.0), Some(3));
    }

    #[test]
    fn test_invalid_axes_rejected() {
        assert!(Axis::uniform("x", 0, 0.0, 1.0).is_err());
        assert!(Axis::uniform("x", 5, 1.0, 1.0).is_err());
        assert!(Axis::variable("x", vec![0.0]).is_err());
        assert!(Axis::variable("x", vec![0.0, 0.0, 1.0]).is_err());
    }

    #[test]
    fn test_linear_bin_row_major() {
        let axes = vec![
            Axis::uniform("a", 3, 0.0, 3.0).unwrap(),
            Axis::uniform("b", 4, 0.0, 4.0).unwrap(),
        ];
        assert_eq!(total_bins(&axes), 12);
        assert_eq!(linear_bin(&axes, &[0.5, 0.5]), Some(0));
        assert_eq!(linear_bin(&axes, &[0.5, 3.5]), Some(3));
        assert_eq!(linear_bin(&axes, &[2.5, 3.5]), Some(11));
        assert_eq!(linear_bin(&axes, &[2.5, 4.5]), None);
    }

    #[test]
    fn test_empty_axis_set_single_bin() {
        assert_eq!(total_bins(&[]), 1);
        assert_eq!(linear_bin(&[], &[]), Some(0));
    }
}
