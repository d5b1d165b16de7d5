//! Flow-vector value types.
//!
//! A [`QVector`] carries the per-harmonic complex components of one event's
//! flow vector for one sub-event, together with the sum of weights, the number
//! of contributors, a quality flag, and a tag recording which correction step
//! produced it. Vectors are cheap value types: the pipeline clones and retags
//! them freely as each correction step emits its output.
//!
//! [`DataVector`] is one hit/channel contribution in a sub-event's input bank
//! before vector formation; gain equalization mutates its equalized weight in
//! place.

use serde::{Deserialize, Serialize};

/// Highest harmonic number a vector can track (bits 1..=8 of the mask).
pub const MAX_HARMONIC: usize = 8;

/// Weights and divisors below this magnitude are treated as zero.
pub const MIN_SIGNIFICANT_WEIGHT: f64 = 1e-6;

/// Build a harmonic bitmask from explicit harmonic numbers.
///
/// Bit `h - 1` set means harmonic `h` is tracked. Harmonics outside
/// `1..=MAX_HARMONIC` are ignored.
pub fn harmonic_mask(harmonics: &[usize]) -> u32 {
    let mut mask = 0u32;
    for &h in harmonics {
        if (1..=MAX_HARMONIC).contains(&h) {
            mask |= 1 << (h - 1);
        }
    }
    mask
}

/// Iterate the harmonics of a mask in ascending order.
pub fn harmonics_of(mask: u32) -> impl Iterator<Item = usize> {
    (1..=MAX_HARMONIC).filter(move |h| mask & (1 << (h - 1)) != 0)
}

/// How a plain Qn vector is normalized after accumulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Normalization {
    /// No normalization; raw component sums.
    None,
    /// Divide components by the sum of weights (multiplicity M).
    SumWeights,
    /// Divide components by sqrt(M).
    SqrtSumWeights,
    /// Divide each harmonic by its own magnitude |Q|.
    Magnitude,
}

impl std::fmt::Display for Normalization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::SumWeights => write!(f, "m"),
            Self::SqrtSumWeights => write!(f, "sqrt-m"),
            Self::Magnitude => write!(f, "magnitude"),
        }
    }
}

/// Which pipeline stage produced a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepTag {
    /// Channel detector sum over raw weights, before input-data corrections.
    Raw,
    /// Sum over (equalized) weights, normalized, before Qn corrections.
    Plain,
    /// After recentering.
    Recentered,
    /// After the twist stage of twist-and-rescale.
    Twisted,
    /// After the rescale stage of twist-and-rescale.
    Rescaled,
    /// After alignment rotation.
    Aligned,
}

impl std::fmt::Display for StepTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raw => write!(f, "raw"),
            Self::Plain => write!(f, "plain"),
            Self::Recentered => write!(f, "recentered"),
            Self::Twisted => write!(f, "twisted"),
            Self::Rescaled => write!(f, "rescaled"),
            Self::Aligned => write!(f, "aligned"),
        }
    }
}

/// Per-event flow vector over the active harmonics of one sub-event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QVector {
    harmonics: u32,
    x: [f64; MAX_HARMONIC],
    y: [f64; MAX_HARMONIC],
    sum_weights: f64,
    entries: u32,
    quality: bool,
    tag: StepTag,
    normalization: Normalization,
}

impl QVector {
    /// Create a zeroed vector with the given harmonic mask.
    ///
    /// Fresh vectors are bad quality until a build or correction marks them
    /// otherwise.
    pub fn new(harmonics: u32, normalization: Normalization, tag: StepTag) -> Self {
        Self {
            harmonics,
            x: [0.0; MAX_HARMONIC],
            y: [0.0; MAX_HARMONIC],
            sum_weights: 0.0,
            entries: 0,
            quality: false,
            tag,
            normalization,
        }
    }

    /// The harmonic bitmask.
    pub fn harmonic_mask(&self) -> u32 {
        self.harmonics
    }

    /// Whether harmonic `h` is tracked.
    pub fn is_active(&self, h: usize) -> bool {
        (1..=MAX_HARMONIC).contains(&h) && self.harmonics & (1 << (h - 1)) != 0
    }

    /// Active harmonics in ascending order.
    pub fn harmonics(&self) -> impl Iterator<Item = usize> {
        harmonics_of(self.harmonics)
    }

    /// X component for harmonic `h`. The harmonic must be in the mask.
    pub fn x(&self, h: usize) -> f64 {
        debug_assert!(self.is_active(h), "harmonic {h} not in mask {:#b}", self.harmonics);
        self.x[h - 1]
    }

    /// Y component for harmonic `h`. The harmonic must be in the mask.
    pub fn y(&self, h: usize) -> f64 {
        debug_assert!(self.is_active(h), "harmonic {h} not in mask {:#b}", self.harmonics);
        self.y[h - 1]
    }

    /// Set both components for harmonic `h`.
    pub fn set(&mut self, h: usize, x: f64, y: f64) {
        debug_assert!(self.is_active(h));
        self.x[h - 1] = x;
        self.y[h - 1] = y;
    }

    /// |Q| for harmonic `h`.
    pub fn magnitude(&self, h: usize) -> f64 {
        self.x(h).hypot(self.y(h))
    }

    /// Sum of contributor weights (effective multiplicity).
    pub fn sum_weights(&self) -> f64 {
        self.sum_weights
    }

    /// Number of contributors.
    pub fn entries(&self) -> u32 {
        self.entries
    }

    /// Whether this vector is usable for corrections and analysis.
    pub fn good_quality(&self) -> bool {
        self.quality
    }

    pub fn set_quality(&mut self, good: bool) {
        self.quality = good;
    }

    /// The correction step that produced this vector.
    pub fn tag(&self) -> StepTag {
        self.tag
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Copy with a new step tag, everything else unchanged.
    ///
    /// This is the pass-through path: a step that cannot or must not touch
    /// the numbers still emits its tagged vector so downstream consumers see
    /// a complete chain.
    pub fn retagged(&self, tag: StepTag) -> Self {
        let mut v = self.clone();
        v.tag = tag;
        v
    }

    /// Zero components and weights, drop quality. Mask and tag stay.
    pub fn reset(&mut self) {
        self.x = [0.0; MAX_HARMONIC];
        self.y = [0.0; MAX_HARMONIC];
        self.sum_weights = 0.0;
        self.entries = 0;
        self.quality = false;
    }
}

/// Accumulator that forms a plain Qn vector from azimuthal hits.
///
/// The harmonic multiplier supports building the companion double-harmonic
/// vector: with multiplier 2, the slot for harmonic `h` accumulates
/// `cos(2h·φ)` / `sin(2h·φ)`.
#[derive(Debug, Clone)]
pub struct QVectorBuilder {
    harmonics: u32,
    multiplier: u32,
    x: [f64; MAX_HARMONIC],
    y: [f64; MAX_HARMONIC],
    sum_weights: f64,
    entries: u32,
}

impl QVectorBuilder {
    pub fn new(harmonics: u32, multiplier: u32) -> Self {
        Self {
            harmonics,
            multiplier,
            x: [0.0; MAX_HARMONIC],
            y: [0.0; MAX_HARMONIC],
            sum_weights: 0.0,
            entries: 0,
        }
    }

    /// Add one hit. Weights below the significance floor are skipped.
    pub fn add(&mut self, phi: f64, weight: f64) {
        if weight < MIN_SIGNIFICANT_WEIGHT {
            return;
        }
        for h in harmonics_of(self.harmonics) {
            let arg = (h as u32 * self.multiplier) as f64 * phi;
            self.x[h - 1] += weight * arg.cos();
            self.y[h - 1] += weight * arg.sin();
        }
        self.sum_weights += weight;
        self.entries += 1;
    }

    pub fn reset(&mut self) {
        self.x = [0.0; MAX_HARMONIC];
        self.y = [0.0; MAX_HARMONIC];
        self.sum_weights = 0.0;
        self.entries = 0;
    }

    /// Finish accumulation: quality check, then normalization.
    ///
    /// Quality is good when at least one contributor was accepted. A vector
    /// whose normalization divisor is below the significance floor comes out
    /// bad quality with unnormalized components.
    pub fn build(&self, normalization: Normalization, tag: StepTag) -> QVector {
        let mut q = QVector::new(self.harmonics, normalization, tag);
        q.x = self.x;
        q.y = self.y;
        q.sum_weights = self.sum_weights;
        q.entries = self.entries;
        q.quality = self.entries > 0;
        if !q.quality {
            return q;
        }

        match normalization {
            Normalization::None => {}
            Normalization::SumWeights => {
                if self.sum_weights < MIN_SIGNIFICANT_WEIGHT {
                    q.quality = false;
                } else {
                    for h in harmonics_of(self.harmonics) {
                        q.x[h - 1] /= self.sum_weights;
                        q.y[h - 1] /= self.sum_weights;
                    }
                }
            }
            Normalization::SqrtSumWeights => {
                let d = self.sum_weights.sqrt();
                if d < MIN_SIGNIFICANT_WEIGHT {
                    q.quality = false;
                } else {
                    for h in harmonics_of(self.harmonics) {
                        q.x[h - 1] /= d;
                        q.y[h - 1] /= d;
                    }
                }
            }
            Normalization::Magnitude => {
                for h in harmonics_of(self.harmonics) {
                    let m = q.x[h - 1].hypot(q.y[h - 1]);
                    if m < MIN_SIGNIFICANT_WEIGHT {
                        q.quality = false;
                    } else {
                        q.x[h - 1] /= m;
                        q.y[h - 1] /= m;
                    }
                }
            }
        }
        q
    }
}

/// One hit/channel contribution in a sub-event's input bank.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DataVector {
    /// Channel id for channel detectors, track index for tracking detectors.
    pub id: usize,
    /// Azimuthal angle in radians.
    pub phi: f64,
    /// Raw weight as delivered by the caller.
    pub weight: f64,
    /// Weight after input-data corrections; starts equal to `weight`.
    pub eq_weight: f64,
}

impl DataVector {
    pub fn new(id: usize, phi: f64, weight: f64) -> Self {
        Self {
            id,
            phi,
            weight,
            eq_weight: weight,
        }
    }
}
