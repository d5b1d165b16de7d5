//! Alignment: rotate the Qn vector into a reference detector's frame.
//!
//! The relative azimuthal misalignment between this detector and a reference
//! detector shows up as a nonzero ⟨XY⟩−⟨YX⟩ correlation at the alignment
//! harmonic. The rotation angle is
//!
//! ```text
//! ΔΦ = -atan2(⟨XY⟩ - ⟨YX⟩, ⟨XX⟩ + ⟨YY⟩) / h_align
//! ```
//!
//! and it is applied to every active harmonic only when the correlation is
//! significant: `sqrt((XY-YX)² / (eXY² + eYX²)) ≥ 2`. Collection fills the
//! four component products of the vector this step *received* with the
//! reference detector's, both taken at the alignment harmonic; collecting
//! the step's own output would erase the very correlation being calibrated.

use log::{debug, warn};

use crate::correction::{
    ALIGNMENT_PRIORITY, CollectContext, QnCorrection, State, StepContext, StepReference,
};
use crate::error::{QnError, Result};
use crate::histogram::SparseHist;
use crate::histogram::correlation::{Component, CorrelationProfile};
use crate::qvector::{MAX_HARMONIC, QVector, StepTag};
use crate::store::HistogramPayload;

pub const NAME: &str = "alignment";

/// Minimum significance of the rotation angle before it is applied.
pub const SIGNIFICANCE_THRESHOLD: f64 = 2.0;

/// Qn-vector correction rotating out the misalignment with a reference.
pub struct Alignment {
    reference: String,
    harmonic: usize,
    state: State,
    input: Option<CorrelationProfile>,
    calib: Option<CorrelationProfile>,
    not_validated: Option<SparseHist>,
    last_input: Option<QVector>,
}

impl Alignment {
    /// Align against `reference` using the given alignment harmonic.
    pub fn new(reference: impl Into<String>, harmonic: usize) -> Self {
        Self {
            reference: reference.into(),
            harmonic,
            state: State::Calibration,
            input: None,
            calib: None,
            not_validated: None,
            last_input: None,
        }
    }

    pub fn alignment_harmonic(&self) -> usize {
        self.harmonic
    }
}

impl QnCorrection for Alignment {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        ALIGNMENT_PRIORITY
    }

    fn state(&self) -> State {
        self.state
    }

    fn initialize(
        &mut self,
        ctx: &StepContext<'_>,
        input: Option<&HistogramPayload>,
    ) -> Result<()> {
        if !(1..=MAX_HARMONIC).contains(&self.harmonic)
            || ctx.harmonics & (1 << (self.harmonic - 1)) == 0
        {
            return Err(QnError::HarmonicNotActive { step: NAME, harmonic: self.harmonic });
        }
        self.state = match input {
            Some(HistogramPayload::Correlation(p)) if p.bins() == ctx.event_bins => {
                self.input = Some(p.clone());
                State::attached(ctx.recalibrate)
            }
            Some(_) => {
                warn!("{}: {NAME} input payload has the wrong shape, recalibrating", ctx.subevent);
                State::Calibration
            }
            None => {
                debug!("{}: no {NAME} input histogram, calibrating", ctx.subevent);
                State::Calibration
            }
        };
        self.calib = Some(CorrelationProfile::new(
            ctx.event_bins,
            ctx.min_entries,
            ctx.error_mode,
        ));
        self.not_validated = ctx
            .fill_validation_qa
            .then(|| SparseHist::new(ctx.event_bins));
        self.last_input = None;
        debug!("{}: {NAME} initialized in state {}", ctx.subevent, self.state);
        Ok(())
    }

    fn process(&mut self, event_bin: Option<usize>, current: &QVector) -> Option<Vec<QVector>> {
        self.last_input = Some(current.clone());
        if !self.state.applies() {
            return None;
        }

        let mut out = current.retagged(StepTag::Aligned);
        if !current.good_quality() {
            return Some(vec![out]);
        }
        let (Some(bin), Some(input)) = (event_bin, self.input.as_ref()) else {
            return Some(vec![out]);
        };
        if !input.validated(bin) {
            if let Some(nve) = &mut self.not_validated {
                nve.fill(bin);
            }
            return Some(vec![out]);
        }

        let xx = input.mean(Component::XX, bin);
        let xy = input.mean(Component::XY, bin);
        let yx = input.mean(Component::YX, bin);
        let yy = input.mean(Component::YY, bin);
        let exy = input.error(Component::XY, bin);
        let eyx = input.error(Component::YX, bin);

        let numerator = xy - yx;
        let significance =
            (numerator * numerator / (exy * exy + eyx * eyx)).sqrt();
        if !significance.is_finite() || significance < SIGNIFICANCE_THRESHOLD {
            return Some(vec![out]);
        }

        let delta_phi = -numerator.atan2(xx + yy) / self.harmonic as f64;
        for h in current.harmonics() {
            let arg = h as f64 * delta_phi;
            let (sin, cos) = arg.sin_cos();
            out.set(
                h,
                current.x(h) * cos + current.y(h) * sin,
                current.y(h) * cos - current.x(h) * sin,
            );
        }
        Some(vec![out])
    }

    fn collect(&mut self, event_bin: Option<usize>, ctx: &CollectContext<'_>) {
        if !self.state.collects() {
            return;
        }
        let (Some(bin), Some(calib)) = (event_bin, self.calib.as_mut()) else { return };
        // correlate the vector this step received, not its own output
        let Some(own) = self.last_input.as_ref() else { return };
        let Some(reference) = ctx.peers.get(&self.reference) else { return };
        if !own.good_quality() || !reference.good_quality() {
            return;
        }
        if !own.is_active(self.harmonic) || !reference.is_active(self.harmonic) {
            return;
        }
        calib.fill(bin, own, reference, self.harmonic);
    }

    fn export(&mut self) -> Option<HistogramPayload> {
        if !self.state.collects() {
            return None;
        }
        self.calib.take().map(HistogramPayload::Correlation)
    }

    fn export_qa(&mut self) -> Option<SparseHist> {
        self.not_validated.take().filter(|h| !h.is_empty())
    }

    fn references(&self) -> Vec<StepReference> {
        vec![StepReference { name: self.reference.clone(), must_be_track: false }]
    }
}
