//! Recentering: subtract the calibrated mean Qn components.
//!
//! For every active harmonic the calibrated ⟨X⟩/⟨Y⟩ of the current
//! event-class bin is subtracted from the input vector; with width
//! equalization enabled each component is additionally divided by its
//! calibrated spread. Collection always uses the vector the step *received*,
//! never its own output, so what is averaged is decoupled from what was just
//! produced.

use log::debug;

use crate::correction::{
    CollectContext, QnCorrection, RECENTERING_PRIORITY, State, StepContext,
};
use crate::error::Result;
use crate::histogram::SparseHist;
use crate::histogram::components::ComponentsProfile;
use crate::qvector::{MIN_SIGNIFICANT_WEIGHT, QVector, StepTag};
use crate::store::HistogramPayload;

pub const NAME: &str = "recentering";

/// Qn-vector correction recentering each harmonic on its calibrated mean.
pub struct Recentering {
    width_equalization: bool,
    state: State,
    input: Option<ComponentsProfile>,
    calib: Option<ComponentsProfile>,
    not_validated: Option<SparseHist>,
    last_input: Option<QVector>,
}

impl Recentering {
    pub fn new() -> Self {
        Self {
            width_equalization: false,
            state: State::Calibration,
            input: None,
            calib: None,
            not_validated: None,
            last_input: None,
        }
    }

    /// Additionally divide each component by its calibrated spread.
    pub fn with_width_equalization(mut self) -> Self {
        self.width_equalization = true;
        self
    }
}

impl Default for Recentering {
    fn default() -> Self {
        Self::new()
    }
}

impl QnCorrection for Recentering {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        RECENTERING_PRIORITY
    }

    fn state(&self) -> State {
        self.state
    }

    fn initialize(
        &mut self,
        ctx: &StepContext<'_>,
        input: Option<&HistogramPayload>,
    ) -> Result<()> {
        self.state = match input {
            Some(HistogramPayload::Components(p))
                if p.bins() == ctx.event_bins && p.harmonic_mask() == ctx.harmonics =>
            {
                self.input = Some(p.clone());
                State::attached(ctx.recalibrate)
            }
            Some(_) => {
                debug!("{}: {NAME} input payload shape mismatch, recalibrating", ctx.subevent);
                State::Calibration
            }
            None => {
                debug!("{}: no {NAME} input histogram, calibrating", ctx.subevent);
                State::Calibration
            }
        };
        self.calib = Some(ComponentsProfile::new(
            ctx.harmonics,
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

        let mut out = current.retagged(StepTag::Recentered);
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

        for h in current.harmonics() {
            let mut width_x = 1.0;
            let mut width_y = 1.0;
            if self.width_equalization {
                let sx = input.x_sigma(h, bin);
                let sy = input.y_sigma(h, bin);
                if sx > MIN_SIGNIFICANT_WEIGHT {
                    width_x = sx;
                }
                if sy > MIN_SIGNIFICANT_WEIGHT {
                    width_y = sy;
                }
            }
            out.set(
                h,
                (current.x(h) - input.x_mean(h, bin)) / width_x,
                (current.y(h) - input.y_mean(h, bin)) / width_y,
            );
        }
        Some(vec![out])
    }

    fn collect(&mut self, event_bin: Option<usize>, _ctx: &CollectContext<'_>) {
        if !self.state.collects() {
            return;
        }
        let (Some(bin), Some(q), Some(calib)) =
            (event_bin, self.last_input.as_ref(), self.calib.as_mut())
        else {
            return;
        };
        if q.good_quality() {
            calib.fill(bin, q);
        }
    }

    fn export(&mut self) -> Option<HistogramPayload> {
        if !self.state.collects() {
            return None;
        }
        self.calib.take().map(HistogramPayload::Components)
    }

    fn export_qa(&mut self) -> Option<SparseHist> {
        self.not_validated.take().filter(|h| !h.is_empty())
    }
}
