//! Gain equalization: per-channel weight renormalization.
//!
//! Channel detectors have non-uniform channel gain/efficiency; this step
//! normalizes every channel's weight against the calibrated multiplicity of
//! its channel bin before the Qn vector is formed. Three methods:
//!
//! - `None` — pass-through, the equalized weight keeps its seeded value,
//! - `Average` — `w' = (w / avg) * groupWeight`,
//! - `Width` — `w' = (shift + scale * (w - avg) / width) * groupWeight`.
//!
//! The group weight comes either from a per-group calibration profile or
//! from the scheme's hard-coded per-channel constants; the two modes are
//! mutually exclusive. An unvalidated channel bin (or a calibrated average
//! below the significance floor) forces the weight to zero and tallies the
//! event/channel pair in the not-validated QA counter.
//!
//! Chaining caveat: a second equalization stage on the same detector reads
//! the first stage's equalized weight as its own input, both when applying
//! and when filling its calibration histogram, so chained stages compound.
//! Run one equalization stage per detector unless that is deliberate.

use log::{debug, warn};

use crate::correction::{
    GAIN_EQUALIZATION_PRIORITY, InputCorrection, State, StepContext,
};
use crate::error::{QnError, Result};
use crate::histogram::SparseHist;
use crate::histogram::channelized::{ChannelProfile, ChannelScheme};
use crate::qvector::{DataVector, MIN_SIGNIFICANT_WEIGHT};
use crate::store::HistogramPayload;

pub const NAME: &str = "gain_equalization";

/// Weight equalization recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EqualizationMethod {
    /// No reweighting; the seeded equalized weight passes through.
    None,
    /// Divide by the calibrated channel average.
    Average,
    /// Center and scale by the calibrated channel width.
    Width,
}

impl std::fmt::Display for EqualizationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Average => write!(f, "average"),
            Self::Width => write!(f, "width"),
        }
    }
}

/// Input-data correction equalizing per-channel weights.
pub struct GainEqualization {
    method: EqualizationMethod,
    shift: f64,
    scale: f64,
    use_group_weights: bool,
    state: State,
    scheme: Option<ChannelScheme>,
    input: Option<ChannelProfile>,
    input_groups: Option<ChannelProfile>,
    calib: Option<ChannelProfile>,
    calib_groups: Option<ChannelProfile>,
    qa_before: Option<ChannelProfile>,
    qa_after: Option<ChannelProfile>,
    not_validated: Option<SparseHist>,
}

impl GainEqualization {
    pub fn new(method: EqualizationMethod) -> Self {
        Self {
            method,
            shift: 1.0,
            scale: 1.0,
            use_group_weights: false,
            state: State::Calibration,
            scheme: None,
            input: None,
            input_groups: None,
            calib: None,
            calib_groups: None,
            qa_before: None,
            qa_after: None,
            not_validated: None,
        }
    }

    /// Shift and scale of the `Width` method. Defaults are 1.0 / 1.0.
    pub fn with_shift_and_scale(mut self, shift: f64, scale: f64) -> Self {
        self.shift = shift;
        self.scale = scale;
        self
    }

    /// Use the per-group calibration profile as group weight source.
    ///
    /// Mutually exclusive with hard-coded weights on the channel scheme.
    pub fn with_group_weights(mut self) -> Self {
        self.use_group_weights = true;
        self
    }

    /// Group weight for one channel, `None` when its calibrated group bin is
    /// not usable.
    fn group_weight(&self, event_bin: usize, channel: usize) -> Option<f64> {
        let scheme = self.scheme.as_ref()?;
        if !self.use_group_weights {
            return Some(scheme.hard_weight(channel));
        }
        let groups = self.input_groups.as_ref()?;
        let g = scheme.group(channel)?;
        let avg = groups.mean(event_bin, g);
        if groups.validated(event_bin, g) && avg > MIN_SIGNIFICANT_WEIGHT {
            Some(avg)
        } else {
            None
        }
    }
}

impl InputCorrection for GainEqualization {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        GAIN_EQUALIZATION_PRIORITY
    }

    fn state(&self) -> State {
        self.state
    }

    fn initialize(
        &mut self,
        ctx: &StepContext<'_>,
        input: Option<&HistogramPayload>,
    ) -> Result<()> {
        let scheme = ctx
            .channels
            .ok_or_else(|| QnError::NotChannelDetector(ctx.subevent.to_string()))?;
        if self.use_group_weights {
            if !scheme.has_groups() {
                return Err(QnError::InvalidChannelScheme(format!(
                    "{}: group weights requested but the scheme has no groups",
                    ctx.subevent
                )));
            }
            if scheme.has_hard_weights() {
                return Err(QnError::InvalidChannelScheme(format!(
                    "{}: calibrated group weights and hard-coded weights are mutually exclusive",
                    ctx.subevent
                )));
            }
        }
        self.scheme = Some(scheme.clone());

        self.state = match input {
            Some(HistogramPayload::Channel { channels, groups })
                if channels.event_bins() == ctx.event_bins
                    && channels.slots() == scheme.n_used() =>
            {
                self.input = Some(channels.clone());
                self.input_groups = groups.clone();
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

        let bins = ctx.event_bins;
        let slots = scheme.n_used();
        self.calib = Some(ChannelProfile::new(bins, slots, ctx.min_entries, ctx.error_mode));
        self.calib_groups = if self.use_group_weights {
            Some(ChannelProfile::new(bins, scheme.n_groups(), ctx.min_entries, ctx.error_mode))
        } else {
            None
        };
        self.qa_before = ctx
            .fill_qa
            .then(|| ChannelProfile::new(bins, slots, ctx.min_entries, ctx.error_mode));
        self.qa_after = ctx
            .fill_qa
            .then(|| ChannelProfile::new(bins, slots, ctx.min_entries, ctx.error_mode));
        self.not_validated = ctx.fill_validation_qa.then(|| SparseHist::new(bins * slots));
        debug!("{}: {NAME} initialized in state {}", ctx.subevent, self.state);
        Ok(())
    }

    fn process(&mut self, event_bin: Option<usize>, bank: &mut [DataVector]) -> bool {
        if !self.state.applies() {
            return false;
        }
        let Some(bin) = event_bin else {
            // outside the event-class axes: nothing calibrated to apply
            return true;
        };
        let (Some(scheme), Some(input)) = (self.scheme.as_ref(), self.input.as_ref()) else {
            return false;
        };

        for dv in bank.iter_mut() {
            let Some(slot) = scheme.slot(dv.id) else { continue };
            if self.method == EqualizationMethod::None {
                continue;
            }

            let avg = input.mean(bin, slot);
            let width = input.spread(bin, slot);
            let usable = input.validated(bin, slot)
                && avg > MIN_SIGNIFICANT_WEIGHT
                && (self.method != EqualizationMethod::Width || width > MIN_SIGNIFICANT_WEIGHT);
            let group_weight = self.group_weight(bin, dv.id);

            match (usable, group_weight) {
                (true, Some(gw)) => {
                    dv.eq_weight = match self.method {
                        EqualizationMethod::None => dv.eq_weight,
                        EqualizationMethod::Average => dv.eq_weight / avg * gw,
                        EqualizationMethod::Width => {
                            (self.shift + self.scale * (dv.eq_weight - avg) / width) * gw
                        }
                    };
                }
                _ => {
                    dv.eq_weight = 0.0;
                    if let Some(nve) = &mut self.not_validated {
                        nve.fill(bin * scheme.n_used() + slot);
                    }
                }
            }
        }
        true
    }

    fn collect(&mut self, event_bin: Option<usize>, bank: &[DataVector]) {
        let Some(bin) = event_bin else { return };
        let Some(scheme) = self.scheme.as_ref() else { return };

        for dv in bank {
            let Some(slot) = scheme.slot(dv.id) else { continue };
            if self.state.collects() {
                if let Some(calib) = &mut self.calib {
                    calib.fill(bin, slot, dv.eq_weight);
                }
                if let (Some(groups), Some(g)) = (&mut self.calib_groups, scheme.group(dv.id)) {
                    groups.fill(bin, g, dv.eq_weight);
                }
            }
            if let Some(before) = &mut self.qa_before {
                before.fill(bin, slot, dv.weight);
            }
            if self.state.applies() {
                if let Some(after) = &mut self.qa_after {
                    after.fill(bin, slot, dv.eq_weight);
                }
            }
        }
    }

    fn export(&mut self) -> Option<HistogramPayload> {
        if !self.state.collects() {
            return None;
        }
        self.calib.take().map(|channels| HistogramPayload::Channel {
            channels,
            groups: self.calib_groups.take(),
        })
    }

    fn export_qa(&mut self) -> Option<SparseHist> {
        self.not_validated.take().filter(|h| !h.is_empty())
    }
}
