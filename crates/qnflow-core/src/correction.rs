//! Correction-step protocol: states, contexts, and the two step traits.
//!
//! Every correction step owns a [`State`] fixed once per run at attach time:
//! steps with no prior calibration collect (`Calibration`), steps with an
//! attached input histogram apply and optionally keep collecting
//! (`ApplyCollect` / `Apply`), and steps whose cross-step precondition failed
//! sit out the run (`Passive`).
//!
//! Steps come in two shapes. [`InputCorrection`]s mutate the input-data
//! bank's weights before vector formation; [`QnCorrection`]s read the current
//! Qn vector and emit tagged corrected vectors. Neither holds a reference to
//! its owning sub-event: everything a step needs per event arrives through
//! the call — the event-class bin, the bank, or a [`CollectContext`] with the
//! sub-event's vectors and a snapshot of every detector's current vector for
//! cross-detector collection.

use std::collections::HashMap;

use crate::error::Result;
use crate::histogram::ErrorMode;
use crate::histogram::channelized::ChannelScheme;
use crate::qvector::{DataVector, QVector};
use crate::store::HistogramPayload;

/// Execution-order keys. Lower priority runs earlier within its list.
pub const GAIN_EQUALIZATION_PRIORITY: i32 = 0;
pub const RECENTERING_PRIORITY: i32 = 0;
pub const ALIGNMENT_PRIORITY: i32 = 1;
pub const TWIST_RESCALE_PRIORITY: i32 = 2;

/// Run-scoped state of a correction step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No prior calibration found; collect statistics, apply nothing.
    Calibration,
    /// Prior calibration attached; apply it and collect for the next run.
    ApplyCollect,
    /// Prior calibration attached, re-calibration disabled; apply only.
    Apply,
    /// A cross-step dependency is unsatisfied; the step is inert.
    Passive,
}

impl State {
    /// Whether the step applies its correction this run.
    pub fn applies(self) -> bool {
        matches!(self, Self::ApplyCollect | Self::Apply)
    }

    /// Whether the step accumulates calibration statistics this run.
    pub fn collects(self) -> bool {
        matches!(self, Self::Calibration | Self::ApplyCollect)
    }

    /// State after a successful input-histogram attach.
    pub fn attached(recalibrate: bool) -> Self {
        if recalibrate { Self::ApplyCollect } else { Self::Apply }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Calibration => write!(f, "calibration"),
            Self::ApplyCollect => write!(f, "apply+collect"),
            Self::Apply => write!(f, "apply"),
            Self::Passive => write!(f, "passive"),
        }
    }
}

/// Everything a step needs to size its histograms at run initialization.
pub struct StepContext<'a> {
    /// Owning sub-event name, used for logging and store keys.
    pub subevent: &'a str,
    /// Linear event-class bin count of the owning sub-event.
    pub event_bins: usize,
    /// Harmonic bitmask of the owning sub-event.
    pub harmonics: u32,
    /// Validation threshold for calibration bins.
    pub min_entries: u32,
    /// Error semantics of newly created profiles.
    pub error_mode: ErrorMode,
    /// Channel scheme for channel detectors.
    pub channels: Option<&'a ChannelScheme>,
    /// Whether optional QA histograms are created.
    pub fill_qa: bool,
    /// Whether not-validated QA counters are created.
    pub fill_validation_qa: bool,
    /// Whether attached steps keep collecting (`ApplyCollect` vs `Apply`).
    pub recalibrate: bool,
}

/// Post-attach view of the whole detector set, for cross-step checks.
pub struct AttachEnv {
    twist_applying: HashMap<String, bool>,
}

impl AttachEnv {
    pub fn new(twist_applying: HashMap<String, bool>) -> Self {
        Self { twist_applying }
    }

    /// Whether the named detector has a twist correction in an applying state.
    pub fn is_twist_applying(&self, detector: &str) -> bool {
        self.twist_applying.get(detector).copied().unwrap_or(false)
    }
}

/// Per-event view handed to Qn-step collection.
pub struct CollectContext<'a> {
    /// The owning sub-event's current (fully processed) vector.
    pub current: &'a QVector,
    /// The owning sub-event's plain double-harmonic companion vector.
    pub plain2n: &'a QVector,
    /// Current vectors of every detector, keyed by detector name.
    pub peers: &'a HashMap<String, QVector>,
}

/// A reference to another detector declared by a step, validated at setup.
pub struct StepReference {
    pub name: String,
    pub must_be_track: bool,
}

/// Correction on the input-data bank, run before vector formation.
pub trait InputCorrection: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32;

    fn state(&self) -> State;

    /// Run-boundary setup: attach the input histogram (deciding the state)
    /// and create fresh calibration/QA histograms.
    fn initialize(&mut self, ctx: &StepContext<'_>, input: Option<&HistogramPayload>)
    -> Result<()>;

    /// Apply the correction to the bank's equalized weights.
    ///
    /// Returns whether the correction was applied; `false` short-circuits
    /// later steps in the same list.
    fn process(&mut self, event_bin: Option<usize>, bank: &mut [DataVector]) -> bool;

    /// Collection pass. Called every event until the chain short-circuits;
    /// the step fills calibration histograms only in collecting states and
    /// QA histograms only in applying states.
    fn collect(&mut self, event_bin: Option<usize>, bank: &[DataVector]);

    /// Hand the filled calibration histograms over for persistence.
    /// `None` when the step was not collecting this run.
    fn export(&mut self) -> Option<HistogramPayload>;

    /// Hand the not-validated QA tallies over for persistence.
    fn export_qa(&mut self) -> Option<crate::histogram::SparseHist> {
        None
    }

    /// Other detectors this step depends on.
    fn references(&self) -> Vec<StepReference> {
        Vec::new()
    }
}

/// Correction on the Qn vector.
pub trait QnCorrection: Send + Sync {
    fn name(&self) -> &'static str;

    fn priority(&self) -> i32;

    fn state(&self) -> State;

    /// Run-boundary setup: attach the input histogram (deciding the state)
    /// and create fresh calibration/QA histograms.
    fn initialize(&mut self, ctx: &StepContext<'_>, input: Option<&HistogramPayload>)
    -> Result<()>;

    /// Cross-step precondition check once every step has attached. May only
    /// demote the step to [`State::Passive`].
    fn after_attach(&mut self, _env: &AttachEnv) {}

    /// Correction pass. The step records `current` as its collection input,
    /// then — when applying — emits its tagged output vectors in order; the
    /// last one becomes the next step's input.
    ///
    /// `None` means not applied (state does not apply, or is passive), which
    /// short-circuits later steps. A step must propagate a bad-quality input
    /// as tagged pass-through copies without numeric mutation.
    fn process(&mut self, event_bin: Option<usize>, current: &QVector) -> Option<Vec<QVector>>;

    /// Collection pass, after every sub-event finished its correction pass.
    /// Called every event until the chain short-circuits; the step fills
    /// calibration histograms only in collecting states.
    fn collect(&mut self, event_bin: Option<usize>, ctx: &CollectContext<'_>);

    /// Hand the filled calibration histograms over for persistence.
    /// `None` when the step was not collecting this run.
    fn export(&mut self) -> Option<HistogramPayload>;

    /// Hand the not-validated QA tallies over for persistence.
    fn export_qa(&mut self) -> Option<crate::histogram::SparseHist> {
        None
    }

    /// Other detectors this step depends on.
    fn references(&self) -> Vec<StepReference> {
        Vec::new()
    }

    /// Whether this step would apply a twist to its detector's vector.
    fn provides_twist(&self) -> bool {
        false
    }
}

/// Diagnostic snapshot of one sub-event's correction usage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubEventReport {
    pub name: String,
    /// Every step registered on the sub-event, in execution order.
    pub assigned: Vec<&'static str>,
    /// Steps currently accumulating calibration statistics.
    pub calibrating: Vec<&'static str>,
    /// Steps currently applying their correction.
    pub applying: Vec<&'static str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_applies_collects() {
        assert!(!State::Calibration.applies());
        assert!(State::Calibration.collects());
        assert!(State::ApplyCollect.applies());
        assert!(State::ApplyCollect.collects());
        assert!(State::Apply.applies());
        assert!(!State::Apply.collects());
        assert!(!State::Passive.applies());
        assert!(!State::Passive.collects());
    }

    #[test]
    fn test_attached_state_honors_recalibration_flag() {
        assert_eq!(State::attached(true), State::ApplyCollect);
        assert_eq!(State::attached(false), State::Apply);
    }

    #[test]
    fn test_attach_env_defaults_false() {
        let env = AttachEnv::new(HashMap::from([("TPC".to_string(), true)]));
        assert!(env.is_twist_applying("TPC"));
        assert!(!env.is_twist_applying("V0A"));
    }
}
