//! Twist and rescale: remove residual X/Y cross-correlation and normalize
//! component widths.
//!
//! Both stages share one 2×2 linear transform once the four parameters
//! `A⁺`, `A⁻`, `λ⁺`, `λ⁻` are known:
//!
//! ```text
//! Qx' = (Qx - λ⁻ Qy) / (1 - λ⁻ λ⁺)        (twist)
//! Qy' = (Qy - λ⁺ Qx) / (1 - λ⁻ λ⁺)
//! Qx'' = Qx' / A⁺                          (rescale)
//! Qy'' = Qy' / A⁻
//! ```
//!
//! Two parameter-estimation methods, selected at configuration time:
//!
//! - **Double harmonic** — parameters from the detector's own calibrated
//!   double-harmonic profile: `A± = 1 ± ⟨X2n⟩`, `λ± = ⟨Y2n⟩ / A±`.
//!   Collection source is the plain double-harmonic companion vector.
//! - **Correlations** — parameters from pairwise correlation averages with
//!   two reference detectors B and C. B must itself be twist-corrected,
//!   checked after every step has attached; otherwise this step goes
//!   passive for the run. Collection correlates the vector this step
//!   *received* with the references; its own output would have the twist
//!   already removed.
//!
//! Twist and rescale are independently toggleable and each emits its own
//! tagged vector. A non-finite or oversized parameter skips that harmonic
//! only; a vanishing `A±` skips only the rescale stage for that harmonic.

use log::{debug, warn};

use crate::correction::{
    AttachEnv, CollectContext, QnCorrection, State, StepContext, StepReference,
    TWIST_RESCALE_PRIORITY,
};
use crate::error::Result;
use crate::histogram::SparseHist;
use crate::histogram::components::ComponentsProfile;
use crate::histogram::correlation::{Component, Pair, ThreeDetectorProfile};
use crate::qvector::{MIN_SIGNIFICANT_WEIGHT, QVector, StepTag};
use crate::store::HistogramPayload;

pub const NAME: &str = "twist_rescale";

/// Largest parameter magnitude still considered numerically sane.
pub const PARAMETER_CAP: f64 = 1e8;

/// Parameter-estimation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TwistRescaleMethod {
    DoubleHarmonic,
    Correlations,
}

impl std::fmt::Display for TwistRescaleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DoubleHarmonic => write!(f, "double-harmonic"),
            Self::Correlations => write!(f, "correlations"),
        }
    }
}

/// Qn-vector correction applying the twist and rescale stages.
pub struct TwistAndRescale {
    method: TwistRescaleMethod,
    apply_twist: bool,
    apply_rescale: bool,
    reference_b: Option<String>,
    reference_c: Option<String>,
    state: State,
    input_d2: Option<ComponentsProfile>,
    calib_d2: Option<ComponentsProfile>,
    input_corr: Option<ThreeDetectorProfile>,
    calib_corr: Option<ThreeDetectorProfile>,
    not_validated: Option<SparseHist>,
    last_input: Option<QVector>,
}

impl TwistAndRescale {
    /// Double-harmonic method: parameters from this detector alone.
    pub fn double_harmonic() -> Self {
        Self::new(TwistRescaleMethod::DoubleHarmonic, None, None)
    }

    /// Correlation method with reference detectors B and C.
    pub fn correlations(reference_b: impl Into<String>, reference_c: impl Into<String>) -> Self {
        Self::new(
            TwistRescaleMethod::Correlations,
            Some(reference_b.into()),
            Some(reference_c.into()),
        )
    }

    fn new(
        method: TwistRescaleMethod,
        reference_b: Option<String>,
        reference_c: Option<String>,
    ) -> Self {
        Self {
            method,
            apply_twist: true,
            apply_rescale: true,
            reference_b,
            reference_c,
            state: State::Calibration,
            input_d2: None,
            calib_d2: None,
            input_corr: None,
            calib_corr: None,
            not_validated: None,
            last_input: None,
        }
    }

    pub fn with_twist(mut self, enabled: bool) -> Self {
        self.apply_twist = enabled;
        self
    }

    pub fn with_rescale(mut self, enabled: bool) -> Self {
        self.apply_rescale = enabled;
        self
    }

    pub fn method(&self) -> TwistRescaleMethod {
        self.method
    }

    /// `(A⁺, A⁻, λ⁺, λ⁻)` for one harmonic, `None` when the bin is not
    /// validated.
    fn parameters(&self, h: usize, bin: usize) -> Option<(f64, f64, f64, f64)> {
        match self.method {
            TwistRescaleMethod::DoubleHarmonic => {
                let d2 = self.input_d2.as_ref()?;
                if !d2.validated(bin) {
                    return None;
                }
                let x2 = d2.x_mean(h, bin);
                let y2 = d2.y_mean(h, bin);
                let ap = 1.0 + x2;
                let am = 1.0 - x2;
                Some((ap, am, y2 / ap, y2 / am))
            }
            TwistRescaleMethod::Correlations => {
                let corr = self.input_corr.as_ref()?;
                if !corr.validated(bin) {
                    return None;
                }
                let xaxb = corr.mean(Pair::AB, Component::XX, h, bin);
                let yayb = corr.mean(Pair::AB, Component::YY, h, bin);
                let xayb = corr.mean(Pair::AB, Component::XY, h, bin);
                let xbxc = corr.mean(Pair::BC, Component::XX, h, bin);
                let xbyc = corr.mean(Pair::BC, Component::XY, h, bin);
                let xaxc = corr.mean(Pair::AC, Component::XX, h, bin);

                let scale = (2.0 * xaxc).abs().sqrt();
                let denom = (xaxb * xbxc + xayb * xbyc).abs().sqrt();
                Some((
                    scale * xaxb / denom,
                    scale * yayb / denom,
                    xayb / xaxb,
                    xayb / yayb,
                ))
            }
        }
    }

    fn validated(&self, bin: usize) -> bool {
        match self.method {
            TwistRescaleMethod::DoubleHarmonic => {
                self.input_d2.as_ref().is_some_and(|p| p.validated(bin))
            }
            TwistRescaleMethod::Correlations => {
                self.input_corr.as_ref().is_some_and(|p| p.validated(bin))
            }
        }
    }
}

impl QnCorrection for TwistAndRescale {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        TWIST_RESCALE_PRIORITY
    }

    fn state(&self) -> State {
        self.state
    }

    fn initialize(
        &mut self,
        ctx: &StepContext<'_>,
        input: Option<&HistogramPayload>,
    ) -> Result<()> {
        self.state = match (self.method, input) {
            (TwistRescaleMethod::DoubleHarmonic, Some(HistogramPayload::Components(p)))
                if p.bins() == ctx.event_bins && p.harmonic_mask() == ctx.harmonics =>
            {
                self.input_d2 = Some(p.clone());
                State::attached(ctx.recalibrate)
            }
            (TwistRescaleMethod::Correlations, Some(HistogramPayload::ThreeDetector(p)))
                if p.bins() == ctx.event_bins && p.harmonic_mask() == ctx.harmonics =>
            {
                self.input_corr = Some(p.clone());
                State::attached(ctx.recalibrate)
            }
            (_, Some(_)) => {
                warn!("{}: {NAME} input payload has the wrong shape, recalibrating", ctx.subevent);
                State::Calibration
            }
            (_, None) => {
                debug!("{}: no {NAME} input histogram, calibrating", ctx.subevent);
                State::Calibration
            }
        };

        match self.method {
            TwistRescaleMethod::DoubleHarmonic => {
                self.calib_d2 = Some(ComponentsProfile::new(
                    ctx.harmonics,
                    ctx.event_bins,
                    ctx.min_entries,
                    ctx.error_mode,
                ));
            }
            TwistRescaleMethod::Correlations => {
                self.calib_corr = Some(ThreeDetectorProfile::new(
                    ctx.harmonics,
                    ctx.event_bins,
                    ctx.min_entries,
                    ctx.error_mode,
                ));
            }
        }
        self.not_validated = ctx
            .fill_validation_qa
            .then(|| SparseHist::new(ctx.event_bins));
        self.last_input = None;
        debug!(
            "{}: {NAME} ({}) initialized in state {}",
            ctx.subevent, self.method, self.state
        );
        Ok(())
    }

    fn after_attach(&mut self, env: &AttachEnv) {
        if self.method != TwistRescaleMethod::Correlations {
            return;
        }
        let Some(b) = self.reference_b.as_deref() else { return };
        if !env.is_twist_applying(b) {
            warn!("{NAME}: reference '{b}' is not twist-corrected, going passive");
            self.state = State::Passive;
        }
    }

    fn process(&mut self, event_bin: Option<usize>, current: &QVector) -> Option<Vec<QVector>> {
        self.last_input = Some(current.clone());
        if !self.state.applies() {
            return None;
        }

        let mut twisted = current.retagged(StepTag::Twisted);
        let mut rescaled = current.retagged(StepTag::Rescaled);
        let (apply_twist, apply_rescale) = (self.apply_twist, self.apply_rescale);
        let pass_through = move |twisted: QVector, rescaled: QVector| {
            let mut out = Vec::with_capacity(2);
            if apply_twist {
                out.push(twisted);
            }
            if apply_rescale {
                out.push(rescaled);
            }
            Some(out)
        };

        if !current.good_quality() {
            return pass_through(twisted, rescaled);
        }
        let Some(bin) = event_bin else {
            return pass_through(twisted, rescaled);
        };
        if !self.validated(bin) {
            if let Some(nve) = &mut self.not_validated {
                nve.fill(bin);
            }
            return pass_through(twisted, rescaled);
        }

        for h in current.harmonics() {
            let Some((ap, am, lp, lm)) = self.parameters(h, bin) else { continue };
            let sane = [ap, am, lp, lm]
                .iter()
                .all(|p| p.is_finite() && p.abs() <= PARAMETER_CAP);
            if !sane {
                // unstable parameters skip this harmonic only
                continue;
            }

            let x = current.x(h);
            let y = current.y(h);
            let (mut rx, mut ry) = (x, y);
            if self.apply_twist {
                let d = 1.0 - lm * lp;
                let tx = (x - lm * y) / d;
                let ty = (y - lp * x) / d;
                if !(tx.is_finite() && ty.is_finite()) {
                    continue;
                }
                twisted.set(h, tx, ty);
                rx = tx;
                ry = ty;
            }
            if self.apply_rescale {
                if ap.abs() < MIN_SIGNIFICANT_WEIGHT || am.abs() < MIN_SIGNIFICANT_WEIGHT {
                    // rescale alone is skipped; keep the twist-stage result
                    rescaled.set(h, rx, ry);
                } else {
                    rescaled.set(h, rx / ap, ry / am);
                }
            }
        }
        pass_through(twisted, rescaled)
    }

    fn collect(&mut self, event_bin: Option<usize>, ctx: &CollectContext<'_>) {
        if !self.state.collects() {
            return;
        }
        let Some(bin) = event_bin else { return };
        match self.method {
            TwistRescaleMethod::DoubleHarmonic => {
                if let Some(calib) = &mut self.calib_d2 {
                    if ctx.plain2n.good_quality() {
                        calib.fill(bin, ctx.plain2n);
                    }
                }
            }
            TwistRescaleMethod::Correlations => {
                let (Some(b), Some(c)) = (self.reference_b.as_deref(), self.reference_c.as_deref())
                else {
                    return;
                };
                // correlate the vector this step received, not its own output
                let Some(qa) = self.last_input.as_ref() else { return };
                let (Some(qb), Some(qc)) = (ctx.peers.get(b), ctx.peers.get(c)) else { return };
                if let Some(calib) = &mut self.calib_corr {
                    if qa.good_quality() && qb.good_quality() && qc.good_quality() {
                        calib.fill(bin, qa, qb, qc);
                    }
                }
            }
        }
    }

    fn export(&mut self) -> Option<HistogramPayload> {
        if !self.state.collects() {
            return None;
        }
        match self.method {
            TwistRescaleMethod::DoubleHarmonic => {
                self.calib_d2.take().map(HistogramPayload::Components)
            }
            TwistRescaleMethod::Correlations => {
                self.calib_corr.take().map(HistogramPayload::ThreeDetector)
            }
        }
    }

    fn export_qa(&mut self) -> Option<SparseHist> {
        self.not_validated.take().filter(|h| !h.is_empty())
    }

    fn references(&self) -> Vec<StepReference> {
        match (&self.reference_b, &self.reference_c) {
            (Some(b), Some(c)) => vec![
                StepReference { name: b.clone(), must_be_track: true },
                StepReference { name: c.clone(), must_be_track: true },
            ],
            _ => Vec::new(),
        }
    }

    fn provides_twist(&self) -> bool {
        self.apply_twist && self.state.applies()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::ErrorMode;
    use crate::qvector::{Normalization, harmonic_mask};
    use std::collections::HashMap;

    fn ctx(harmonics: u32) -> StepContext<'static> {
        StepContext {
            subevent: "TPC",
            event_bins: 1,
            harmonics,
            min_entries: 2,
            error_mode: ErrorMode::Mean,
            channels: None,
            fill_qa: false,
            fill_validation_qa: true,
            recalibrate: true,
        }
    }

    fn vector(mask: u32, fills: &[(usize, f64, f64)]) -> QVector {
        let mut q = QVector::new(mask, Normalization::None, StepTag::Plain);
        for &(h, x, y) in fills {
            q.set(h, x, y);
        }
        q.set_quality(true);
        q
    }

    /// Double-harmonic input with given (X2n, Y2n) per harmonic.
    fn d2_input(mask: u32, values: &[(usize, f64, f64)]) -> HistogramPayload {
        let mut p = ComponentsProfile::new(mask, 1, 2, ErrorMode::Mean);
        p.fill(0, &vector(mask, values));
        p.fill(0, &vector(mask, values));
        HistogramPayload::Components(p)
    }

    #[test]
    fn test_double_harmonic_twist_formula() {
        let mask = harmonic_mask(&[2]);
        // X2n = 0.2, Y2n = 0.1 -> A+ = 1.2, A- = 0.8, l+ = 1/12, l- = 0.125
        let input = d2_input(mask, &[(2, 0.2, 0.1)]);
        let mut step = TwistAndRescale::double_harmonic();
        step.initialize(&ctx(mask), Some(&input)).unwrap();
        assert_eq!(step.state(), State::ApplyCollect);

        let q = vector(mask, &[(2, 1.0, 0.5)]);
        let out = step.process(Some(0), &q).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].tag(), StepTag::Twisted);
        assert_eq!(out[1].tag(), StepTag::Rescaled);

        let (lp, lm) = (0.1 / 1.2, 0.1 / 0.8);
        let d = 1.0 - lm * lp;
        let tx = (1.0 - lm * 0.5) / d;
        let ty = (0.5 - lp * 1.0) / d;
        assert!((out[0].x(2) - tx).abs() < 1e-12);
        assert!((out[0].y(2) - ty).abs() < 1e-12);
        assert!((out[1].x(2) - tx / 1.2).abs() < 1e-12);
        assert!((out[1].y(2) - ty / 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_harmonic_independence() {
        let mask = harmonic_mask(&[1, 2]);
        let clean = d2_input(mask, &[(1, 0.1, 0.05), (2, 0.2, 0.1)]);
        // corrupt harmonic 1 with an absurd X2n; harmonic 2 untouched
        let corrupt = d2_input(mask, &[(1, 1e12, 0.05), (2, 0.2, 0.1)]);

        let q = vector(mask, &[(1, 0.4, -0.2), (2, 1.0, 0.5)]);
        let mut clean_step = TwistAndRescale::double_harmonic();
        clean_step.initialize(&ctx(mask), Some(&clean)).unwrap();
        let mut corrupt_step = TwistAndRescale::double_harmonic();
        corrupt_step.initialize(&ctx(mask), Some(&corrupt)).unwrap();

        let clean_out = clean_step.process(Some(0), &q).unwrap();
        let corrupt_out = corrupt_step.process(Some(0), &q).unwrap();
        // corrupted harmonic passes through
        assert_eq!(corrupt_out[0].x(1), 0.4);
        assert_eq!(corrupt_out[0].y(1), -0.2);
        // the other harmonic is untouched by the corruption
        assert_eq!(clean_out[0].x(2), corrupt_out[0].x(2));
        assert_eq!(clean_out[1].y(2), corrupt_out[1].y(2));
    }

    #[test]
    fn test_zero_a_skips_rescale_stage_only() {
        let mask = harmonic_mask(&[1]);
        // X2n = 1.0 -> A- = 0, twist parameters stay finite
        let input = d2_input(mask, &[(1, 1.0, 0.2)]);
        let mut step = TwistAndRescale::double_harmonic();
        step.initialize(&ctx(mask), Some(&input)).unwrap();

        let q = vector(mask, &[(1, 1.0, 0.5)]);
        let out = step.process(Some(0), &q).unwrap();
        // twist was applied
        assert_ne!(out[0].x(1), 1.0);
        // rescale kept the twist-stage result instead of dividing by zero
        assert_eq!(out[1].x(1), out[0].x(1));
        assert_eq!(out[1].y(1), out[0].y(1));
    }

    #[test]
    fn test_toggles_control_emitted_vectors() {
        let mask = harmonic_mask(&[1]);
        let input = d2_input(mask, &[(1, 0.2, 0.1)]);
        let q = vector(mask, &[(1, 1.0, 0.5)]);

        let mut twist_only = TwistAndRescale::double_harmonic().with_rescale(false);
        twist_only.initialize(&ctx(mask), Some(&input)).unwrap();
        let out = twist_only.process(Some(0), &q).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag(), StepTag::Twisted);

        let mut rescale_only = TwistAndRescale::double_harmonic().with_twist(false);
        rescale_only.initialize(&ctx(mask), Some(&input)).unwrap();
        let out = rescale_only.process(Some(0), &q).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].tag(), StepTag::Rescaled);
        // rescale operated on the uncorrected components
        assert!((out[0].x(1) - 1.0 / 1.2).abs() < 1e-12);
    }

    #[test]
    fn test_double_harmonic_collects_plain2n() {
        let mask = harmonic_mask(&[1]);
        let mut step = TwistAndRescale::double_harmonic();
        step.initialize(&ctx(mask), None).unwrap();

        let current = vector(mask, &[(1, 0.3, 0.1)]);
        let plain2n = vector(mask, &[(1, 0.7, -0.4)]);
        let peers = HashMap::new();
        let cctx = CollectContext { current: &current, plain2n: &plain2n, peers: &peers };
        step.collect(Some(0), &cctx);
        step.collect(Some(0), &cctx);

        match step.export().unwrap() {
            HistogramPayload::Components(p) => {
                assert_eq!(p.x_mean(1, 0), 0.7);
                assert_eq!(p.y_mean(1, 0), -0.4);
            }
            _ => panic!("wrong payload"),
        }
    }

    #[test]
    fn test_correlations_passive_without_twisted_reference() {
        let mask = harmonic_mask(&[2]);
        let mut step = TwistAndRescale::correlations("V0A", "V0C");
        step.initialize(&ctx(mask), None).unwrap();
        assert_eq!(step.state(), State::Calibration);

        step.after_attach(&AttachEnv::new(HashMap::new()));
        assert_eq!(step.state(), State::Passive);
        assert!(step.process(Some(0), &vector(mask, &[(2, 1.0, 0.0)])).is_none());
    }

    #[test]
    fn test_correlations_survives_attach_with_twisted_reference() {
        let mask = harmonic_mask(&[2]);
        let mut step = TwistAndRescale::correlations("V0A", "V0C");
        step.initialize(&ctx(mask), None).unwrap();
        step.after_attach(&AttachEnv::new(HashMap::from([("V0A".to_string(), true)])));
        assert_eq!(step.state(), State::Calibration);
    }

    #[test]
    fn test_correlations_collection_requires_all_three_good() {
        let mask = harmonic_mask(&[2]);
        let mut step = TwistAndRescale::correlations("B", "C");
        step.initialize(&ctx(mask), None).unwrap();

        let current = vector(mask, &[(2, 1.0, 0.2)]);
        let plain2n = current.clone();
        let mut qb = vector(mask, &[(2, 0.5, 0.1)]);
        let qc = vector(mask, &[(2, 0.8, -0.1)]);

        let good_peers = HashMap::from([("B".to_string(), qb.clone()), ("C".to_string(), qc.clone())]);
        assert!(step.process(Some(0), &current).is_none(), "still calibrating");
        step.collect(
            Some(0),
            &CollectContext { current: &current, plain2n: &plain2n, peers: &good_peers },
        );

        qb.set_quality(false);
        let bad_peers = HashMap::from([("B".to_string(), qb), ("C".to_string(), qc)]);
        assert!(step.process(Some(0), &current).is_none());
        step.collect(
            Some(0),
            &CollectContext { current: &current, plain2n: &plain2n, peers: &bad_peers },
        );

        match step.export().unwrap() {
            HistogramPayload::ThreeDetector(p) => {
                assert_eq!(p.entries(0), 1, "only the all-good event was collected");
            }
            _ => panic!("wrong payload"),
        }
    }

    #[test]
    fn test_correlations_collects_the_step_input() {
        let mask = harmonic_mask(&[2]);
        let qa = vector(mask, &[(2, 1.0, 0.5)]);
        let qb = vector(mask, &[(2, 0.8, 0.2)]);
        let qc = vector(mask, &[(2, 0.6, -0.3)]);
        let mut p = ThreeDetectorProfile::new(mask, 1, 2, ErrorMode::Mean);
        p.fill(0, &qa, &qb, &qc);
        p.fill(0, &qa, &qb, &qc);
        let input = HistogramPayload::ThreeDetector(p);

        let mut step = TwistAndRescale::correlations("B", "C");
        step.initialize(&ctx(mask), Some(&input)).unwrap();
        assert_eq!(step.state(), State::ApplyCollect);

        let out = step.process(Some(0), &qa).unwrap();
        let corrected = out.last().unwrap();
        assert_ne!(corrected.x(2), qa.x(2));

        let peers = HashMap::from([("B".to_string(), qb), ("C".to_string(), qc)]);
        step.collect(
            Some(0),
            &CollectContext { current: corrected, plain2n: corrected, peers: &peers },
        );

        match step.export().unwrap() {
            HistogramPayload::ThreeDetector(p) => {
                // the recollected XaXb reflects the uncorrected vector
                assert!((p.mean(Pair::AB, Component::XX, 2, 0) - 1.0 * 0.8).abs() < 1e-12);
                assert!((p.mean(Pair::AB, Component::YY, 2, 0) - 0.5 * 0.2).abs() < 1e-12);
            }
            _ => panic!("wrong payload"),
        }
    }

    #[test]
    fn test_correlations_parameter_formulas() {
        let mask = harmonic_mask(&[2]);
        // deterministic correlations: identical fills, means equal products
        let qa = vector(mask, &[(2, 1.0, 0.5)]);
        let qb = vector(mask, &[(2, 0.8, 0.2)]);
        let qc = vector(mask, &[(2, 0.6, -0.3)]);
        let mut p = ThreeDetectorProfile::new(mask, 1, 2, ErrorMode::Mean);
        p.fill(0, &qa, &qb, &qc);
        p.fill(0, &qa, &qb, &qc);
        let input = HistogramPayload::ThreeDetector(p);

        let mut step = TwistAndRescale::correlations("B", "C");
        step.initialize(&ctx(mask), Some(&input)).unwrap();
        let (ap, am, lp, lm) = step.parameters(2, 0).unwrap();

        let (xaxb, yayb, xayb): (f64, f64, f64) = (0.8, 0.1, 0.2);
        let (xbxc, xbyc): (f64, f64) = (0.48, -0.24);
        let xaxc: f64 = 0.6;
        let denom = (xaxb * xbxc + xayb * xbyc).abs().sqrt();
        let scale = (2.0 * xaxc).abs().sqrt();
        assert!((ap - scale * xaxb / denom).abs() < 1e-12);
        assert!((am - scale * yayb / denom).abs() < 1e-12);
        assert!((lp - xayb / xaxb).abs() < 1e-12);
        assert!((lm - xayb / yayb).abs() < 1e-12);
    }

    #[test]
    fn test_unvalidated_bin_passes_through_and_tallies() {
        let mask = harmonic_mask(&[1]);
        let mut p = ComponentsProfile::new(mask, 1, 2, ErrorMode::Mean);
        p.fill(0, &vector(mask, &[(1, 0.2, 0.1)])); // below threshold
        let input = HistogramPayload::Components(p);

        let mut step = TwistAndRescale::double_harmonic();
        step.initialize(&ctx(mask), Some(&input)).unwrap();
        let q = vector(mask, &[(1, 1.0, 0.5)]);
        let out = step.process(Some(0), &q).unwrap();
        assert_eq!(out[0].x(1), 1.0);
        assert_eq!(out[1].x(1), 1.0);
        assert_eq!(step.export_qa().unwrap().count(0), 1);
    }
}
