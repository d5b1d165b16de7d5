//! Sub-event pipeline: one correction unit of a detector.
//!
//! A sub-event owns the input-data bank, both priority-ordered step lists,
//! and the per-event vector ledger (raw, plain, one tagged vector per applied
//! correction). Per event the correction pass runs input-data corrections
//! over the bank, forms the plain vector from the equalized weights, then
//! threads the current vector through the Qn steps; each chain stops at the
//! first non-applying step. While an input step still calibrates no plain
//! vector is built and the Qn steps see nothing, in the correction pass and
//! in collection alike. The collection pass runs afterwards, once every
//! sub-event's correction pass finished, so cross-detector reads see
//! finished current vectors.

use std::collections::HashMap;

use log::debug;

use crate::axis::{Axis, linear_bin, total_bins};
use crate::correction::{
    AttachEnv, CollectContext, InputCorrection, QnCorrection, StepContext, SubEventReport,
};
use crate::error::{QnError, Result};
use crate::histogram::ErrorMode;
use crate::histogram::SparseHist;
use crate::histogram::channelized::ChannelScheme;
use crate::qvector::{DataVector, Normalization, QVector, QVectorBuilder, StepTag};
use crate::store::StepHistograms;
use crate::variables::VariableManager;

/// Run-wide knobs shared by every step, fixed at initialization.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Validation threshold for calibration bins.
    pub min_entries: u32,
    /// Error semantics of calibration profiles.
    pub error_mode: ErrorMode,
    /// Whether optional QA histograms are filled.
    pub fill_qa: bool,
    /// Whether not-validated tallies are kept.
    pub fill_validation_qa: bool,
    /// Whether attached steps keep collecting for the next pass.
    pub recalibrate: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            min_entries: crate::histogram::DEFAULT_MIN_ENTRIES,
            error_mode: ErrorMode::Mean,
            fill_qa: false,
            fill_validation_qa: true,
            recalibrate: true,
        }
    }
}

/// How the sub-event's bank maps onto the detector hardware.
pub enum SubEventKind {
    /// Tracking detector: ids are track indices, weights are track weights.
    Tracks,
    /// Channel detector: ids are channel numbers under a fixed scheme.
    Channels(ChannelScheme),
}

/// One independent correction unit of a detector.
pub struct SubEvent {
    name: String,
    kind: SubEventKind,
    harmonics: u32,
    normalization: Normalization,
    event_axes: Vec<Axis>,
    axis_ids: Vec<usize>,
    bank: Vec<DataVector>,
    input_steps: Vec<Box<dyn InputCorrection>>,
    qn_steps: Vec<Box<dyn QnCorrection>>,
    builder: QVectorBuilder,
    builder2n: QVectorBuilder,
    plain2n: QVector,
    current: QVector,
    outputs: Vec<QVector>,
    event_bin: Option<usize>,
}

impl SubEvent {
    pub(crate) fn new(
        name: impl Into<String>,
        kind: SubEventKind,
        harmonics: u32,
        normalization: Normalization,
        event_axes: Vec<Axis>,
    ) -> Self {
        Self {
            name: name.into(),
            kind,
            harmonics,
            normalization,
            event_axes,
            axis_ids: Vec::new(),
            bank: Vec::with_capacity(256),
            input_steps: Vec::new(),
            qn_steps: Vec::new(),
            builder: QVectorBuilder::new(harmonics, 1),
            builder2n: QVectorBuilder::new(harmonics, 2),
            plain2n: QVector::new(harmonics, normalization, StepTag::Plain),
            current: QVector::new(harmonics, normalization, StepTag::Plain),
            outputs: Vec::new(),
            event_bin: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn harmonics(&self) -> u32 {
        self.harmonics
    }

    pub fn is_channel(&self) -> bool {
        matches!(self.kind, SubEventKind::Channels(_))
    }

    pub fn channel_scheme(&self) -> Option<&ChannelScheme> {
        match &self.kind {
            SubEventKind::Channels(scheme) => Some(scheme),
            SubEventKind::Tracks => None,
        }
    }

    /// Linear event-class bin of the event currently being processed.
    /// `None` when the event falls outside the axes.
    pub fn event_bin(&self) -> Option<usize> {
        self.event_bin
    }

    /// The fully corrected vector of the last processed event.
    pub fn current(&self) -> &QVector {
        &self.current
    }

    /// Every tagged vector produced this event, raw/plain first.
    pub fn vectors(&self) -> &[QVector] {
        &self.outputs
    }

    pub fn add_input_correction(&mut self, step: Box<dyn InputCorrection>) {
        self.input_steps.push(step);
        self.input_steps.sort_by_key(|s| s.priority());
    }

    pub fn add_qn_correction(&mut self, step: Box<dyn QnCorrection>) {
        self.qn_steps.push(step);
        self.qn_steps.sort_by_key(|s| s.priority());
    }

    /// Feed one data vector for the current event.
    ///
    /// Channel detectors reject out-of-range channel ids and silently drop
    /// channels the scheme marks unused.
    pub fn add_data(&mut self, id: usize, phi: f64, weight: f64) -> Result<()> {
        if let SubEventKind::Channels(scheme) = &self.kind {
            if id >= scheme.n_channels() {
                return Err(QnError::InvalidChannelScheme(format!(
                    "channel {id} outside the {}-channel scheme of '{}'",
                    scheme.n_channels(),
                    self.name
                )));
            }
            if !scheme.is_used(id) {
                return Ok(());
            }
        }
        self.bank.push(DataVector::new(id, phi, weight));
        Ok(())
    }

    /// Run-boundary setup: attach input histograms and size fresh ones.
    pub(crate) fn initialize(
        &mut self,
        settings: &PipelineSettings,
        input: Option<&StepHistograms>,
        vars: &VariableManager,
    ) -> Result<()> {
        self.axis_ids = self
            .event_axes
            .iter()
            .map(|axis| vars.id(axis.name()))
            .collect::<Result<Vec<_>>>()?;
        // a whole-self borrow must not live across the step loops
        let scheme = self.channel_scheme().cloned();
        let ctx = StepContext {
            subevent: &self.name,
            event_bins: total_bins(&self.event_axes),
            harmonics: self.harmonics,
            min_entries: settings.min_entries,
            error_mode: settings.error_mode,
            channels: scheme.as_ref(),
            fill_qa: settings.fill_qa,
            fill_validation_qa: settings.fill_validation_qa,
            recalibrate: settings.recalibrate,
        };
        for step in &mut self.input_steps {
            step.initialize(&ctx, input.and_then(|h| h.get(step.name())))?;
        }
        for step in &mut self.qn_steps {
            step.initialize(&ctx, input.and_then(|h| h.get(step.name())))?;
        }
        debug!(
            "sub-event '{}' initialized: {} input steps, {} qn steps, {} event bins",
            self.name,
            self.input_steps.len(),
            self.qn_steps.len(),
            ctx.event_bins
        );
        Ok(())
    }

    /// Cross-step precondition pass once the whole detector set attached.
    pub(crate) fn after_attach(&mut self, env: &AttachEnv) {
        for step in &mut self.qn_steps {
            step.after_attach(env);
        }
    }

    /// Whether any step would twist this sub-event's vector this run.
    pub(crate) fn is_twist_applying(&self) -> bool {
        self.qn_steps
            .iter()
            .any(|step| step.provides_twist() && step.state().applies())
    }

    /// Correction pass for the current event.
    pub(crate) fn process(&mut self, vars: &VariableManager) {
        let values: Vec<f64> = self.axis_ids.iter().map(|&id| vars.get(id)).collect();
        self.event_bin = linear_bin(&self.event_axes, &values);
        self.outputs.clear();

        if self.is_channel() {
            // raw vector from raw weights, kept for QA consumers
            self.builder.reset();
            for dv in &self.bank {
                self.builder.add(dv.phi, dv.weight);
            }
            self.outputs
                .push(self.builder.build(self.normalization, StepTag::Raw));

            for step in &mut self.input_steps {
                if !step.process(self.event_bin, &mut self.bank) {
                    // un-equalized weights must not reach the Qn steps
                    self.current.reset();
                    self.plain2n.reset();
                    return;
                }
            }
        }

        self.builder.reset();
        self.builder2n.reset();
        for dv in &self.bank {
            self.builder.add(dv.phi, dv.eq_weight);
            self.builder2n.add(dv.phi, dv.eq_weight);
        }
        self.current = self.builder.build(self.normalization, StepTag::Plain);
        self.plain2n = self.builder2n.build(self.normalization, StepTag::Plain);
        self.outputs.push(self.current.clone());

        for step in &mut self.qn_steps {
            let Some(produced) = step.process(self.event_bin, &self.current) else {
                break;
            };
            if let Some(last) = produced.last() {
                self.current = last.clone();
            }
            self.outputs.extend(produced);
        }
    }

    /// Collection pass, given the snapshot of every detector's current vector.
    pub(crate) fn collect(&mut self, peers: &HashMap<String, QVector>) {
        for step in &mut self.input_steps {
            step.collect(self.event_bin, &self.bank);
            if !step.state().applies() {
                // the Qn steps never saw this event either
                return;
            }
        }
        let ctx = CollectContext {
            current: &self.current,
            plain2n: &self.plain2n,
            peers,
        };
        for step in &mut self.qn_steps {
            step.collect(self.event_bin, &ctx);
            if !step.state().applies() {
                break;
            }
        }
    }

    /// Reset the per-event state. The bank keeps its capacity.
    pub(crate) fn clear_event(&mut self) {
        self.bank.clear();
        self.outputs.clear();
        self.current.reset();
        self.plain2n.reset();
        self.event_bin = None;
    }

    /// Hand this run's calibration histograms and QA tallies over.
    pub(crate) fn export(&mut self) -> (StepHistograms, HashMap<String, SparseHist>) {
        let mut histograms = StepHistograms::new();
        let mut qa = HashMap::new();
        for step in &mut self.input_steps {
            if let Some(payload) = step.export() {
                histograms.insert(step.name().to_string(), payload);
            }
            if let Some(nve) = step.export_qa() {
                qa.insert(step.name().to_string(), nve);
            }
        }
        for step in &mut self.qn_steps {
            if let Some(payload) = step.export() {
                histograms.insert(step.name().to_string(), payload);
            }
            if let Some(nve) = step.export_qa() {
                qa.insert(step.name().to_string(), nve);
            }
        }
        (histograms, qa)
    }

    /// Reference detectors the steps depend on, paired with the declaring
    /// step's name.
    pub(crate) fn references(&self) -> Vec<(&'static str, crate::correction::StepReference)> {
        let mut refs = Vec::new();
        for step in &self.input_steps {
            refs.extend(step.references().into_iter().map(|r| (step.name(), r)));
        }
        for step in &self.qn_steps {
            refs.extend(step.references().into_iter().map(|r| (step.name(), r)));
        }
        refs
    }

    /// Usage report: assigned steps, and who calibrates/applies this run.
    /// Later steps stop reporting once an earlier one fails to apply.
    pub fn report(&self) -> SubEventReport {
        let states: Vec<(&'static str, crate::correction::State)> = self
            .input_steps
            .iter()
            .map(|s| (s.name(), s.state()))
            .chain(self.qn_steps.iter().map(|s| (s.name(), s.state())))
            .collect();
        let mut report = SubEventReport {
            name: self.name.clone(),
            assigned: states.iter().map(|&(name, _)| name).collect(),
            calibrating: Vec::new(),
            applying: Vec::new(),
        };
        for (name, state) in states {
            if state.collects() {
                report.calibrating.push(name);
            }
            if state.applies() {
                report.applying.push(name);
            } else {
                break;
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::{GainEqualization, EqualizationMethod, Recentering};
    use crate::qvector::harmonic_mask;

    fn track_subevent(axes: Vec<Axis>) -> SubEvent {
        SubEvent::new(
            "TPC",
            SubEventKind::Tracks,
            harmonic_mask(&[1, 2]),
            Normalization::SumWeights,
            axes,
        )
    }

    fn vars_with_centrality(value: f64) -> VariableManager {
        let mut vars = VariableManager::with_slots(4);
        vars.register("centrality", 0).unwrap();
        vars.set(0, value);
        vars
    }

    #[test]
    fn test_plain_vector_from_bank() {
        let mut sub = track_subevent(Vec::new());
        let vars = VariableManager::new();
        sub.initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        sub.add_data(0, 0.0, 1.0).unwrap();
        sub.add_data(1, std::f64::consts::FRAC_PI_2, 1.0).unwrap();
        sub.process(&vars);
        // harmonic 1: (cos 0 + cos pi/2, sin 0 + sin pi/2) / M = (0.5, 0.5)
        let q = sub.current();
        assert!(q.good_quality());
        assert!((q.x(1) - 0.5).abs() < 1e-12);
        assert!((q.y(1) - 0.5).abs() < 1e-12);
        assert_eq!(sub.vectors().len(), 1); // tracks with no steps: plain only
    }

    #[test]
    fn test_event_outside_axes_has_no_bin() {
        let axes = vec![Axis::uniform("centrality", 10, 0.0, 100.0).unwrap()];
        let mut sub = track_subevent(axes);
        let vars = vars_with_centrality(150.0);
        sub.initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        sub.add_data(0, 0.3, 1.0).unwrap();
        sub.process(&vars);
        assert_eq!(sub.event_bin(), None);
    }

    #[test]
    fn test_unused_channel_is_dropped_and_out_of_range_rejected() {
        let scheme = ChannelScheme::new(vec![true, false, true, true], None, None).unwrap();
        let mut sub = SubEvent::new(
            "V0A",
            SubEventKind::Channels(scheme),
            harmonic_mask(&[2]),
            Normalization::None,
            Vec::new(),
        );
        sub.add_data(1, 0.5, 2.0).unwrap();
        assert!(sub.bank.is_empty());
        assert!(matches!(
            sub.add_data(4, 0.5, 2.0),
            Err(QnError::InvalidChannelScheme(_))
        ));
        sub.add_data(2, 0.5, 2.0).unwrap();
        assert_eq!(sub.bank.len(), 1);
    }

    #[test]
    fn test_channel_subevent_emits_raw_and_plain() {
        let scheme = ChannelScheme::all_channels(2).unwrap();
        let mut sub = SubEvent::new(
            "V0A",
            SubEventKind::Channels(scheme),
            harmonic_mask(&[2]),
            Normalization::None,
            Vec::new(),
        );
        let vars = VariableManager::new();
        sub.initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        sub.add_data(0, 0.1, 1.0).unwrap();
        sub.add_data(1, 0.7, 2.0).unwrap();
        sub.process(&vars);
        assert_eq!(sub.vectors()[0].tag(), StepTag::Raw);
        assert_eq!(sub.vectors()[1].tag(), StepTag::Plain);
    }

    #[test]
    fn test_qn_chain_updates_current_and_keeps_outputs() {
        let mut sub = track_subevent(Vec::new());
        sub.add_qn_correction(Box::new(Recentering::new()));
        let vars = VariableManager::new();
        sub.initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        sub.add_data(0, 0.4, 1.0).unwrap();
        sub.process(&vars);
        // recentering is calibrating on first pass: chain short-circuits,
        // current stays plain
        assert_eq!(sub.current().tag(), StepTag::Plain);
        assert_eq!(sub.vectors().len(), 1);

        let peers = HashMap::new();
        sub.collect(&peers);
        let (histograms, _) = sub.export();
        assert!(histograms.contains_key("recentering"));
    }

    #[test]
    fn test_second_pass_applies_recentering() {
        let vars = VariableManager::new();
        let mut first = track_subevent(Vec::new());
        first.add_qn_correction(Box::new(Recentering::new()));
        first
            .initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        for _ in 0..4 {
            first.add_data(0, 0.4, 1.0).unwrap();
            first.process(&vars);
            first.collect(&HashMap::new());
            first.clear_event();
        }
        let (histograms, _) = first.export();

        let mut second = track_subevent(Vec::new());
        second.add_qn_correction(Box::new(Recentering::new()));
        second
            .initialize(&PipelineSettings::default(), Some(&histograms), &vars)
            .unwrap();
        second.add_data(0, 0.4, 1.0).unwrap();
        second.process(&vars);
        // the same vector recentered against its own mean vanishes
        assert_eq!(second.current().tag(), StepTag::Recentered);
        assert!(second.current().x(1).abs() < 1e-12);
        assert!(second.current().y(1).abs() < 1e-12);
        assert_eq!(second.vectors().len(), 2);
    }

    #[test]
    fn test_plain2n_uses_detector_normalization() {
        let mut sub = track_subevent(Vec::new());
        let vars = VariableManager::new();
        sub.initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        sub.add_data(0, 0.0, 1.0).unwrap();
        sub.add_data(1, 0.0, 1.0).unwrap();
        sub.process(&vars);
        // the double-harmonic companion is normalized like the main plain
        // vector: (cos 0 + cos 0) / M = 1, not the bare sum 2
        assert_eq!(sub.plain2n.normalization(), Normalization::SumWeights);
        assert!((sub.plain2n.x(1) - 1.0).abs() < 1e-12);
        assert!((sub.plain2n.x(2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_calibrating_input_step_blocks_qn_chain() {
        let scheme = ChannelScheme::all_channels(2).unwrap();
        let mut sub = SubEvent::new(
            "V0A",
            SubEventKind::Channels(scheme),
            harmonic_mask(&[2]),
            Normalization::None,
            Vec::new(),
        );
        sub.add_input_correction(Box::new(GainEqualization::new(
            EqualizationMethod::Average,
        )));
        sub.add_qn_correction(Box::new(Recentering::new()));
        let vars = VariableManager::new();
        sub.initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        for _ in 0..3 {
            sub.add_data(0, 0.1, 1.0).unwrap();
            sub.add_data(1, 0.7, 2.0).unwrap();
            sub.process(&vars);
            // raw only: un-equalized weights never form a plain vector
            assert_eq!(sub.vectors().len(), 1);
            assert_eq!(sub.vectors()[0].tag(), StepTag::Raw);
            assert!(!sub.current().good_quality());
            sub.collect(&HashMap::new());
            sub.clear_event();
        }
        let (histograms, _) = sub.export();
        assert!(histograms.contains_key("gain_equalization"));
        // recentering stayed blind while gain equalization calibrated
        match &histograms["recentering"] {
            crate::store::HistogramPayload::Components(p) => assert_eq!(p.entries(0), 0),
            _ => panic!("wrong payload"),
        }
    }

    #[test]
    fn test_report_short_circuits_after_non_applying_step() {
        let scheme = ChannelScheme::all_channels(2).unwrap();
        let mut sub = SubEvent::new(
            "V0A",
            SubEventKind::Channels(scheme),
            harmonic_mask(&[2]),
            Normalization::None,
            Vec::new(),
        );
        sub.add_input_correction(Box::new(GainEqualization::new(
            EqualizationMethod::Average,
        )));
        sub.add_qn_correction(Box::new(Recentering::new()));
        let vars = VariableManager::new();
        sub.initialize(&PipelineSettings::default(), None, &vars)
            .unwrap();
        let report = sub.report();
        assert_eq!(report.assigned, vec!["gain_equalization", "recentering"]);
        // gain equalization calibrates and does not apply, so recentering
        // never gets asked
        assert_eq!(report.calibrating, vec!["gain_equalization"]);
        assert!(report.applying.is_empty());
    }
}
