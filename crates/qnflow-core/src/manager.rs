//! Run lifecycle and event driving for the whole detector set.
//!
//! The manager owns the variable container, every declared detector, and the
//! calibration store. A run goes: `set_current_run`, `initialize` (reference
//! validation, input-histogram attach, cross-step precondition pass), then
//! per event `variables_mut` refresh + `add_data` + `process_event` +
//! `clear_event`, and finally `finalize` to move this run's freshly filled
//! calibration histograms into the store.
//!
//! `process_event` runs two passes. The correction pass processes every
//! sub-event to completion; a snapshot of every detector's finished current
//! vector is then handed to the collection pass, so steps correlating
//! against other detectors read fully corrected peers.

use std::collections::HashMap;
use std::path::Path;

use log::{debug, info};

use crate::correction::{AttachEnv, SubEventReport};
use crate::detector::Detector;
use crate::error::{QnError, Result};
use crate::qvector::QVector;
use crate::store::CalibrationStore;
use crate::subevent::PipelineSettings;
use crate::variables::VariableManager;

/// Owner of the detector set, the variable container, and the run state.
pub struct CorrectionManager {
    variables: VariableManager,
    detectors: Vec<Detector>,
    index: HashMap<String, usize>,
    settings: PipelineSettings,
    store: CalibrationStore,
    current_run: Option<String>,
    initialized: bool,
}

impl Default for CorrectionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CorrectionManager {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings::default())
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        Self {
            variables: VariableManager::new(),
            detectors: Vec::new(),
            index: HashMap::new(),
            settings,
            store: CalibrationStore::new(),
            current_run: None,
            initialized: false,
        }
    }

    pub fn variables(&self) -> &VariableManager {
        &self.variables
    }

    /// The per-event value container; refresh it before `process_event`.
    pub fn variables_mut(&mut self) -> &mut VariableManager {
        &mut self.variables
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn add_detector(&mut self, detector: Detector) -> Result<()> {
        if self.index.contains_key(detector.name()) {
            return Err(QnError::DuplicateDetector(detector.name().to_string()));
        }
        self.index
            .insert(detector.name().to_string(), self.detectors.len());
        self.detectors.push(detector);
        Ok(())
    }

    pub fn detector(&self, name: &str) -> Result<&Detector> {
        self.index
            .get(name)
            .map(|&i| &self.detectors[i])
            .ok_or_else(|| QnError::UnknownDetector(name.to_string()))
    }

    pub fn detector_mut(&mut self, name: &str) -> Result<&mut Detector> {
        match self.index.get(name) {
            Some(&i) => Ok(&mut self.detectors[i]),
            None => Err(QnError::UnknownDetector(name.to_string())),
        }
    }

    /// Replace the input calibration store (previous passes' output).
    pub fn set_calibration_store(&mut self, store: CalibrationStore) {
        self.store = store;
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Hand the store over, e.g. for persisting after `finalize`.
    pub fn into_store(self) -> CalibrationStore {
        self.store
    }

    pub fn load_calibration(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.store = CalibrationStore::load(path)?;
        Ok(())
    }

    pub fn save_calibration(&self, path: impl AsRef<Path>) -> Result<()> {
        self.store.save(path)
    }

    /// Set the run whose calibration histograms attach at `initialize` and
    /// receive this pass's statistics at `finalize`.
    pub fn set_current_run(&mut self, run: impl Into<String>) {
        self.current_run = Some(run.into());
        self.initialized = false;
    }

    pub fn current_run(&self) -> Option<&str> {
        self.current_run.as_deref()
    }

    /// Run-boundary setup: validate step references, attach each step's
    /// input histograms from the store, then run the cross-step
    /// precondition pass over the attached states.
    pub fn initialize(&mut self) -> Result<()> {
        let run = self
            .current_run
            .clone()
            .ok_or(QnError::NoCurrentRun)?;

        for detector in &self.detectors {
            for (step, reference) in detector.subevent().references() {
                let target = self.index.get(&reference.name).map(|&i| &self.detectors[i]);
                match target {
                    None => {
                        return Err(QnError::UnknownReference { step, reference: reference.name });
                    }
                    Some(t) if reference.must_be_track && !t.is_track() => {
                        return Err(QnError::NotTrackDetector { step, reference: reference.name });
                    }
                    Some(_) => {}
                }
            }
        }

        let run_histograms = self.store.run(&run).cloned();
        for detector in &mut self.detectors {
            let input = run_histograms
                .as_ref()
                .and_then(|r| r.get(detector.name()));
            detector
                .subevent_mut()
                .initialize(&self.settings, input, &self.variables)?;
        }

        let twist_applying: HashMap<String, bool> = self
            .detectors
            .iter()
            .map(|d| (d.name().to_string(), d.subevent().is_twist_applying()))
            .collect();
        let env = AttachEnv::new(twist_applying);
        for detector in &mut self.detectors {
            detector.subevent_mut().after_attach(&env);
        }

        self.initialized = true;
        info!(
            "run '{run}' initialized with {} detector(s)",
            self.detectors.len()
        );
        Ok(())
    }

    /// Correction pass over every sub-event, then the collection pass over a
    /// snapshot of the finished current vectors.
    pub fn process_event(&mut self) -> Result<()> {
        if !self.initialized {
            return Err(QnError::NotInitialized);
        }
        for detector in &mut self.detectors {
            detector.subevent_mut().process(&self.variables);
        }
        let snapshot: HashMap<String, QVector> = self
            .detectors
            .iter()
            .map(|d| (d.name().to_string(), d.current().clone()))
            .collect();
        for detector in &mut self.detectors {
            detector.subevent_mut().collect(&snapshot);
        }
        Ok(())
    }

    /// Reset per-event state across detectors and the variable container.
    pub fn clear_event(&mut self) {
        for detector in &mut self.detectors {
            detector.subevent_mut().clear_event();
        }
        self.variables.reset();
    }

    /// Per-sub-event usage reports, in detector declaration order.
    pub fn report(&self) -> Vec<SubEventReport> {
        self.detectors
            .iter()
            .map(|d| d.subevent().report())
            .collect()
    }

    /// Move this run's freshly filled calibration histograms and QA tallies
    /// into the store, merging with whatever a parallel pass left there.
    pub fn finalize(&mut self) -> Result<()> {
        let run = self
            .current_run
            .clone()
            .ok_or(QnError::NoCurrentRun)?;
        for detector in &mut self.detectors {
            let name = detector.name().to_string();
            let (histograms, qa) = detector.subevent_mut().export();
            debug!(
                "run '{run}': detector '{name}' exported {} histogram(s)",
                histograms.len()
            );
            for (step, payload) in histograms {
                self.store.insert(&run, &name, &step, payload)?;
            }
            for (step, hist) in qa {
                self.store.insert_qa(&run, &name, &step, hist);
            }
        }
        self.initialized = false;
        Ok(())
    }
}
