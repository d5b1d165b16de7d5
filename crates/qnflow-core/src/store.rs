//! Calibration file: run-keyed histogram persistence.
//!
//! The store is a hierarchical collection keyed run name → sub-event name →
//! step name → histogram payload. At run initialization the manager hands
//! each step its payload from the *input* side (a previous pass over the same
//! run), which flips the step out of its calibration state; at finalize the
//! freshly filled calibration histograms are inserted under the current run
//! name, producing the next pass's input.
//!
//! Stores from independent passes over disjoint event subsets merge bin-wise
//! additively, matching the distributed-calibration model.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{QnError, Result};
use crate::histogram::SparseHist;
use crate::histogram::channelized::ChannelProfile;
use crate::histogram::components::ComponentsProfile;
use crate::histogram::correlation::{CorrelationProfile, ThreeDetectorProfile};

/// One step's persisted histogram set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HistogramPayload {
    /// Per-harmonic X/Y profile (recentering, double-harmonic twist).
    Components(ComponentsProfile),
    /// Channelized profile plus optional per-group profile (gain equalization).
    Channel {
        channels: ChannelProfile,
        groups: Option<ChannelProfile>,
    },
    /// Two-detector component products (alignment).
    Correlation(CorrelationProfile),
    /// Three-detector pairwise products (correlation twist method).
    ThreeDetector(ThreeDetectorProfile),
}

impl HistogramPayload {
    /// Bin-wise additive merge. Variants and shapes must match.
    pub fn merge(&mut self, other: &HistogramPayload) -> Result<()> {
        match (self, other) {
            (Self::Components(a), Self::Components(b)) => a.merge(b),
            (
                Self::Channel { channels: a, groups: ga },
                Self::Channel { channels: b, groups: gb },
            ) => {
                a.merge(b)?;
                match (ga, gb) {
                    (Some(ga), Some(gb)) => ga.merge(gb),
                    (None, None) => Ok(()),
                    _ => Err(QnError::ShapeMismatch(
                        "group profile present on one side only".to_string(),
                    )),
                }
            }
            (Self::Correlation(a), Self::Correlation(b)) => a.merge(b),
            (Self::ThreeDetector(a), Self::ThreeDetector(b)) => a.merge(b),
            _ => Err(QnError::ShapeMismatch("payload variants differ".to_string())),
        }
    }
}

/// Step name → payload for one sub-event.
pub type StepHistograms = HashMap<String, HistogramPayload>;

/// Sub-event name → step histograms for one run.
pub type RunHistograms = HashMap<String, StepHistograms>;

/// QA side-band persisted next to the calibration histograms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QaPayload {
    /// Not-validated tallies keyed sub-event name → step name.
    pub not_validated: HashMap<String, HashMap<String, SparseHist>>,
}

/// Run-keyed calibration histogram collection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CalibrationStore {
    runs: HashMap<String, RunHistograms>,
    #[serde(default)]
    qa: HashMap<String, QaPayload>,
}

impl CalibrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Run names present in the store, unordered.
    pub fn run_names(&self) -> impl Iterator<Item = &str> {
        self.runs.keys().map(String::as_str)
    }

    /// Histograms of one run, if any pass produced them.
    pub fn run(&self, run: &str) -> Option<&RunHistograms> {
        self.runs.get(run)
    }

    /// Payload of one step, if present.
    pub fn payload(&self, run: &str, subevent: &str, step: &str) -> Option<&HistogramPayload> {
        self.runs.get(run)?.get(subevent)?.get(step)
    }

    /// Insert one step's payload, merging bin-wise if it already exists.
    pub fn insert(
        &mut self,
        run: &str,
        subevent: &str,
        step: &str,
        payload: HistogramPayload,
    ) -> Result<()> {
        let steps = self
            .runs
            .entry(run.to_string())
            .or_default()
            .entry(subevent.to_string())
            .or_default();
        match steps.get_mut(step) {
            Some(existing) => existing.merge(&payload),
            None => {
                steps.insert(step.to_string(), payload);
                Ok(())
            }
        }
    }

    /// Attach a step's QA tallies under the run.
    pub fn insert_qa(&mut self, run: &str, subevent: &str, step: &str, hist: SparseHist) {
        self.qa
            .entry(run.to_string())
            .or_default()
            .not_validated
            .entry(subevent.to_string())
            .or_default()
            .insert(step.to_string(), hist);
    }

    pub fn qa(&self, run: &str) -> Option<&QaPayload> {
        self.qa.get(run)
    }

    /// Merge another store built over a disjoint event subset.
    pub fn merge(&mut self, other: &CalibrationStore) -> Result<()> {
        for (run, subevents) in &other.runs {
            for (subevent, steps) in subevents {
                for (step, payload) in steps {
                    self.insert(run, subevent, step, payload.clone())?;
                }
            }
        }
        for (run, qa) in &other.qa {
            for (subevent, steps) in &qa.not_validated {
                for (step, hist) in steps {
                    let slot = self
                        .qa
                        .entry(run.clone())
                        .or_default()
                        .not_validated
                        .entry(subevent.clone())
                        .or_default();
                    match slot.get_mut(step) {
                        Some(existing) => existing.merge(hist)?,
                        None => {
                            slot.insert(step.clone(), hist.clone());
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Load a store from a JSON calibration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let store: CalibrationStore = serde_json::from_reader(BufReader::new(file))?;
        info!(
            "loaded calibration file {} with {} run(s)",
            path.as_ref().display(),
            store.runs.len()
        );
        Ok(store)
    }

    /// Persist the store as a JSON calibration file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path.as_ref())?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        info!(
            "saved calibration file {} with {} run(s)",
            path.as_ref().display(),
            self.runs.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::histogram::ErrorMode;
    use crate::qvector::{Normalization, QVector, StepTag, harmonic_mask};

    fn components_payload(fill: f64) -> HistogramPayload {
        let mask = harmonic_mask(&[1]);
        let mut p = ComponentsProfile::new(mask, 1, 2, ErrorMode::Mean);
        let mut q = QVector::new(mask, Normalization::None, StepTag::Plain);
        q.set(1, fill, -fill);
        p.fill(0, &q);
        HistogramPayload::Components(p)
    }

    #[test]
    fn test_insert_and_lookup() {
        let mut store = CalibrationStore::new();
        store
            .insert("run1", "TPC", "recentering", components_payload(1.0))
            .unwrap();
        assert!(store.payload("run1", "TPC", "recentering").is_some());
        assert!(store.payload("run1", "TPC", "alignment").is_none());
        assert!(store.payload("run2", "TPC", "recentering").is_none());
    }

    #[test]
    fn test_insert_merges_existing_payload() {
        let mut store = CalibrationStore::new();
        store
            .insert("run1", "TPC", "recentering", components_payload(2.0))
            .unwrap();
        store
            .insert("run1", "TPC", "recentering", components_payload(4.0))
            .unwrap();
        match store.payload("run1", "TPC", "recentering").unwrap() {
            HistogramPayload::Components(p) => {
                assert_eq!(p.entries(0), 2);
                assert_eq!(p.x_mean(1, 0), 3.0);
            }
            _ => panic!("wrong payload variant"),
        }
    }

    #[test]
    fn test_merge_variant_mismatch_fails() {
        let mut a = components_payload(1.0);
        let b = HistogramPayload::Correlation(CorrelationProfile::new(1, 2, ErrorMode::Mean));
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn test_store_merge_additive() {
        let mut a = CalibrationStore::new();
        let mut b = CalibrationStore::new();
        a.insert("run1", "TPC", "recentering", components_payload(2.0))
            .unwrap();
        b.insert("run1", "TPC", "recentering", components_payload(4.0))
            .unwrap();
        b.insert("run1", "V0A", "gain_equalization", components_payload(1.0))
            .unwrap();
        a.merge(&b).unwrap();
        match a.payload("run1", "TPC", "recentering").unwrap() {
            HistogramPayload::Components(p) => assert_eq!(p.entries(0), 2),
            _ => panic!("wrong payload variant"),
        }
        assert!(a.payload("run1", "V0A", "gain_equalization").is_some());
    }

    #[test]
    fn test_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.json");
        let mut store = CalibrationStore::new();
        store
            .insert("run1", "TPC", "recentering", components_payload(1.5))
            .unwrap();
        let mut qa = SparseHist::new(10);
        qa.fill(3);
        store.insert_qa("run1", "TPC", "recentering", qa);
        store.save(&path).unwrap();

        let back = CalibrationStore::load(&path).unwrap();
        assert_eq!(
            back.payload("run1", "TPC", "recentering"),
            store.payload("run1", "TPC", "recentering")
        );
        assert_eq!(back.qa("run1").unwrap().not_validated["TPC"]["recentering"].count(3), 1);
    }
}
