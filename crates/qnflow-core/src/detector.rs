//! Detector descriptor: the user-facing handle around one sub-event.
//!
//! A detector is declared once with its hardware kind, active harmonics,
//! normalization, and event-class axes; correction steps are then attached
//! through [`Detector::configure`]. The correction unit itself is the
//! [`SubEvent`] the detector owns.

use crate::axis::Axis;
use crate::error::Result;
use crate::histogram::channelized::ChannelScheme;
use crate::qvector::{Normalization, QVector, harmonic_mask};
use crate::subevent::{SubEvent, SubEventKind};

/// Hardware kind of a detector.
pub enum DetectorKind {
    /// Tracking detector: per-track azimuthal measurements.
    Track,
    /// Channel detector: a fixed channel array under a scheme.
    Channel(ChannelScheme),
}

/// One declared detector and its correction unit.
pub struct Detector {
    name: String,
    is_track: bool,
    subevent: SubEvent,
}

impl Detector {
    /// Declare a detector. `harmonics` lists the active harmonic numbers.
    pub fn new(
        name: impl Into<String>,
        kind: DetectorKind,
        harmonics: &[usize],
        normalization: Normalization,
        event_axes: Vec<Axis>,
    ) -> Self {
        let name = name.into();
        let (is_track, sub_kind) = match kind {
            DetectorKind::Track => (true, SubEventKind::Tracks),
            DetectorKind::Channel(scheme) => (false, SubEventKind::Channels(scheme)),
        };
        let subevent = SubEvent::new(
            name.clone(),
            sub_kind,
            harmonic_mask(harmonics),
            normalization,
            event_axes,
        );
        Self { name, is_track, subevent }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_track(&self) -> bool {
        self.is_track
    }

    /// Attach correction steps to the detector's sub-event.
    pub fn configure(&mut self, f: impl FnOnce(&mut SubEvent)) {
        f(&mut self.subevent);
    }

    /// Feed one data vector for the current event.
    pub fn add_data(&mut self, id: usize, phi: f64, weight: f64) -> Result<()> {
        self.subevent.add_data(id, phi, weight)
    }

    /// The fully corrected vector of the last processed event.
    pub fn current(&self) -> &QVector {
        self.subevent.current()
    }

    /// Every tagged vector of the last processed event.
    pub fn vectors(&self) -> &[QVector] {
        self.subevent.vectors()
    }

    pub(crate) fn subevent(&self) -> &SubEvent {
        &self.subevent
    }

    pub(crate) fn subevent_mut(&mut self) -> &mut SubEvent {
        &mut self.subevent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corrections::Recentering;

    #[test]
    fn test_configure_attaches_steps() {
        let mut det = Detector::new(
            "TPC",
            DetectorKind::Track,
            &[1, 2],
            Normalization::SumWeights,
            Vec::new(),
        );
        det.configure(|sub| sub.add_qn_correction(Box::new(Recentering::new())));
        let report = det.subevent().report();
        assert_eq!(report.assigned, vec!["recentering"]);
        assert!(det.is_track());
    }

    #[test]
    fn test_channel_detector_kind() {
        let scheme = ChannelScheme::all_channels(8).unwrap();
        let det = Detector::new(
            "V0A",
            DetectorKind::Channel(scheme),
            &[2],
            Normalization::None,
            Vec::new(),
        );
        assert!(!det.is_track());
        assert!(det.subevent().is_channel());
    }
}
