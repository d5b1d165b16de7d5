//! Error types for configuration and calibration-file handling.
//!
//! Per-event conditions (unvalidated calibration bin, bad-quality vector,
//! unstable twist parameter) are never errors — they are normal control flow
//! handled inside the correction steps. Everything in [`QnError`] indicates a
//! configuration bug or an I/O problem and is raised before or at run
//! boundaries, never mid-event.

use std::fmt;

/// Convenience result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, QnError>;

/// Errors raised during configuration, run setup, and calibration-file I/O.
#[derive(Debug)]
pub enum QnError {
    /// A variable name was looked up that was never registered.
    UnknownVariable(String),
    /// A variable was registered twice, or its slot is already taken.
    VariableConflict { name: String, id: usize },
    /// A variable id falls outside the container's slot range.
    VariableOutOfRange { name: String, id: usize, slots: usize },
    /// A detector name was looked up that was never added.
    UnknownDetector(String),
    /// Two detectors were added under the same name.
    DuplicateDetector(String),
    /// A correction step names a reference detector that does not exist.
    UnknownReference { step: &'static str, reference: String },
    /// A correction step requires a tracking-type reference detector.
    NotTrackDetector { step: &'static str, reference: String },
    /// A correction step was configured against the detector's harmonic set.
    HarmonicNotActive { step: &'static str, harmonic: usize },
    /// A channel scheme is inconsistent (array lengths, empty used mask, ...).
    InvalidChannelScheme(String),
    /// An event-class axis has fewer than two bin edges or unordered edges.
    InvalidAxis(String),
    /// An operation valid only for channel detectors hit a track detector.
    NotChannelDetector(String),
    /// Event processing was requested before `initialize` ran.
    NotInitialized,
    /// No run name was set before a run-scoped operation.
    NoCurrentRun,
    /// Merging histograms or stores with incompatible shapes.
    ShapeMismatch(String),
    /// Calibration-file I/O failure.
    Io(std::io::Error),
    /// Calibration-file encode/decode failure.
    Format(serde_json::Error),
}

impl fmt::Display for QnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownVariable(name) => write!(f, "unknown variable '{name}'"),
            Self::VariableConflict { name, id } => {
                write!(f, "variable '{name}' conflicts with an existing entry at slot {id}")
            }
            Self::VariableOutOfRange { name, id, slots } => {
                write!(f, "variable '{name}' id {id} outside container of {slots} slots")
            }
            Self::UnknownDetector(name) => write!(f, "unknown detector '{name}'"),
            Self::DuplicateDetector(name) => write!(f, "detector '{name}' already added"),
            Self::UnknownReference { step, reference } => {
                write!(f, "{step}: reference detector '{reference}' does not exist")
            }
            Self::NotTrackDetector { step, reference } => {
                write!(f, "{step}: reference detector '{reference}' is not a tracking detector")
            }
            Self::HarmonicNotActive { step, harmonic } => {
                write!(f, "{step}: harmonic {harmonic} is not in the detector's harmonic set")
            }
            Self::InvalidChannelScheme(msg) => write!(f, "invalid channel scheme: {msg}"),
            Self::InvalidAxis(msg) => write!(f, "invalid axis: {msg}"),
            Self::NotChannelDetector(name) => {
                write!(f, "detector '{name}' is not a channel detector")
            }
            Self::NotInitialized => write!(f, "manager not initialized for the current run"),
            Self::NoCurrentRun => write!(f, "no current run name set"),
            Self::ShapeMismatch(msg) => write!(f, "histogram shape mismatch: {msg}"),
            Self::Io(e) => write!(f, "calibration file i/o error: {e}"),
            Self::Format(e) => write!(f, "calibration file format error: {e}"),
        }
    }
}

impl std::error::Error for QnError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Format(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for QnError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for QnError {
    fn from(e: serde_json::Error) -> Self {
        Self::Format(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_unknown_variable() {
        let e = QnError::UnknownVariable("centrality".to_string());
        assert_eq!(e.to_string(), "unknown variable 'centrality'");
    }

    #[test]
    fn test_display_reference_errors() {
        let e = QnError::UnknownReference {
            step: "twist_rescale",
            reference: "V0C".to_string(),
        };
        assert!(e.to_string().contains("twist_rescale"));
        assert!(e.to_string().contains("V0C"));
    }

    #[test]
    fn test_io_error_source() {
        use std::error::Error;
        let e = QnError::from(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(e.source().is_some());
    }
}
