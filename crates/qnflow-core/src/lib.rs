//! # qnflow-core
//!
//! **Event-by-event Qn-vector corrections for heavy-ion flow analyses.**
//!
//! `qnflow-core` corrects flow-vector measurements for non-uniform detector
//! acceptance. Each detector runs an ordered chain of stateful correction
//! steps — gain equalization, recentering, twist-and-rescale, alignment —
//! that alternate between a *calibration* phase (accumulating statistics
//! binned by event class) and an *application* phase (transforming the raw
//! per-event vector with previously calibrated parameters) across successive
//! passes over the same data.
//!
//! ## Quick Start
//!
//! ```no_run
//! use qnflow_core::{
//!     Axis, CorrectionManager, Detector, DetectorKind, Normalization, Recentering,
//! };
//!
//! # fn main() -> qnflow_core::Result<()> {
//! let mut manager = CorrectionManager::new();
//! manager.variables_mut().register("centrality", 0)?;
//!
//! let mut tpc = Detector::new(
//!     "TPC",
//!     DetectorKind::Track,
//!     &[1, 2],
//!     Normalization::SumWeights,
//!     vec![Axis::uniform("centrality", 10, 0.0, 100.0)?],
//! );
//! tpc.configure(|sub| sub.add_qn_correction(Box::new(Recentering::new())));
//! manager.add_detector(tpc)?;
//!
//! manager.set_current_run("run1");
//! manager.initialize()?;
//!
//! // per event: refresh variables, feed data, process, clear
//! manager.variables_mut().set(0, 35.0);
//! manager.detector_mut("TPC")?.add_data(0, 0.7, 1.0)?;
//! manager.process_event()?;
//! let q = manager.detector("TPC")?.current();
//! println!("Q2 = ({}, {})", q.x(2), q.y(2));
//! manager.clear_event();
//!
//! manager.finalize()?;
//! manager.save_calibration("calib.json")?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! Data bank → input-data corrections → plain Qn vector → Qn-vector
//! corrections → tagged vector list
//!
//! Steps without an attached calibration histogram collect statistics;
//! steps with one apply it (and keep collecting when re-calibration is on).
//! [`CorrectionManager::finalize`] moves the collected histograms into the
//! [`CalibrationStore`], which is the next pass's input. Stores from
//! independent passes over disjoint event subsets merge bin-wise.

pub mod axis;
pub mod correction;
pub mod corrections;
pub mod detector;
pub mod error;
pub mod histogram;
pub mod manager;
pub mod qvector;
pub mod store;
pub mod subevent;
pub mod variables;

pub use axis::Axis;
pub use correction::{InputCorrection, QnCorrection, State, SubEventReport};
pub use corrections::{
    Alignment, EqualizationMethod, GainEqualization, Recentering, TwistAndRescale,
    TwistRescaleMethod,
};
pub use detector::{Detector, DetectorKind};
pub use error::{QnError, Result};
pub use histogram::ErrorMode;
pub use histogram::channelized::ChannelScheme;
pub use manager::CorrectionManager;
pub use qvector::{DataVector, Normalization, QVector, StepTag};
pub use store::CalibrationStore;
pub use subevent::{PipelineSettings, SubEvent, SubEventKind};
pub use variables::VariableManager;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
