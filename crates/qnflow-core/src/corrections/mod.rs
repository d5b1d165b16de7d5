//! Concrete correction steps.
//!
//! One module per correction: gain equalization on the input-data bank,
//! recentering, twist-and-rescale, and alignment on the Qn vector. All four
//! implement the protocols of [`crate::correction`] and are registered on a
//! sub-event at detector configuration time.

pub mod alignment;
pub mod gain_equalization;
pub mod recentering;
pub mod twist_rescale;

pub use alignment::Alignment;
pub use gain_equalization::{EqualizationMethod, GainEqualization};
pub use recentering::Recentering;
pub use twist_rescale::{TwistAndRescale, TwistRescaleMethod};
