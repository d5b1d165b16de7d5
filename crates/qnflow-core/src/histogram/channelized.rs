//! Channelized profile and channel scheme for channel detectors.
//!
//! A channel detector (VZERO, ZDC, FMD style) delivers one weight per fired
//! channel. The [`ChannelScheme`] describes the channel array once at
//! configuration time: which channel ids are in use, an optional group id per
//! channel, and optional hard-coded per-channel group weights. Unused channel
//! ids are compacted away: histograms allocate one slot per *used* channel,
//! and the scheme maps channel id to slot.
//!
//! [`ChannelProfile`] appends the (compacted) channel axis after the
//! event-class axes of a [`Profile`]; the same type with group-count slots
//! serves as the per-group calibration profile.

use serde::{Deserialize, Serialize};

use crate::error::{QnError, Result};
use crate::histogram::{ErrorMode, Profile};

/// Static channel array description for one channel detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelScheme {
    n_channels: usize,
    used: Vec<bool>,
    groups: Option<Vec<usize>>,
    hard_weights: Option<Vec<f64>>,
    // derived at construction
    slot_of: Vec<Option<usize>>,
    n_used: usize,
    n_groups: usize,
}

impl ChannelScheme {
    /// Scheme with every channel id in `0..n_channels` used, no groups.
    pub fn all_channels(n_channels: usize) -> Result<Self> {
        Self::build(n_channels, vec![true; n_channels], None, None)
    }

    /// Scheme with an explicit used mask and optional group/weight arrays.
    ///
    /// `groups[c]` is the group id of channel `c`; `hard_weights[c]` a fixed
    /// per-channel group weight. Both arrays, when present, must cover every
    /// channel id. Hard-coded weights and calibrated group weights are
    /// mutually exclusive at the correction-step level, not here.
    pub fn new(
        used: Vec<bool>,
        groups: Option<Vec<usize>>,
        hard_weights: Option<Vec<f64>>,
    ) -> Result<Self> {
        let n = used.len();
        Self::build(n, used, groups, hard_weights)
    }

    fn build(
        n_channels: usize,
        used: Vec<bool>,
        groups: Option<Vec<usize>>,
        hard_weights: Option<Vec<f64>>,
    ) -> Result<Self> {
        if n_channels == 0 {
            return Err(QnError::InvalidChannelScheme("no channels".to_string()));
        }
        if !used.iter().any(|&u| u) {
            return Err(QnError::InvalidChannelScheme("no channel marked used".to_string()));
        }
        if let Some(g) = &groups {
            if g.len() != n_channels {
                return Err(QnError::InvalidChannelScheme(format!(
                    "group array covers {} of {} channels",
                    g.len(),
                    n_channels
                )));
            }
        }
        if let Some(w) = &hard_weights {
            if w.len() != n_channels {
                return Err(QnError::InvalidChannelScheme(format!(
                    "weight array covers {} of {} channels",
                    w.len(),
                    n_channels
                )));
            }
        }

        let mut slot_of = vec![None; n_channels];
        let mut n_used = 0;
        for (c, &u) in used.iter().enumerate() {
            if u {
                slot_of[c] = Some(n_used);
                n_used += 1;
            }
        }
        let n_groups = match &groups {
            Some(g) => {
                g.iter()
                    .zip(&used)
                    .filter(|&(_, &u)| u)
                    .map(|(&id, _)| id)
                    .max()
                    .unwrap_or(0)
                    + 1
            }
            None => 0,
        };

        Ok(Self {
            n_channels,
            used,
            groups,
            hard_weights,
            slot_of,
            n_used,
            n_groups,
        })
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    /// Number of used channels, the channel-axis length of histograms.
    pub fn n_used(&self) -> usize {
        self.n_used
    }

    /// Number of groups. Zero when no group array is configured.
    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    pub fn has_groups(&self) -> bool {
        self.groups.is_some()
    }

    pub fn is_used(&self, channel: usize) -> bool {
        self.used.get(channel).copied().unwrap_or(false)
    }

    /// Dense histogram slot of a channel id, `None` for unused/out-of-range.
    pub fn slot(&self, channel: usize) -> Option<usize> {
        self.slot_of.get(channel).copied().flatten()
    }

    /// Group id of a channel, `None` without a group array.
    pub fn group(&self, channel: usize) -> Option<usize> {
        self.groups.as_ref().map(|g| g[channel])
    }

    /// Hard-coded group weight of a channel; 1.0 when not configured.
    pub fn hard_weight(&self, channel: usize) -> f64 {
        self.hard_weights.as_ref().map_or(1.0, |w| w[channel])
    }

    pub fn has_hard_weights(&self) -> bool {
        self.hard_weights.is_some()
    }
}

/// Profile over event-class bins × a compacted channel (or group) axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelProfile {
    event_bins: usize,
    slots: usize,
    inner: Profile,
}

impl ChannelProfile {
    pub fn new(event_bins: usize, slots: usize, min_entries: u32, error_mode: ErrorMode) -> Self {
        Self {
            event_bins,
            slots,
            inner: Profile::new(event_bins * slots, min_entries, error_mode),
        }
    }

    pub fn event_bins(&self) -> usize {
        self.event_bins
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Linear bin with the channel axis appended after the event-class axes.
    pub fn bin(&self, event_bin: usize, slot: usize) -> usize {
        debug_assert!(event_bin < self.event_bins && slot < self.slots);
        event_bin * self.slots + slot
    }

    pub fn fill(&mut self, event_bin: usize, slot: usize, value: f64) {
        self.inner.fill(self.bin(event_bin, slot), value);
    }

    pub fn validated(&self, event_bin: usize, slot: usize) -> bool {
        self.inner.validated(self.bin(event_bin, slot))
    }

    pub fn mean(&self, event_bin: usize, slot: usize) -> f64 {
        self.inner.mean(self.bin(event_bin, slot))
    }

    pub fn error(&self, event_bin: usize, slot: usize) -> f64 {
        self.inner.error(self.bin(event_bin, slot))
    }

    /// Spread (sigma), the width used by the WIDTH equalization method.
    pub fn spread(&self, event_bin: usize, slot: usize) -> f64 {
        self.inner.spread(self.bin(event_bin, slot))
    }

    pub fn entries(&self, event_bin: usize, slot: usize) -> u32 {
        self.inner.entries(self.bin(event_bin, slot))
    }

    pub fn merge(&mut self, other: &ChannelProfile) -> Result<()> {
        if other.event_bins != self.event_bins || other.slots != self.slots {
            return Err(QnError::ShapeMismatch(format!(
                "channel profile {}x{} vs {}x{}",
                self.event_bins, self.slots, other.event_bins, other.slots
            )));
        }
        self.inner.merge(&other.inner)
    }
}
