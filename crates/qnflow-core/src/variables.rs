//! Flat per-event variable container.
//!
//! A fixed-size array of `f64` slots, refreshed once per event by the caller
//! before any correction step runs. Event-class axes resolve their variable
//! names to slot ids at configuration time; lookups of unregistered names
//! fail loudly because they always indicate a configuration bug, never a
//! data condition.

use std::collections::HashMap;

use crate::error::{QnError, Result};

/// Default slot count, sized for the largest variable sets seen in practice.
pub const DEFAULT_SLOTS: usize = 11000;

/// Named, fixed-size container of per-event values.
#[derive(Debug, Clone)]
pub struct VariableManager {
    values: Vec<f64>,
    names: HashMap<String, usize>,
}

impl VariableManager {
    pub fn new() -> Self {
        Self::with_slots(DEFAULT_SLOTS)
    }

    pub fn with_slots(slots: usize) -> Self {
        Self {
            values: vec![0.0; slots],
            names: HashMap::new(),
        }
    }

    pub fn slots(&self) -> usize {
        self.values.len()
    }

    /// Register `name` at slot `id`.
    ///
    /// Both the name and the slot must be unused.
    pub fn register(&mut self, name: impl Into<String>, id: usize) -> Result<()> {
        let name = name.into();
        if id >= self.values.len() {
            return Err(QnError::VariableOutOfRange {
                name,
                id,
                slots: self.values.len(),
            });
        }
        if self.names.contains_key(&name) || self.names.values().any(|&v| v == id) {
            return Err(QnError::VariableConflict { name, id });
        }
        self.names.insert(name, id);
        Ok(())
    }

    /// Slot id for a registered name.
    pub fn id(&self, name: &str) -> Result<usize> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| QnError::UnknownVariable(name.to_string()))
    }

    /// Current value at slot `id`.
    pub fn get(&self, id: usize) -> f64 {
        self.values[id]
    }

    /// Set the value at slot `id` for the current event.
    pub fn set(&mut self, id: usize, value: f64) {
        self.values[id] = value;
    }

    /// Zero every slot. Called at event boundaries by the manager.
    pub fn reset(&mut self) {
        self.values.fill(0.0);
    }
}

impl Default for VariableManager {
    fn default() -> Self {
        Self::new()
    }
}
