use std::collections::HashMap;

use crate::types::Rect;

/// Key of the numeric bias added to every Match score.
pub const VIABILITY_ADJUSTMENT: &str = "viability_adjustment";

#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Region(Rect),
    Number(f64),
    Text(String),
}

/// Mutable key/value map threaded through one chain execution. Conditions
/// publish located regions here; the caller owns it and may seed values such
/// as the viability adjustment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    values: HashMap<String, StateValue>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: StateValue) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<StateValue> {
        self.values.remove(key)
    }

    pub fn region(&self, key: &str) -> Option<Rect> {
        match self.values.get(key) {
            Some(StateValue::Region(r)) => Some(*r),
            _ => None,
        }
    }

    pub fn set_region(&mut self, key: impl Into<String>, rect: Rect) {
        self.set(key, StateValue::Region(rect));
    }

    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(StateValue::Number(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn viability_adjustment(&self) -> f64 {
        self.number(VIABILITY_ADJUSTMENT).unwrap_or(0.0)
    }

    pub fn set_viability_adjustment(&mut self, bias: f64) {
        self.set(VIABILITY_ADJUSTMENT, StateValue::Number(bias));
    }
}
