//! Sparse tally container: any never-written key reads as zero.
//!
//! Counter keys are not a fixed schema; accumulators discover them at runtime
//! (a bug type, a testing tag, `"unknown"`). Keeping the map explicit also
//! makes the observed key set enumerable, which regrouping relies on.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct SparseCounter {
    counts: HashMap<String, f64>,
}

impl SparseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a key; absent keys are 0, never an error.
    pub fn get(&self, key: &str) -> f64 {
        self.counts.get(key).copied().unwrap_or(0.0)
    }

    /// Add to a key, creating it on first write.
    pub fn add(&mut self, key: &str, amount: f64) {
        if let Some(slot) = self.counts.get_mut(key) {
            *slot += amount;
        } else {
            self.counts.insert(key.to_string(), amount);
        }
    }

    /// Increment a key by one.
    pub fn incr(&mut self, key: &str) {
        self.add(key, 1.0);
    }

    /// Keys that have been written at least once.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
