//! Per-run element bookkeeping

use std::collections::{HashMap, HashSet};

/// Consecutive failures per selector, with a circuit-breaker threshold
#[derive(Debug, Clone)]
pub struct ElementFailureTracker {
    counts: HashMap<String, u32>,
    threshold: u32,
}

impl ElementFailureTracker {
    pub fn new(threshold: u32) -> Self {
        Self {
            counts: HashMap::new(),
            threshold,
        }
    }

    pub fn record_failure(&mut self, selector: &str) -> u32 {
        let count = self.counts.entry(selector.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn record_success(&mut self, selector: &str) {
        self.counts.remove(selector);
    }

    pub fn failures(&self, selector: &str) -> u32 {
        self.counts.get(selector).copied().unwrap_or(0)
    }

    /// The selector reached the threshold and must not be run again
    pub fn is_tripped(&self, selector: &str) -> bool {
        self.failures(selector) >= self.threshold
    }
}

/// Elements already exercised successfully in this run
#[derive(Debug, Clone, Default)]
pub struct TestedElementSet {
    keys: HashSet<String>,
}

impl TestedElementSet {
    pub fn insert(&mut self, key: String) -> bool {
        self.keys.insert(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
