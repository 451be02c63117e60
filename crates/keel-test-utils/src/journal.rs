// SPDX-FileCopyrightText: 2026 Keel Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ordered record of what happened, shared by every mock in a test.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    /// Entries that end with `suffix`, e.g. every `.activate` step.
    pub fn matching(&self, suffix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|entry| entry.ends_with(suffix))
            .collect()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.as_str() == entry)
            .count()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}
