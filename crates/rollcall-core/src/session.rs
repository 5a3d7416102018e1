//! Per-run record of which labels already produced an attendance event.

use std::collections::HashSet;

/// At-most-once gate for attendance logging within one session.
///
/// The set only grows; a fresh tracker is created per run.
#[derive(Debug, Default)]
pub struct SessionTracker {
    logged: HashSet<String>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True iff `label` has not been logged in this session.
    pub fn should_log(&self, label: &str) -> bool {
        !self.logged.contains(label)
    }

    /// Idempotently record `label` as logged.
    pub fn mark_logged(&mut self, label: &str) {
        if !self.logged.contains(label) {
            self.logged.insert(label.to_string());
        }
    }

    /// Check, append and mark as one step.
    ///
    /// `append` runs only for a label not yet logged, and the label is marked
    /// only after `append` succeeds, so a failed write leaves the session
    /// untouched. Returns `Ok(None)` for an already-logged label.
    pub fn record_once<T, E, F>(&mut self, label: &str, append: F) -> Result<Option<T>, E>
    where
        F: FnOnce(&str) -> Result<T, E>,
    {
        if !self.should_log(label) {
            return Ok(None);
        }
        let record = append(label)?;
        self.mark_logged(label);
        Ok(Some(record))
    }

    /// Logged labels, sorted.
    pub fn logged_labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = self.logged.iter().map(String::as_str).collect();
        labels.sort_unstable();
        labels
    }
}
