//! Per-job progress bookkeeping.
//!
//! Counters only move in response to lifecycle events; the tracker never
//! looks at item state itself.

use gradebatch_core::GraderId;
use std::collections::BTreeMap;

/// Counters for one grader within one job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GraderProgress {
    /// Dispatches to this grader.
    pub assigned_count: usize,
    pub completed_count: usize,
    /// Attempts that ended in an error or timeout.
    pub failed_count: usize,
    /// Items taken back without an outcome (optimize, cancel, fatal error).
    pub released_count: usize,
}

impl GraderProgress {
    pub fn pending_count(&self) -> usize {
        self.assigned_count
            .saturating_sub(self.completed_count + self.failed_count + self.released_count)
    }

    pub fn completion_rate(&self) -> f64 {
        ratio(self.completed_count, self.assigned_count)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    total_items: usize,
    done_count: usize,
    failed_count: usize,
    graders: BTreeMap<GraderId, GraderProgress>,
}

impl ProgressTracker {
    pub fn new(total_items: usize) -> Self {
        Self {
            total_items,
            ..Default::default()
        }
    }

    pub fn on_assigned(&mut self, grader: &GraderId) {
        self.grader_mut(grader).assigned_count += 1;
    }

    pub fn on_released(&mut self, grader: &GraderId) {
        self.grader_mut(grader).released_count += 1;
    }

    pub fn on_done(&mut self, grader: &GraderId) {
        self.grader_mut(grader).completed_count += 1;
        self.done_count += 1;
    }

    /// A grader's attempt on an item failed. The item may still be retried.
    pub fn on_attempt_failed(&mut self, grader: &GraderId) {
        self.grader_mut(grader).failed_count += 1;
    }

    /// An item reached the terminal Failed state.
    pub fn on_item_failed(&mut self) {
        self.failed_count += 1;
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn done_count(&self) -> usize {
        self.done_count
    }

    pub fn failed_count(&self) -> usize {
        self.failed_count
    }

    /// `done / total`, defined as 0 for an empty job.
    pub fn completion_rate(&self) -> f64 {
        ratio(self.done_count, self.total_items)
    }

    pub fn graders(&self) -> impl Iterator<Item = (&GraderId, &GraderProgress)> {
        self.graders.iter()
    }

    pub fn grader(&self, grader: &GraderId) -> Option<&GraderProgress> {
        self.graders.get(grader)
    }

    fn grader_mut(&mut self, grader: &GraderId) -> &mut GraderProgress {
        self.graders.entry(grader.clone()).or_default()
    }
}

fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_rate_zero_for_empty_job() {
        let tracker = ProgressTracker::new(0);
        assert_eq!(tracker.completion_rate(), 0.0);
        assert!(!tracker.completion_rate().is_nan());
    }

    #[test]
    fn test_grader_pending_count() {
        let mut tracker = ProgressTracker::new(4);
        let g = GraderId::from("g-1");

        tracker.on_assigned(&g);
        tracker.on_assigned(&g);
        tracker.on_assigned(&g);
        tracker.on_done(&g);
        tracker.on_attempt_failed(&g);

        let progress = tracker.grader(&g).unwrap();
        assert_eq!(progress.assigned_count, 3);
        assert_eq!(progress.pending_count(), 1);
        assert!((progress.completion_rate() - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(tracker.done_count(), 1);
        assert_eq!(tracker.failed_count(), 0);
        assert_eq!(tracker.completion_rate(), 0.25);
    }

    #[test]
    fn test_released_items_leave_pending() {
        let mut tracker = ProgressTracker::new(1);
        let g = GraderId::from("g-1");

        tracker.on_assigned(&g);
        tracker.on_released(&g);

        assert_eq!(tracker.grader(&g).unwrap().pending_count(), 0);
    }
}
