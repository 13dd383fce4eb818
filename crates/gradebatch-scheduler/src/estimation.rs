//! Completion estimates from smoothed throughput.

use chrono::{DateTime, Duration, Utc};
use gradebatch_core::job::Estimate;

/// Shortest elapsed time used for a throughput sample. Avoids dividing by
/// zero when an item completes in the same millisecond the job started.
const MIN_ELAPSED_MS: i64 = 1;

#[derive(Debug, Clone)]
pub struct EstimationService {
    alpha: f64,
    smoothed_throughput: Option<f64>,
    latest: Option<Estimate>,
}

impl EstimationService {
    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            smoothed_throughput: None,
            latest: None,
        }
    }

    /// Fold in a new observation and recompute the estimate.
    ///
    /// Throughput is `done / elapsed`, smoothed with an exponential moving
    /// average. No estimate is produced until at least one item is done.
    pub fn observe(
        &mut self,
        done: usize,
        total: usize,
        started_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<&Estimate> {
        if done == 0 {
            self.latest = None;
            return None;
        }

        let elapsed_ms = (now - started_at).num_milliseconds().max(MIN_ELAPSED_MS);
        let sample = done as f64 / (elapsed_ms as f64 / 1000.0);
        let throughput = match self.smoothed_throughput {
            Some(prev) => self.alpha * sample + (1.0 - self.alpha) * prev,
            None => sample,
        };
        self.smoothed_throughput = Some(throughput);

        let remaining = total.saturating_sub(done);
        let remaining_ms = (remaining as f64 / throughput * 1000.0).round();
        // Past chrono's range there is nothing meaningful to report.
        self.latest = (remaining_ms.is_finite() && remaining_ms < i64::MAX as f64)
            .then_some(remaining_ms as i64)
            .and_then(|ms| {
                let completes_at = now.checked_add_signed(Duration::try_milliseconds(ms)?)?;
                Some(Estimate {
                    throughput_per_sec: throughput,
                    remaining_ms: ms as u64,
                    completes_at,
                })
            });
        self.latest.as_ref()
    }

    /// The estimate computed at the last observation.
    pub fn estimate(&self) -> Option<&Estimate> {
        self.latest.as_ref()
    }

    /// Drop the estimate once the job can no longer make progress.
    pub fn clear(&mut self) {
        self.latest = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_no_estimate_before_first_completion() {
        let mut est = EstimationService::new(0.2);
        assert!(est.observe(0, 10, at(0), at(5000)).is_none());
        assert!(est.estimate().is_none());
    }

    #[test]
    fn test_first_sample_is_unsmoothed() {
        let mut est = EstimationService::new(0.2);
        // 2 items in 4s = 0.5/s; 8 remaining => 16s.
        let e = est.observe(2, 10, at(0), at(4000)).unwrap().clone();
        assert!((e.throughput_per_sec - 0.5).abs() < 1e-9);
        assert_eq!(e.remaining_ms, 16_000);
        assert_eq!(e.completes_at, at(20_000));
    }

    #[test]
    fn test_subsequent_samples_are_smoothed() {
        let mut est = EstimationService::new(0.2);
        est.observe(2, 10, at(0), at(4000)); // 0.5/s
        // Raw 4 items in 4s = 1.0/s; smoothed = 0.2 * 1.0 + 0.8 * 0.5 = 0.6
        let e = est.observe(4, 10, at(0), at(4000)).unwrap();
        assert!((e.throughput_per_sec - 0.6).abs() < 1e-9);
        assert_eq!(e.remaining_ms, 10_000);
    }

    #[test]
    fn test_finished_job_has_zero_remaining() {
        let mut est = EstimationService::new(0.2);
        let e = est.observe(3, 3, at(0), at(3000)).unwrap();
        assert_eq!(e.remaining_ms, 0);
        assert_eq!(e.completes_at, at(3000));
    }

    #[test]
    fn test_unrepresentable_eta_is_dropped() {
        let mut est = EstimationService::new(0.2);
        let e = est.observe(1, usize::MAX, DateTime::<Utc>::MIN_UTC, at(0));
        assert!(e.is_none());
        assert!(est.estimate().is_none());
    }

    #[test]
    fn test_zero_elapsed_does_not_divide_by_zero() {
        let mut est = EstimationService::new(0.2);
        let e = est.observe(1, 2, at(0), at(0)).unwrap();
        assert!(e.throughput_per_sec.is_finite());
    }
}
