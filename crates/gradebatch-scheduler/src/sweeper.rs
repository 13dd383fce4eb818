//! Background task that times out stalled items.

use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

/// Periodically fails items whose grader has held them past the timeout.
pub struct TimeoutSweeper {
    orchestrator: Arc<Orchestrator>,
    period: Duration,
}

impl TimeoutSweeper {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let period = Duration::from_millis(orchestrator.config().sweep_interval_ms.max(1));
        Self {
            orchestrator,
            period,
        }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Run the sweep loop. Never returns.
    pub async fn run(&self) {
        info!(period_ms = self.period.as_millis() as u64, "Starting timeout sweeper");

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let expired = self.orchestrator.sweep_timeouts().await;
            if expired > 0 {
                debug!(expired, "Timed out stalled items");
            }
        }
    }

    /// Run the loop on the current runtime. Abort the handle to stop it.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebatch_config::SchedulerConfig;
    use gradebatch_core::GraderId;
    use gradebatch_core::grader::GraderSpec;
    use gradebatch_core::item::NewItem;
    use gradebatch_core::job::{JobAction, Strategy};

    #[tokio::test]
    async fn test_sweeper_requeues_stalled_item() {
        let orch = Arc::new(Orchestrator::new(SchedulerConfig {
            item_timeout_ms: 1,
            max_retries: 1_000,
            ..Default::default()
        }));
        orch.register_grader(GraderSpec::new("g-1", 1)).await.unwrap();
        let job_id = orch
            .submit_job("exam-1", vec![NewItem::new("sheet-0")], Strategy::Balanced)
            .unwrap();
        orch.control_job(job_id, JobAction::Start).await.unwrap();

        let handle = TimeoutSweeper::new(orch.clone())
            .with_period(Duration::from_millis(5))
            .spawn();
        tokio::time::sleep(Duration::from_millis(60)).await;
        handle.abort();

        let held = orch.grader_assignments(&GraderId::from("g-1")).await.unwrap();
        assert_eq!(held.len(), 1);
        assert!(held[0].attempts >= 1);
    }
}
