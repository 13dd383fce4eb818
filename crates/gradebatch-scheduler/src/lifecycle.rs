//! Job lifecycle: the state machine for one batch job and the dispatch
//! loop that feeds its items to graders.
//!
//! A manager is only ever touched by one caller at a time (the orchestrator
//! keeps it behind a per-job lock), so every method takes `&mut self` and
//! runs to completion without suspending.

use chrono::{DateTime, Duration, Utc};
use gradebatch_config::SchedulerConfig;
use gradebatch_core::event::BatchEvent;
use gradebatch_core::item::{Assignment, ItemOutcome, ItemState, NewItem, WorkItem};
use gradebatch_core::job::{
    GraderWorkload, ItemError, JobAction, JobSnapshot, JobState, Strategy,
};
use gradebatch_core::{Error, GraderId, ResourceId, Result};
use rand::rngs::StdRng;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::assignment::{self, PlanItem};
use crate::estimation::EstimationService;
use crate::pool::GraderPool;
use crate::progress::ProgressTracker;

/// Reason recorded on items failed by `stop`.
pub const CANCELLED_REASON: &str = "cancelled";

/// The transition table. `None` means the action is not allowed.
pub fn next_state(state: JobState, action: JobAction) -> Option<JobState> {
    use JobAction::*;
    use JobState::*;

    match (state, action) {
        (Pending, Start) => Some(Processing),
        (Processing, Pause) => Some(Paused),
        (Paused, Resume) => Some(Processing),
        (Processing | Paused, Stop) => Some(Cancelled),
        (Processing, Optimize) => Some(Processing),
        _ => None,
    }
}

/// Owns one job, its items and its progress counters.
#[derive(Debug)]
pub struct JobLifecycleManager {
    id: ResourceId,
    exam_id: String,
    strategy: Strategy,
    state: JobState,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    /// Submission order.
    items: Vec<WorkItem>,
    index: HashMap<ResourceId, usize>,
    errors: Vec<ItemError>,
    progress: ProgressTracker,
    estimator: EstimationService,
    rng: StdRng,
    max_retries: u32,
    smoothing_alpha: f64,
    item_timeout: Duration,
    events: Vec<BatchEvent>,
}

impl JobLifecycleManager {
    /// Create a Pending job. Nothing is created if validation fails.
    pub fn new(
        exam_id: impl Into<String>,
        items: Vec<NewItem>,
        strategy: Strategy,
        config: &SchedulerConfig,
        rng: StdRng,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let exam_id = exam_id.into();
        if exam_id.trim().is_empty() {
            return Err(Error::Validation("exam id must not be empty".to_string()));
        }
        if items.is_empty() {
            return Err(Error::Validation(
                "a batch must contain at least one item".to_string(),
            ));
        }
        if let Some(pos) = items.iter().position(|i| i.payload_ref.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "item {} has an empty payload reference",
                pos
            )));
        }

        let id = ResourceId::new();
        let items: Vec<WorkItem> = items
            .into_iter()
            .map(|item| WorkItem::new(id, item))
            .collect();
        let index = items
            .iter()
            .enumerate()
            .map(|(idx, item)| (item.id, idx))
            .collect();

        Ok(Self {
            id,
            exam_id,
            strategy,
            state: JobState::Pending,
            created_at: now,
            started_at: None,
            finished_at: None,
            progress: ProgressTracker::new(items.len()),
            items,
            index,
            errors: Vec::new(),
            estimator: EstimationService::new(config.smoothing_alpha),
            rng,
            max_retries: config.max_retries,
            smoothing_alpha: config.smoothing_alpha,
            item_timeout: i64::try_from(config.item_timeout_ms)
                .ok()
                .and_then(Duration::try_milliseconds)
                .unwrap_or(Duration::MAX),
            events: Vec::new(),
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn item(&self, id: &ResourceId) -> Option<&WorkItem> {
        self.index.get(id).map(|&idx| &self.items[idx])
    }

    pub fn has_queued(&self) -> bool {
        self.items.iter().any(|i| i.state == ItemState::Queued)
    }

    /// Take the events produced since the last call.
    pub fn drain_events(&mut self) -> Vec<BatchEvent> {
        std::mem::take(&mut self.events)
    }

    /// Apply a client action. Rejected actions leave the job untouched.
    pub fn apply(&mut self, action: JobAction, pool: &GraderPool, now: DateTime<Utc>) -> Result<()> {
        let Some(target) = next_state(self.state, action) else {
            return Err(Error::InvalidTransition {
                state: self.state,
                action,
            });
        };

        match action {
            JobAction::Start => {
                self.started_at = Some(now);
                self.set_state(target);
                self.dispatch(pool, self.strategy, now)?;
                self.check_completion(now);
            }
            JobAction::Pause => self.set_state(target),
            JobAction::Resume => {
                self.set_state(target);
                self.dispatch(pool, self.strategy, now)?;
                self.check_completion(now);
            }
            JobAction::Stop => self.cancel(pool, now),
            JobAction::Optimize => self.optimize(pool, now)?,
        }
        Ok(())
    }

    /// Re-run dispatch after capacity was freed somewhere in the pool.
    /// Returns the number of items handed out.
    pub fn redispatch(&mut self, pool: &GraderPool, now: DateTime<Utc>) -> usize {
        if self.state != JobState::Processing || !self.has_queued() {
            return 0;
        }
        let dispatched = match self.dispatch(pool, self.strategy, now) {
            Ok(n) => n,
            Err(e) => {
                warn!(job_id = %self.id, error = %e, "Dispatch failed");
                0
            }
        };
        self.check_completion(now);
        dispatched
    }

    /// A grader acknowledged an assigned item and started working on it.
    pub fn report_started(
        &mut self,
        item_id: ResourceId,
        grader: &GraderId,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let idx = self.locate_owned(item_id, grader)?;
        let item = &mut self.items[idx];
        if item.state != ItemState::Assigned {
            return Err(Error::Conflict(format!(
                "item {} is {}, expected assigned",
                item_id, item.state
            )));
        }
        item.state = ItemState::InProgress;
        item.started_at = Some(now);
        debug!(job_id = %self.id, item_id = %item_id, grader_id = %grader, "Item started");
        Ok(())
    }

    /// Record a grader's outcome for an item it holds.
    ///
    /// Results are accepted in any job state: items already in flight when a
    /// job is paused, stopped or failed are allowed to finish.
    pub fn report_result(
        &mut self,
        item_id: ResourceId,
        grader: &GraderId,
        outcome: ItemOutcome,
        pool: &GraderPool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let idx = self.locate_owned(item_id, grader)?;

        match outcome {
            ItemOutcome::Success(result) => {
                let item = &mut self.items[idx];
                let held_since = item.started_at.or(item.assigned_at).unwrap_or(now);
                item.state = ItemState::Done;
                item.result = Some(result);
                item.assigned_grader = None;

                let duration_ms = (now - held_since).num_milliseconds().max(0) as f64;
                pool.release(grader);
                pool.record_completion(grader, duration_ms, self.smoothing_alpha);
                self.progress.on_done(grader);
                self.events.push(BatchEvent::ItemCompleted {
                    job_id: self.id,
                    item_id,
                    grader_id: grader.clone(),
                });
                debug!(job_id = %self.id, item_id = %item_id, grader_id = %grader, duration_ms, "Item done");

                if let (Some(started), false) = (self.started_at, self.state.is_terminal()) {
                    self.estimator.observe(
                        self.progress.done_count(),
                        self.progress.total_items(),
                        started,
                        now,
                    );
                }
            }
            ItemOutcome::Error(message) => self.fail_attempt(idx, grader, message, pool, now),
        }

        self.redispatch(pool, now);
        self.check_completion(now);
        Ok(())
    }

    /// Fail every in-flight item held longer than the item timeout.
    /// Returns the number of items that timed out.
    pub fn expire_overdue(&mut self, pool: &GraderPool, now: DateTime<Utc>) -> usize {
        let overdue: Vec<(usize, GraderId)> = self
            .items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.state.is_in_flight())
            .filter(|(_, item)| {
                item.assigned_at
                    .is_some_and(|since| now - since > self.item_timeout)
            })
            .filter_map(|(idx, item)| item.assigned_grader.clone().map(|g| (idx, g)))
            .collect();

        for (idx, grader) in &overdue {
            warn!(
                job_id = %self.id,
                item_id = %self.items[*idx].id,
                grader_id = %grader,
                "Item timed out"
            );
            let message = format!(
                "timed out after {} ms",
                self.item_timeout.num_milliseconds()
            );
            self.fail_attempt(*idx, grader, message, pool, now);
        }

        if !overdue.is_empty() {
            self.redispatch(pool, now);
            self.check_completion(now);
        }
        overdue.len()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        let queued_count = self
            .items
            .iter()
            .filter(|i| i.state == ItemState::Queued)
            .count();
        let in_flight_count = self
            .items
            .iter()
            .filter(|i| i.state.is_in_flight())
            .count();

        JobSnapshot {
            job_id: self.id,
            exam_id: self.exam_id.clone(),
            strategy: self.strategy,
            state: self.state,
            total_items: self.progress.total_items(),
            done_count: self.progress.done_count(),
            failed_count: self.progress.failed_count(),
            queued_count,
            in_flight_count,
            completion_rate: self.progress.completion_rate(),
            estimated_completion: self.estimator.estimate().cloned(),
            errors: self.errors.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    /// Per-grader progress for this job, ordered by grader id.
    pub fn grader_workloads(&self, pool: &GraderPool) -> Vec<GraderWorkload> {
        self.progress
            .graders()
            .map(|(grader_id, p)| GraderWorkload {
                grader_id: grader_id.clone(),
                assigned_count: p.assigned_count,
                completed_count: p.completed_count,
                failed_count: p.failed_count,
                pending_count: p.pending_count(),
                completion_rate: p.completion_rate(),
                avg_duration_ms: pool
                    .info(grader_id)
                    .and_then(|info| info.average_duration_ms),
            })
            .collect()
    }

    /// Items of this job currently held by `grader`.
    pub fn assignments_for(&self, grader: &GraderId) -> Vec<Assignment> {
        self.items
            .iter()
            .filter(|i| i.assigned_grader.as_ref() == Some(grader))
            .map(Assignment::from)
            .collect()
    }

    fn locate_owned(&self, item_id: ResourceId, grader: &GraderId) -> Result<usize> {
        let idx = *self
            .index
            .get(&item_id)
            .ok_or_else(|| Error::NotFound(format!("item {} in job {}", item_id, self.id)))?;
        let item = &self.items[idx];
        if !item.state.is_in_flight() {
            return Err(Error::Conflict(format!(
                "item {} is {}, not held by any grader",
                item_id, item.state
            )));
        }
        if item.assigned_grader.as_ref() != Some(grader) {
            return Err(Error::Conflict(format!(
                "item {} is not assigned to grader {}",
                item_id, grader
            )));
        }
        Ok(idx)
    }

    /// Plan and hand out queued items. An empty pool is fatal for the job;
    /// a full pool just leaves items queued until capacity frees up.
    fn dispatch(&mut self, pool: &GraderPool, strategy: Strategy, now: DateTime<Utc>) -> Result<usize> {
        if self.state != JobState::Processing {
            return Ok(0);
        }

        let queued: Vec<PlanItem> = self
            .items
            .iter()
            .filter(|i| i.state == ItemState::Queued)
            .map(|i| PlanItem {
                id: i.id,
                category: i.category.clone(),
                avoid: i.last_grader.clone(),
            })
            .collect();
        if queued.is_empty() {
            return Ok(0);
        }

        if pool.is_empty() {
            let message = "no graders registered".to_string();
            self.fail(pool, &message, now);
            return Err(Error::DispatchFatal(message));
        }

        let plan = assignment::plan(&queued, &pool.views(), strategy, &mut self.rng);
        let mut dispatched = 0;
        for (item_id, grader_id) in plan {
            // Another job may have taken the slot since the views were read.
            if !pool.try_reserve(&grader_id) {
                continue;
            }
            let Some(&idx) = self.index.get(&item_id) else {
                pool.release(&grader_id);
                continue;
            };
            let item = &mut self.items[idx];
            item.state = ItemState::Assigned;
            item.assigned_grader = Some(grader_id.clone());
            item.assigned_at = Some(now);
            item.started_at = None;

            self.progress.on_assigned(&grader_id);
            self.events.push(BatchEvent::ItemAssigned {
                job_id: self.id,
                item_id,
                grader_id,
            });
            dispatched += 1;
        }

        if dispatched < queued.len() {
            debug!(
                job_id = %self.id,
                waiting = queued.len() - dispatched,
                "Items waiting for grader capacity"
            );
        }
        Ok(dispatched)
    }

    fn optimize(&mut self, pool: &GraderPool, now: DateTime<Utc>) -> Result<()> {
        let mut moved = 0;
        for idx in 0..self.items.len() {
            if self.items[idx].state == ItemState::Assigned {
                self.release(idx, pool, ItemState::Queued);
                self.items[idx].assigned_at = None;
                moved += 1;
            }
        }
        info!(job_id = %self.id, released = moved, "Optimizing assignments");
        self.dispatch(pool, Strategy::Workload, now)?;
        Ok(())
    }

    fn cancel(&mut self, pool: &GraderPool, now: DateTime<Utc>) {
        for idx in 0..self.items.len() {
            if self.items[idx].is_reassignable() {
                self.release(idx, pool, ItemState::Failed);
                self.mark_failed(idx, CANCELLED_REASON.to_string(), now);
            }
        }
        self.finished_at = Some(now);
        self.estimator.clear();
        self.set_state(JobState::Cancelled);
    }

    /// Fatal dispatch error. Done and in-flight items are kept.
    fn fail(&mut self, pool: &GraderPool, message: &str, now: DateTime<Utc>) {
        warn!(job_id = %self.id, error = %message, "Fatal dispatch error");
        for idx in 0..self.items.len() {
            if self.items[idx].is_reassignable() {
                self.release(idx, pool, ItemState::Failed);
                self.mark_failed(idx, message.to_string(), now);
            }
        }
        self.finished_at = Some(now);
        self.estimator.clear();
        self.set_state(JobState::Failed);
    }

    /// Handle one failed attempt: retry while attempts remain, else fail.
    fn fail_attempt(
        &mut self,
        idx: usize,
        grader: &GraderId,
        message: String,
        pool: &GraderPool,
        now: DateTime<Utc>,
    ) {
        pool.release(grader);
        self.progress.on_attempt_failed(grader);

        let retry = {
            let item = &mut self.items[idx];
            item.attempts += 1;
            item.last_error = Some(message.clone());
            item.assigned_grader = None;
            item.last_grader = Some(grader.clone());
            item.assigned_at = None;
            item.started_at = None;
            item.attempts <= self.max_retries && !self.state.is_terminal()
        };

        let item_id = self.items[idx].id;
        if retry {
            self.items[idx].state = ItemState::Queued;
            self.events.push(BatchEvent::ItemReleased {
                job_id: self.id,
                item_id,
                grader_id: grader.clone(),
                state: ItemState::Queued,
            });
            info!(
                job_id = %self.id,
                item_id = %item_id,
                attempts = self.items[idx].attempts,
                error = %message,
                "Item attempt failed, requeued"
            );
        } else {
            self.mark_failed(idx, message, now);
        }
    }

    /// Return an Assigned item's grader slot without recording an outcome,
    /// moving the item to `next`.
    fn release(&mut self, idx: usize, pool: &GraderPool, next: ItemState) {
        let item = &mut self.items[idx];
        if let Some(grader) = item.assigned_grader.take() {
            item.state = next;
            pool.release(&grader);
            self.progress.on_released(&grader);
            self.events.push(BatchEvent::ItemReleased {
                job_id: self.id,
                item_id: item.id,
                grader_id: grader,
                state: item.state,
            });
        }
    }

    fn mark_failed(&mut self, idx: usize, message: String, now: DateTime<Utc>) {
        let item = &mut self.items[idx];
        item.state = ItemState::Failed;
        item.assigned_grader = None;
        item.last_error = Some(message.clone());
        let item_id = item.id;

        self.progress.on_item_failed();
        self.errors.push(ItemError {
            item_id,
            message: message.clone(),
            timestamp: now,
        });
        self.events.push(BatchEvent::ItemFailed {
            job_id: self.id,
            item_id,
            message,
        });
    }

    fn check_completion(&mut self, now: DateTime<Utc>) {
        if self.state == JobState::Processing && self.items.iter().all(|i| i.state.is_terminal()) {
            self.finished_at = Some(now);
            self.set_state(JobState::Completed);
            info!(
                job_id = %self.id,
                done = self.progress.done_count(),
                failed = self.progress.failed_count(),
                "Job completed"
            );
        }
    }

    fn set_state(&mut self, to: JobState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        info!(job_id = %self.id, %from, %to, "Job state changed");
        self.events.push(BatchEvent::JobStateChanged {
            job_id: self.id,
            from,
            to,
        });
    }
}
