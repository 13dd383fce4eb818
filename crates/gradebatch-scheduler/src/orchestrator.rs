//! Orchestrator: the single entry point used by the API.
//!
//! Jobs live in a sharded map, each behind its own async mutex, so
//! commands against one job are serialized while different jobs proceed in
//! parallel. Every query returns an owned snapshot.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gradebatch_config::SchedulerConfig;
use gradebatch_core::event::BatchEvent;
use gradebatch_core::grader::{GraderInfo, GraderSpec};
use gradebatch_core::item::{Assignment, ItemOutcome, NewItem};
use gradebatch_core::job::{GraderWorkload, JobAction, JobSnapshot, Strategy};
use gradebatch_core::{Error, GraderId, ResourceId, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info};

use crate::lifecycle::JobLifecycleManager;
use crate::pool::GraderPool;

type JobHandle = Arc<Mutex<JobLifecycleManager>>;

pub struct Orchestrator {
    config: SchedulerConfig,
    pool: Arc<GraderPool>,
    jobs: DashMap<ResourceId, JobHandle>,
    events: broadcast::Sender<BatchEvent>,
    jobs_created: AtomicU64,
}

impl Orchestrator {
    pub fn new(config: SchedulerConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        Self {
            config,
            pool: Arc::new(GraderPool::new()),
            jobs: DashMap::new(),
            events,
            jobs_created: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn pool(&self) -> &GraderPool {
        &self.pool
    }

    /// Subscribe to events from every job.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    // ---- graders ----------------------------------------------------------

    /// Register a grader. New capacity is offered to queued work at once.
    pub async fn register_grader(&self, spec: GraderSpec) -> Result<GraderInfo> {
        let info = self.pool.register(spec)?;
        self.on_capacity_available(None, Utc::now()).await;
        Ok(info)
    }

    pub fn deregister_grader(&self, id: &GraderId) -> Result<()> {
        self.pool.deregister(id)
    }

    pub fn list_graders(&self) -> Vec<GraderInfo> {
        self.pool.list()
    }

    pub fn grader(&self, id: &GraderId) -> Result<GraderInfo> {
        self.pool
            .info(id)
            .ok_or_else(|| Error::NotFound(format!("grader {}", id)))
    }

    /// Items currently held by a grader, across all jobs.
    pub async fn grader_assignments(&self, id: &GraderId) -> Result<Vec<Assignment>> {
        if !self.pool.contains(id) {
            return Err(Error::NotFound(format!("grader {}", id)));
        }
        let mut assignments = Vec::new();
        for handle in self.handles() {
            let job = handle.lock().await;
            assignments.extend(job.assignments_for(id));
        }
        Ok(assignments)
    }

    // ---- jobs -------------------------------------------------------------

    /// Create a Pending job. Returns its id.
    pub fn submit_job(
        &self,
        exam_id: impl Into<String>,
        items: Vec<NewItem>,
        strategy: Strategy,
    ) -> Result<ResourceId> {
        let job = JobLifecycleManager::new(
            exam_id,
            items,
            strategy,
            &self.config,
            self.job_rng(),
            Utc::now(),
        )?;
        let id = job.id();
        info!(job_id = %id, items = job.items().len(), %strategy, "Job submitted");
        self.jobs.insert(id, Arc::new(Mutex::new(job)));
        Ok(id)
    }

    /// Apply a lifecycle action and return the resulting snapshot.
    pub async fn control_job(&self, job_id: ResourceId, action: JobAction) -> Result<JobSnapshot> {
        self.control_job_at(job_id, action, Utc::now()).await
    }

    pub async fn control_job_at(
        &self,
        job_id: ResourceId,
        action: JobAction,
        now: DateTime<Utc>,
    ) -> Result<JobSnapshot> {
        let handle = self.handle(job_id)?;
        let (result, snapshot) = {
            let mut job = handle.lock().await;
            let result = job.apply(action, &self.pool, now);
            self.publish(job.drain_events());
            (result, job.snapshot())
        };

        // stop, optimize and fatal failures can hand capacity back
        if matches!(action, JobAction::Stop | JobAction::Optimize) || result.is_err() {
            self.on_capacity_available(Some(job_id), now).await;
        }

        result.map(|_| snapshot)
    }

    pub async fn get_snapshot(&self, job_id: ResourceId) -> Result<JobSnapshot> {
        let handle = self.handle(job_id)?;
        let job = handle.lock().await;
        Ok(job.snapshot())
    }

    /// Snapshots of every job, oldest first.
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        let mut snapshots = Vec::with_capacity(self.jobs.len());
        for handle in self.handles() {
            snapshots.push(handle.lock().await.snapshot());
        }
        snapshots.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        snapshots
    }

    pub async fn list_grader_workloads(&self, job_id: ResourceId) -> Result<Vec<GraderWorkload>> {
        let handle = self.handle(job_id)?;
        let job = handle.lock().await;
        Ok(job.grader_workloads(&self.pool))
    }

    // ---- grader reports ---------------------------------------------------

    pub async fn report_item_started(
        &self,
        job_id: ResourceId,
        item_id: ResourceId,
        grader: &GraderId,
    ) -> Result<()> {
        let handle = self.handle(job_id)?;
        let mut job = handle.lock().await;
        job.report_started(item_id, grader, Utc::now())
    }

    pub async fn report_item_result(
        &self,
        job_id: ResourceId,
        item_id: ResourceId,
        grader: &GraderId,
        outcome: ItemOutcome,
    ) -> Result<JobSnapshot> {
        self.report_item_result_at(job_id, item_id, grader, outcome, Utc::now())
            .await
    }

    pub async fn report_item_result_at(
        &self,
        job_id: ResourceId,
        item_id: ResourceId,
        grader: &GraderId,
        outcome: ItemOutcome,
        now: DateTime<Utc>,
    ) -> Result<JobSnapshot> {
        let handle = self.handle(job_id)?;
        let snapshot = {
            let mut job = handle.lock().await;
            job.report_result(item_id, grader, outcome, &self.pool, now)?;
            self.publish(job.drain_events());
            job.snapshot()
        };
        self.on_capacity_available(Some(job_id), now).await;
        Ok(snapshot)
    }

    // ---- timeouts ---------------------------------------------------------

    /// Fail items held past the timeout in every job. Returns how many
    /// items timed out.
    pub async fn sweep_timeouts(&self) -> usize {
        self.sweep_timeouts_at(Utc::now()).await
    }

    pub async fn sweep_timeouts_at(&self, now: DateTime<Utc>) -> usize {
        let mut expired = 0;
        for handle in self.handles() {
            let mut job = handle.lock().await;
            expired += job.expire_overdue(&self.pool, now);
            self.publish(job.drain_events());
        }
        if expired > 0 {
            self.on_capacity_available(None, now).await;
        }
        expired
    }

    // ---- internals --------------------------------------------------------

    /// Offer freed grader capacity to queued items of other jobs, oldest
    /// job first. Locks one job at a time.
    async fn on_capacity_available(&self, skip: Option<ResourceId>, now: DateTime<Utc>) {
        if !self.pool.has_spare_capacity() {
            return;
        }
        let mut handles: Vec<(ResourceId, JobHandle)> = self
            .jobs
            .iter()
            .filter(|entry| Some(*entry.key()) != skip)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);

        for (job_id, handle) in handles {
            if !self.pool.has_spare_capacity() {
                break;
            }
            let mut job = handle.lock().await;
            let dispatched = job.redispatch(&self.pool, now);
            if dispatched > 0 {
                debug!(job_id = %job_id, dispatched, "Dispatched on freed capacity");
            }
            self.publish(job.drain_events());
        }
    }

    fn handle(&self, job_id: ResourceId) -> Result<JobHandle> {
        self.jobs
            .get(&job_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    /// Clone out every job handle so no map guard is held across an await.
    fn handles(&self) -> Vec<JobHandle> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }

    fn publish(&self, events: Vec<BatchEvent>) {
        for event in events {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    fn job_rng(&self) -> StdRng {
        let n = self.jobs_created.fetch_add(1, Ordering::Relaxed);
        match self.config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(n)),
            None => StdRng::from_entropy(),
        }
    }
}
