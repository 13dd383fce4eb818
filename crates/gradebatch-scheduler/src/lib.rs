//! Batch grading job scheduling for Gradebatch.
//!
//! Accepts batches of work items, plans their assignment across a shared
//! grader pool and drives each job through its lifecycle. Each job is
//! serialized behind its own lock; grader load is tracked with per-grader
//! atomics so jobs never contend on a global lock.

pub mod assignment;
pub mod estimation;
pub mod lifecycle;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod sweeper;

pub use assignment::{AssignmentPlan, GraderView, PlanItem};
pub use estimation::EstimationService;
pub use lifecycle::JobLifecycleManager;
pub use orchestrator::Orchestrator;
pub use pool::GraderPool;
pub use progress::ProgressTracker;
pub use sweeper::TimeoutSweeper;
