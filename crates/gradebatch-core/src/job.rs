//! Batch job definitions and the snapshot types returned to clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, GraderId, ResourceId};

/// Lifecycle state of a batch job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Submitted, not yet started.
    Pending,
    /// Dispatching items to graders.
    Processing,
    /// Dispatch halted; in-flight items still finish.
    Paused,
    /// Every item reached Done or Failed.
    Completed,
    /// A fatal dispatch error stopped the job.
    Failed,
    /// Stopped by a client.
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 6] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Paused,
        JobState::Completed,
        JobState::Failed,
        JobState::Cancelled,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Pending => write!(f, "pending"),
            JobState::Processing => write!(f, "processing"),
            JobState::Paused => write!(f, "paused"),
            JobState::Completed => write!(f, "completed"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A client-issued lifecycle command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobAction {
    Start,
    Pause,
    Resume,
    Stop,
    Optimize,
}

impl JobAction {
    pub const ALL: [JobAction; 5] = [
        JobAction::Start,
        JobAction::Pause,
        JobAction::Resume,
        JobAction::Stop,
        JobAction::Optimize,
    ];
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobAction::Start => write!(f, "start"),
            JobAction::Pause => write!(f, "pause"),
            JobAction::Resume => write!(f, "resume"),
            JobAction::Stop => write!(f, "stop"),
            JobAction::Optimize => write!(f, "optimize"),
        }
    }
}

impl FromStr for JobAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(JobAction::Start),
            "pause" => Ok(JobAction::Pause),
            "resume" => Ok(JobAction::Resume),
            "stop" => Ok(JobAction::Stop),
            "optimize" => Ok(JobAction::Optimize),
            other => Err(Error::Validation(format!("unknown action: {}", other))),
        }
    }
}

/// How queued items are matched to graders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Round-robin over graders ordered by load ratio.
    Balanced,
    /// Uniform choice among graders with spare capacity.
    Random,
    /// Prefer graders tagged with the item's category.
    Expertise,
    /// Greedy: re-rank graders after every single assignment.
    Workload,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Balanced => write!(f, "balanced"),
            Strategy::Random => write!(f, "random"),
            Strategy::Expertise => write!(f, "expertise"),
            Strategy::Workload => write!(f, "workload"),
        }
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "balanced" => Ok(Strategy::Balanced),
            "random" => Ok(Strategy::Random),
            "expertise" => Ok(Strategy::Expertise),
            "workload" => Ok(Strategy::Workload),
            other => Err(Error::Validation(format!("unknown strategy: {}", other))),
        }
    }
}

/// A permanently failed item, recorded on the job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    pub item_id: ResourceId,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Completion estimate derived from smoothed throughput.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Estimate {
    /// Smoothed items per second.
    pub throughput_per_sec: f64,
    /// Time left at the moment the estimate was computed.
    pub remaining_ms: u64,
    /// Wall-clock time at which the job is expected to finish.
    pub completes_at: DateTime<Utc>,
}

/// Immutable point-in-time view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: ResourceId,
    pub exam_id: String,
    pub strategy: Strategy,
    pub state: JobState,
    pub total_items: usize,
    pub done_count: usize,
    pub failed_count: usize,
    pub queued_count: usize,
    pub in_flight_count: usize,
    pub completion_rate: f64,
    pub estimated_completion: Option<Estimate>,
    pub errors: Vec<ItemError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Per-grader progress within one job, joined with the grader's global
/// duration average.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraderWorkload {
    pub grader_id: GraderId,
    pub assigned_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub completion_rate: f64,
    pub avg_duration_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_strategy_is_validation_error() {
        let err = "fastest".parse::<Strategy>().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_action_parses_lowercase() {
        assert_eq!("optimize".parse::<JobAction>().unwrap(), JobAction::Optimize);
        assert!("Optimize".parse::<JobAction>().is_err());
    }

    #[test]
    fn test_state_serializes_lowercase() {
        let json = serde_json::to_string(&JobState::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }
}
