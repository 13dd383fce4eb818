//! Work items: the gradable units inside a batch job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{GraderId, ResourceId};

/// State of a single work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemState {
    /// Waiting for a grader.
    Queued,
    /// Handed to a grader that has not acknowledged it yet.
    Assigned,
    /// The grader is working on it.
    InProgress,
    /// Graded successfully.
    Done,
    /// Gave up after exhausting retries, or cancelled.
    Failed,
}

impl ItemState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemState::Done | ItemState::Failed)
    }

    /// Owned by a grader and counted against its load.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, ItemState::Assigned | ItemState::InProgress)
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemState::Queued => write!(f, "queued"),
            ItemState::Assigned => write!(f, "assigned"),
            ItemState::InProgress => write!(f, "inProgress"),
            ItemState::Done => write!(f, "done"),
            ItemState::Failed => write!(f, "failed"),
        }
    }
}

/// An item as submitted by a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewItem {
    /// Opaque reference to the answer sheet or question instance.
    pub payload_ref: String,
    /// Subject category used by the expertise strategy.
    #[serde(default)]
    pub category: Option<String>,
}

impl NewItem {
    pub fn new(payload_ref: impl Into<String>) -> Self {
        Self {
            payload_ref: payload_ref.into(),
            category: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// What a grader reports back for an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemOutcome {
    /// Opaque grading result, passed through untouched.
    Success(serde_json::Value),
    /// Grading failed for this attempt.
    Error(String),
}

/// One gradable unit owned by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: ResourceId,
    pub job_id: ResourceId,
    pub payload_ref: String,
    pub category: Option<String>,
    pub state: ItemState,
    /// Set while Assigned or InProgress.
    pub assigned_grader: Option<GraderId>,
    /// Grader that handled the most recent failed attempt.
    pub last_grader: Option<GraderId>,
    /// Set once Done.
    pub result: Option<serde_json::Value>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn new(job_id: ResourceId, item: NewItem) -> Self {
        Self {
            id: ResourceId::new(),
            job_id,
            payload_ref: item.payload_ref,
            category: item.category,
            state: ItemState::Queued,
            assigned_grader: None,
            last_grader: None,
            result: None,
            attempts: 0,
            last_error: None,
            assigned_at: None,
            started_at: None,
        }
    }

    /// Queued, or assigned but not yet picked up by its grader.
    pub fn is_reassignable(&self) -> bool {
        matches!(self.state, ItemState::Queued | ItemState::Assigned)
    }
}

/// An item currently held by a grader, as shown to that grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub job_id: ResourceId,
    pub item_id: ResourceId,
    pub payload_ref: String,
    pub category: Option<String>,
    pub state: ItemState,
    pub attempts: u32,
    pub assigned_at: Option<DateTime<Utc>>,
}

impl From<&WorkItem> for Assignment {
    fn from(item: &WorkItem) -> Self {
        Self {
            job_id: item.job_id,
            item_id: item.id,
            payload_ref: item.payload_ref.clone(),
            category: item.category.clone(),
            state: item.state,
            attempts: item.attempts,
            assigned_at: item.assigned_at,
        }
    }
}
