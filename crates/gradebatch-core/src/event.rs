//! Events published while jobs run.

use serde::{Deserialize, Serialize};

use crate::item::ItemState;
use crate::job::JobState;
use crate::{GraderId, ResourceId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    JobStateChanged {
        job_id: ResourceId,
        from: JobState,
        to: JobState,
    },
    ItemAssigned {
        job_id: ResourceId,
        item_id: ResourceId,
        grader_id: GraderId,
    },
    /// An item left a grader without finishing (retry, timeout, optimize, cancel).
    ItemReleased {
        job_id: ResourceId,
        item_id: ResourceId,
        grader_id: GraderId,
        state: ItemState,
    },
    ItemCompleted {
        job_id: ResourceId,
        item_id: ResourceId,
        grader_id: GraderId,
    },
    ItemFailed {
        job_id: ResourceId,
        item_id: ResourceId,
        message: String,
    },
}

impl BatchEvent {
    pub fn job_id(&self) -> ResourceId {
        match self {
            BatchEvent::JobStateChanged { job_id, .. }
            | BatchEvent::ItemAssigned { job_id, .. }
            | BatchEvent::ItemReleased { job_id, .. }
            | BatchEvent::ItemCompleted { job_id, .. }
            | BatchEvent::ItemFailed { job_id, .. } => *job_id,
        }
    }
}
