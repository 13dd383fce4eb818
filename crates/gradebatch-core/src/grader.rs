//! Grader registration and views.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::GraderId;

/// Registration request for a grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraderSpec {
    pub grader_id: GraderId,
    /// Maximum number of concurrently held items.
    pub capacity: u32,
    /// Category labels this grader is competent in.
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl GraderSpec {
    pub fn new(grader_id: impl Into<GraderId>, capacity: u32) -> Self {
        Self {
            grader_id: grader_id.into(),
            capacity,
            tags: BTreeSet::new(),
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Point-in-time view of a registered grader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraderInfo {
    pub grader_id: GraderId,
    pub capacity: u32,
    pub current_load: u32,
    pub tags: BTreeSet<String>,
    pub completed_count: u64,
    pub average_duration_ms: Option<f64>,
}
