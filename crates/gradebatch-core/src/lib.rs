//! Core domain types for the Gradebatch batch grading orchestrator.
//!
//! This crate contains:
//! - Resource and grader identifiers
//! - Work items, graders and batch jobs
//! - The job state machine vocabulary (states, actions, strategies)
//! - Immutable snapshot and event types handed to clients

pub mod error;
pub mod event;
pub mod grader;
pub mod id;
pub mod item;
pub mod job;

pub use error::{Error, Result};
pub use id::{GraderId, ResourceId};
