//! KDL configuration parsing for Gradebatch.
//!
//! This crate handles parsing of:
//! - Server settings (listen address)
//! - Scheduler tuning (retries, timeouts, smoothing, seeding)
//! - The static grader pool registered at startup

pub mod error;
pub mod system;

pub use error::{ConfigError, ConfigResult};
pub use system::{SchedulerConfig, ServerConfig, SystemConfig, load_config, parse_config};
