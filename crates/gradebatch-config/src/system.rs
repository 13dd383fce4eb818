//! Orchestrator configuration parsing.

use crate::{ConfigError, ConfigResult};
use gradebatch_core::grader::GraderSpec;
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// Whole-service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
    pub server: ServerConfig,
    pub scheduler: SchedulerConfig,
    /// Graders registered when the service starts.
    pub graders: Vec<GraderSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
        }
    }
}

/// Tuning knobs for dispatch, retries and estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Re-dispatches allowed after the first failed attempt.
    pub max_retries: u32,
    /// An item held longer than this is failed with "timed out".
    pub item_timeout_ms: u64,
    /// How often the timeout sweeper runs.
    pub sweep_interval_ms: u64,
    /// EMA weight for grader durations and job throughput.
    pub smoothing_alpha: f64,
    /// Seed for the random strategy. Entropy-seeded when absent.
    pub seed: Option<u64>,
    /// Capacity of the event broadcast channel.
    pub event_buffer: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            item_timeout_ms: 10 * 60 * 1000,
            sweep_interval_ms: 1000,
            smoothing_alpha: 0.2,
            seed: None,
            event_buffer: 256,
        }
    }
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();
    let mut seen_graders = HashSet::new();

    for node in doc.nodes() {
        match node.name().value() {
            "server" => parse_server(node, &mut config.server)?,
            "scheduler" => parse_scheduler(node, &mut config.scheduler)?,
            "grader" => {
                let grader = parse_grader(node)?;
                if !seen_graders.insert(grader.grader_id.clone()) {
                    return Err(ConfigError::Duplicate(format!(
                        "grader '{}'",
                        grader.grader_id
                    )));
                }
                config.graders.push(grader);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_server(node: &KdlNode, server: &mut ServerConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for child in children.nodes() {
        if child.name().value() == "listen" {
            let raw = get_first_string_arg(child)
                .ok_or_else(|| ConfigError::MissingField("server listen address".to_string()))?;
            server.listen = raw.parse().map_err(|_| ConfigError::InvalidValue {
                field: "listen".to_string(),
                message: format!("not a socket address: {}", raw),
            })?;
        }
    }
    Ok(())
}

fn parse_scheduler(node: &KdlNode, scheduler: &mut SchedulerConfig) -> ConfigResult<()> {
    let Some(children) = node.children() else {
        return Ok(());
    };
    for child in children.nodes() {
        let field = child.name().value();
        match field {
            "max-retries" => {
                scheduler.max_retries = u32::try_from(get_u64_arg(child, field)?)
                    .map_err(|_| invalid(field, "must fit in 32 bits"))?;
            }
            "item-timeout-ms" => {
                let ms = get_u64_arg(child, field)?;
                if i64::try_from(ms).is_err() {
                    return Err(invalid(field, "must not exceed 9223372036854775807"));
                }
                scheduler.item_timeout_ms = ms;
            }
            "sweep-interval-ms" => {
                let ms = get_u64_arg(child, field)?;
                if ms == 0 {
                    return Err(invalid(field, "must be greater than zero"));
                }
                scheduler.sweep_interval_ms = ms;
            }
            "smoothing-alpha" => {
                let alpha = get_f64_arg(child, field)?;
                if !(alpha > 0.0 && alpha <= 1.0) {
                    return Err(invalid(field, "must be in (0, 1]"));
                }
                scheduler.smoothing_alpha = alpha;
            }
            "seed" => scheduler.seed = Some(get_u64_arg(child, field)?),
            "event-buffer" => {
                let size = get_u64_arg(child, field)?;
                if size == 0 {
                    return Err(invalid(field, "must be greater than zero"));
                }
                scheduler.event_buffer = size as usize;
            }
            _ => {}
        }
    }
    Ok(())
}

fn parse_grader(node: &KdlNode) -> ConfigResult<GraderSpec> {
    let id = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("grader id".to_string()))?;

    let capacity = node
        .get("capacity")
        .and_then(|v| v.as_integer())
        .ok_or_else(|| ConfigError::MissingField(format!("capacity for grader '{}'", id)))?;
    if capacity < 1 || capacity > u32::MAX as i128 {
        return Err(invalid("capacity", "must be a positive integer"));
    }

    let mut grader = GraderSpec::new(id, capacity as u32);
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "tags" {
                grader = grader.with_tags(get_all_string_args(child));
            }
        }
    }
    Ok(grader)
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
}

fn first_arg(node: &KdlNode) -> Option<&kdl::KdlValue> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .map(|e| e.value())
}

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    first_arg(node)
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

fn get_u64_arg(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = first_arg(node)
        .and_then(|v| v.as_integer())
        .ok_or_else(|| invalid(field, "expected an integer"))?;
    u64::try_from(value).map_err(|_| invalid(field, "must not be negative"))
}

fn get_f64_arg(node: &KdlNode, field: &str) -> ConfigResult<f64> {
    let value = first_arg(node).ok_or_else(|| invalid(field, "expected a number"))?;
    value
        .as_float()
        .or_else(|| value.as_integer().map(|i| i as f64))
        .ok_or_else(|| invalid(field, "expected a number"))
}
