//! Grader pool commands.

use anyhow::Result;
use gradebatch_core::grader::{GraderInfo, GraderSpec};
use gradebatch_core::item::Assignment;

use crate::client::ApiClient;

pub async fn register(api: &ApiClient, id: &str, capacity: u32, tags: Vec<String>) -> Result<()> {
    let spec = GraderSpec::new(id, capacity).with_tags(tags);
    let info: GraderInfo = api.post("graders", &spec).await?;
    println!(
        "Registered grader {} (capacity {})",
        info.grader_id, info.capacity
    );
    Ok(())
}

pub async fn list(api: &ApiClient) -> Result<()> {
    let graders: Vec<GraderInfo> = api.get("graders").await?;
    if graders.is_empty() {
        println!("No graders registered");
        return Ok(());
    }
    println!(
        "{:<16} {:>6} {:>9} {:>10}  TAGS",
        "GRADER", "LOAD", "COMPLETED", "AVG MS"
    );
    for g in graders {
        let avg = g
            .average_duration_ms
            .map(|ms| format!("{:.0}", ms))
            .unwrap_or_else(|| "-".to_string());
        let tags: Vec<&str> = g.tags.iter().map(String::as_str).collect();
        println!(
            "{:<16} {:>6} {:>9} {:>10}  {}",
            g.grader_id.to_string(),
            format!("{}/{}", g.current_load, g.capacity),
            g.completed_count,
            avg,
            tags.join(",")
        );
    }
    Ok(())
}

pub async fn assignments(api: &ApiClient, id: &str) -> Result<()> {
    let held: Vec<Assignment> = api.get(&format!("graders/{}/assignments", id)).await?;
    if held.is_empty() {
        println!("Grader {} holds no items", id);
        return Ok(());
    }
    for a in held {
        println!(
            "{} {} {:<11} attempts={} {}",
            a.job_id,
            a.item_id,
            a.state.to_string(),
            a.attempts,
            a.payload_ref
        );
    }
    Ok(())
}

pub async fn remove(api: &ApiClient, id: &str) -> Result<()> {
    api.delete(&format!("graders/{}", id)).await?;
    println!("Removed grader {}", id);
    Ok(())
}
