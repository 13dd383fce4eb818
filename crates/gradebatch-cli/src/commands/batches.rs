//! Batch job commands.

use anyhow::{Context, Result, bail};
use gradebatch_core::item::NewItem;
use gradebatch_core::job::{GraderWorkload, JobSnapshot};
use serde::Deserialize;
use serde_json::json;

use crate::client::ApiClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitResponse {
    job_id: String,
}

pub async fn submit(
    api: &ApiClient,
    exam: &str,
    items: Vec<String>,
    file: Option<&str>,
    strategy: &str,
    start: bool,
) -> Result<()> {
    let mut specs = items;
    if let Some(path) = file {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read items file: {}", path))?;
        specs.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(String::from),
        );
    }
    if specs.is_empty() {
        bail!("No items given. Pass payload refs as arguments or use --file");
    }

    let items: Vec<NewItem> = specs.iter().map(|s| parse_item(s)).collect();
    let response: SubmitResponse = api
        .post(
            "batches",
            &json!({ "examId": exam, "items": items, "strategy": strategy }),
        )
        .await?;
    println!("Submitted job {} ({} items)", response.job_id, items.len());

    if start {
        control(api, &response.job_id, "start").await?;
    }
    Ok(())
}

pub async fn control(api: &ApiClient, id: &str, action: &str) -> Result<()> {
    let snapshot: JobSnapshot = api
        .post(&format!("batches/{}/control", id), &json!({ "action": action }))
        .await?;
    print_snapshot(&snapshot);
    Ok(())
}

pub async fn status(api: &ApiClient, id: &str) -> Result<()> {
    let snapshot: JobSnapshot = api.get(&format!("batches/{}", id)).await?;
    print_snapshot(&snapshot);
    Ok(())
}

pub async fn list(api: &ApiClient) -> Result<()> {
    let jobs: Vec<JobSnapshot> = api.get("batches").await?;
    if jobs.is_empty() {
        println!("No jobs");
        return Ok(());
    }
    println!(
        "{:<38} {:<12} {:<11} {:>9} {:>7}",
        "JOB", "EXAM", "STATE", "DONE", "FAILED"
    );
    for job in jobs {
        println!(
            "{:<38} {:<12} {:<11} {:>9} {:>7}",
            job.job_id.to_string(),
            job.exam_id,
            job.state.to_string(),
            format!("{}/{}", job.done_count, job.total_items),
            job.failed_count
        );
    }
    Ok(())
}

pub async fn workloads(api: &ApiClient, id: &str) -> Result<()> {
    let workloads: Vec<GraderWorkload> = api.get(&format!("batches/{}/graders", id)).await?;
    if workloads.is_empty() {
        println!("No items have been assigned yet");
        return Ok(());
    }
    println!(
        "{:<16} {:>8} {:>9} {:>7} {:>8} {:>7} {:>10}",
        "GRADER", "ASSIGNED", "COMPLETED", "FAILED", "PENDING", "RATE", "AVG MS"
    );
    for w in workloads {
        let avg = w
            .avg_duration_ms
            .map(|ms| format!("{:.0}", ms))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<16} {:>8} {:>9} {:>7} {:>8} {:>6.0}% {:>10}",
            w.grader_id.to_string(),
            w.assigned_count,
            w.completed_count,
            w.failed_count,
            w.pending_count,
            w.completion_rate * 100.0,
            avg
        );
    }
    Ok(())
}

/// `payload-ref` or `payload-ref#category`. Payload refs are opaque and
/// often URIs, so `:` and `/` never split.
fn parse_item(spec: &str) -> NewItem {
    match spec.rsplit_once('#') {
        Some((payload, category)) if !payload.is_empty() && !category.is_empty() => {
            NewItem::new(payload).with_category(category)
        }
        _ => NewItem::new(spec),
    }
}

fn print_snapshot(s: &JobSnapshot) {
    println!("Job:        {}", s.job_id);
    println!("Exam:       {}", s.exam_id);
    println!("Strategy:   {}", s.strategy);
    println!("State:      {}", s.state);
    println!(
        "Progress:   {}/{} done, {} failed, {} queued, {} in flight ({:.1}%)",
        s.done_count,
        s.total_items,
        s.failed_count,
        s.queued_count,
        s.in_flight_count,
        s.completion_rate * 100.0
    );
    if let Some(eta) = &s.estimated_completion {
        println!(
            "Estimate:   {} ({:.2} items/s)",
            eta.completes_at.to_rfc3339(),
            eta.throughput_per_sec
        );
    }
    if !s.errors.is_empty() {
        println!("Errors:");
        for e in &s.errors {
            println!("  {} {}: {}", e.timestamp.to_rfc3339(), e.item_id, e.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_item_with_category() {
        let item = parse_item("s3://sheets/17.pdf#algebra");
        assert_eq!(item.payload_ref, "s3://sheets/17.pdf");
        assert_eq!(item.category.as_deref(), Some("algebra"));
    }

    #[test]
    fn test_parse_item_without_category() {
        let item = parse_item("sheet-17");
        assert_eq!(item.payload_ref, "sheet-17");
        assert!(item.category.is_none());

        let trailing = parse_item("sheet-18#");
        assert_eq!(trailing.payload_ref, "sheet-18#");
        assert!(trailing.category.is_none());
    }

    #[test]
    fn test_parse_item_keeps_uri_intact() {
        let item = parse_item("s3://bucket/sheet-1");
        assert_eq!(item.payload_ref, "s3://bucket/sheet-1");
        assert!(item.category.is_none());

        let urn = parse_item("urn:exam:2026:sheet-9");
        assert_eq!(urn.payload_ref, "urn:exam:2026:sheet-9");
        assert!(urn.category.is_none());
    }
}
