//! UBI task commands: list, detail, jobs, cancel.

use anyhow::Result;
use console::Style;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

// ── Response types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TaskJson {
    id: i64,
    name: String,
    resource_type: String,
    zk_type: String,
    contract: String,
    status: String,
    failure_reason: Option<String>,
    created_at: i64,
    tx_hash: Option<String>,
    reward_status: Option<String>,
    reward: Option<String>,
    reward_tx: Option<String>,
    challenge_tx: Option<String>,
    slash_tx: Option<String>,
    #[serde(default)]
    settlement_pending: bool,
}

#[derive(Deserialize)]
struct TaskListResponse {
    tasks: Vec<TaskJson>,
}

#[derive(Deserialize)]
struct JobOutcomeJson {
    state: String,
    reason: Option<String>,
}

#[derive(Deserialize)]
struct JobJson {
    attempt: u32,
    started_at: i64,
    ended_at: Option<i64>,
    outcome: JobOutcomeJson,
    diagnostic: Option<String>,
    engine: Option<String>,
}

#[derive(Deserialize)]
struct JobsResponse {
    task_id: i64,
    jobs: Vec<JobJson>,
}

#[derive(Deserialize)]
struct CancelResponse {
    task_id: i64,
    cancelled: bool,
}

// ── Formatting ────────────────────────────────────────────────────────────────

fn upper(s: &str) -> String {
    s.to_ascii_uppercase()
}

fn or_dash(s: Option<&str>) -> &str {
    s.filter(|v| !v.is_empty()).unwrap_or("-")
}

/// Shortens long hashes to `0x1234…abcd` for table columns.
fn short_hash(s: Option<&str>) -> String {
    match s {
        Some(h) if h.chars().count() > 14 => {
            let head: String = h.chars().take(6).collect();
            let tail: String = h.chars().skip(h.chars().count() - 4).collect();
            format!("{head}…{tail}")
        }
        other => or_dash(other).to_string(),
    }
}

fn status_label(t: &TaskJson) -> String {
    match (&t.failure_reason, t.settlement_pending) {
        (Some(r), _) => format!("{} ({})", upper(&t.status), r),
        (None, true) => format!("{} (submitting)", upper(&t.status)),
        (None, false) => upper(&t.status),
    }
}

/// Bold white while queued, cyan while running, green on success and red
/// once failed.
fn status_style(status: &str) -> Style {
    let style = Style::new().bold();
    match status.to_ascii_lowercase().as_str() {
        "received" => style.white(),
        "running" => style.cyan(),
        "success" => style.green(),
        "failed" => style.red(),
        _ => style,
    }
}

/// Status label padded to `width`, then coloured, so columns stay aligned.
fn status_cell(t: &TaskJson, width: usize) -> String {
    let label = format!("{:<width$}", status_label(t));
    status_style(&t.status).apply_to(label).to_string()
}

// ── Commands ──────────────────────────────────────────────────────────────────

pub async fn cmd_list(port: u16, show_failed: bool) -> Result<()> {
    let query = if show_failed { "?all=true" } else { "" };
    let resp: TaskListResponse =
        get_json(&format!("{}/cp/ubi/tasks{}", base_url(port), query)).await?;

    if resp.tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    println!(
        "{:<10} {:<10} {:<12} {:<14} {:<22} {:<12} {:<12}",
        "TASK ID", "TASK TYPE", "ZK TYPE", "PROOF HASH", "STATUS", "REWARD", "CREATE TIME"
    );
    for t in &resp.tasks {
        println!(
            "{:<10} {:<10} {:<12} {:<14} {} {:<12} {:<12}",
            t.id,
            upper(&t.resource_type),
            t.zk_type,
            short_hash(t.tx_hash.as_deref()),
            status_cell(t, 22),
            or_dash(t.reward.as_deref()),
            t.created_at,
        );
    }
    Ok(())
}

pub async fn cmd_detail(port: u16, task_id: &str) -> Result<()> {
    let t: TaskJson = get_json(&format!("{}/cp/ubi/tasks/{}", base_url(port), task_id)).await?;

    println!("═══════════════════════════════════════");
    println!("  Task {}", t.id);
    println!("═══════════════════════════════════════");
    println!("  Name          : {}", t.name);
    println!("  Resource      : {}", upper(&t.resource_type));
    println!("  ZK type       : {}", t.zk_type);
    println!("  Contract      : {}", t.contract);
    println!("  Status        : {}", status_cell(&t, 0));
    println!("  Created       : {}", t.created_at);
    println!("  Proof tx      : {}", or_dash(t.tx_hash.as_deref()));
    println!(
        "  Reward status : {}",
        t.reward_status.as_deref().map_or_else(|| "-".to_string(), upper)
    );
    println!("  Reward        : {}", or_dash(t.reward.as_deref()));
    if let Some(tx) = &t.reward_tx {
        println!("  Reward tx     : {}", tx);
    }
    if let Some(tx) = &t.challenge_tx {
        println!("  Challenge tx  : {}", tx);
    }
    if let Some(tx) = &t.slash_tx {
        println!("  Slash tx      : {}", tx);
    }
    Ok(())
}

pub async fn cmd_jobs(port: u16, task_id: &str) -> Result<()> {
    let resp: JobsResponse =
        get_json(&format!("{}/cp/ubi/tasks/{}/jobs", base_url(port), task_id)).await?;

    println!("Jobs for task {} ({})", resp.task_id, resp.jobs.len());
    println!();
    for j in &resp.jobs {
        let outcome = match &j.outcome.reason {
            Some(r) => format!("{} ({})", j.outcome.state, r),
            None => j.outcome.state.clone(),
        };
        println!("  ┌─ attempt {} [{}]", j.attempt, outcome);
        println!("  │  started  : {}", j.started_at);
        if let Some(ended) = j.ended_at {
            println!("  │  ended    : {} ({}s)", ended, ended - j.started_at);
        }
        if let Some(engine) = &j.engine {
            println!("  │  engine   : {}", engine);
        }
        println!("  └─ detail   : {}", or_dash(j.diagnostic.as_deref()));
    }
    Ok(())
}

pub async fn cmd_cancel(port: u16, task_id: &str) -> Result<()> {
    let resp: CancelResponse =
        post_json(&format!("{}/cp/ubi/tasks/{}/cancel", base_url(port), task_id)).await?;
    if resp.cancelled {
        println!("Task {} cancelled.", resp.task_id);
    } else {
        println!("Task {} already finished; nothing to cancel.", resp.task_id);
    }
    Ok(())
}
