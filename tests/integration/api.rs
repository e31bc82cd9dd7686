use std::net::SocketAddr;

use anyhow::{Context, Result};
use cp_api::ApiState;
use cp_core::TaskStatus;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::*;

// ── Harness ───────────────────────────────────────────────────────────────────

struct Api {
    base: String,
    client: reqwest::Client,
    _shutdown: broadcast::Sender<()>,
}

async fn start_api(p: &Provider) -> Result<Api> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr: SocketAddr = listener.local_addr()?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let state = ApiState {
        orchestrator: p.orch.clone(),
    };
    tokio::spawn(cp_api::serve_listener(listener, state, shutdown_rx));
    Ok(Api {
        base: format!("http://{addr}/api/v1/computing"),
        client: reqwest::Client::new(),
        _shutdown: shutdown_tx,
    })
}

impl Api {
    async fn get(&self, path: &str) -> Result<(u16, Value)> {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .with_context(|| format!("GET {path}"))?;
        let status = resp.status().as_u16();
        Ok((status, resp.json().await?))
    }

    async fn post(&self, path: &str, body: Value) -> Result<(u16, Value)> {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {path}"))?;
        let status = resp.status().as_u16();
        Ok((status, resp.json().await?))
    }
}

fn task_body(id: i64, zk_type: &str) -> Value {
    serde_json::to_value(spec(id, zk_type)).unwrap()
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_api_task_lifecycle() -> Result<()> {
    let p = provider(ProviderOptions::default());
    let api = start_api(&p).await?;

    let (status, body) = api.post("/cp/ubi", task_body(1, "groth16")).await?;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["task_id"], 1);

    wait_for(&p.orch, 1, |v| v.task.status == TaskStatus::Success).await;
    let (status, task) = api.get("/cp/ubi/tasks/1").await?;
    assert_eq!(status, 200);
    assert_eq!(task["status"], "success");
    assert_eq!(task["tx_hash"], "0xtx1");
    assert_eq!(task["reward_status"], "pending");
    assert_eq!(task["resource_type"], "gpu");
    assert_eq!(task["settlement_pending"], false);

    let callback = json!({ "tx_hash": "0xtx1", "status": "confirmed", "reward": "4.5" });
    let (status, body) = api.post("/cp/docker/receive/ubi", callback.clone()).await?;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body, json!({ "task_id": 1, "applied": true }));

    let (_, body) = api.post("/cp/docker/receive/ubi", callback).await?;
    assert_eq!(body["applied"], false);

    let (_, task) = api.get("/cp/ubi/tasks/1").await?;
    assert_eq!(task["reward_status"], "paid");
    assert_eq!(task["reward"], "4.5");

    let (status, body) = api.get("/cp/ubi/tasks/1/jobs").await?;
    assert_eq!(status, 200);
    let jobs = body["jobs"].as_array().context("jobs array")?;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["outcome"]["state"], "submitted");
    Ok(())
}

#[tokio::test]
async fn test_api_list_defaults_to_successful_tasks() -> Result<()> {
    let p = provider(ProviderOptions::default());
    let api = start_api(&p).await?;

    api.post("/cp/ubi", task_body(1, "groth16")).await?;
    api.post("/cp/ubi", task_body(2, "broken")).await?;
    wait_for(&p.orch, 1, |v| v.task.status == TaskStatus::Success).await;
    wait_for(&p.orch, 2, |v| v.task.status == TaskStatus::Failed).await;

    let ids = |body: &Value| -> Vec<i64> {
        body["tasks"]
            .as_array()
            .map(|a| a.iter().filter_map(|t| t["id"].as_i64()).collect())
            .unwrap_or_default()
    };

    let (_, body) = api.get("/cp/ubi/tasks").await?;
    assert_eq!(ids(&body), vec![1]);

    let (_, body) = api.get("/cp/ubi/tasks?all=true").await?;
    let mut all = ids(&body);
    all.sort();
    assert_eq!(all, vec![1, 2]);

    let (_, body) = api.get("/cp/ubi/tasks?status=failed").await?;
    assert_eq!(ids(&body), vec![2]);
    assert_eq!(body["tasks"][0]["failure_reason"], "execution_error");

    let (status, _) = api.get("/cp/ubi/tasks?status=exploded").await?;
    assert_eq!(status, 400);
    Ok(())
}

#[tokio::test]
async fn test_api_error_statuses() -> Result<()> {
    let p = provider(ProviderOptions::default());
    let api = start_api(&p).await?;

    let mut bad = task_body(1, "groth16");
    bad["contract"] = json!("0x1234");
    let (status, body) = api.post("/cp/ubi", bad).await?;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap_or_default().contains("contract"));

    let (status, _) = api.get("/cp/ubi/tasks/404").await?;
    assert_eq!(status, 404);

    api.post("/cp/ubi", task_body(1, "slow")).await?;
    let (status, _) = api.post("/cp/ubi", task_body(1, "slow")).await?;
    assert_eq!(status, 409);

    let (status, _) = api
        .post("/cp/docker/receive/ubi", json!({ "tx_hash": "0xnope", "status": "pending" }))
        .await?;
    assert_eq!(status, 404);

    let (status, body) = api.post("/cp/ubi/tasks/1/cancel", json!({})).await?;
    assert_eq!(status, 200);
    assert_eq!(body["cancelled"], true);
    let (_, body) = api.post("/cp/ubi/tasks/1/cancel", json!({})).await?;
    assert_eq!(body["cancelled"], false);
    wait_idle(&p.orch).await;
    Ok(())
}

#[tokio::test]
async fn test_api_provider_resources() -> Result<()> {
    let p = provider(ProviderOptions {
        quota: 3,
        ..ProviderOptions::default()
    });
    let api = start_api(&p).await?;

    let (status, body) = api.get("/cp").await?;
    assert_eq!(status, 200);
    assert_eq!(body["job_quota"], 3);
    assert_eq!(body["active_jobs"], 0);
    assert!(body["account"].is_null());

    p.orch.sync_account().await?;
    let (_, body) = api.get("/cp").await?;
    assert_eq!(body["account"]["node_id"], "cp-integration");
    assert_eq!(body["account"]["balance"], "12.5");
    Ok(())
}
