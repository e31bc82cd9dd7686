//! Provider account command.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json};

#[derive(Deserialize)]
struct ResourcesResponse {
    account: Option<AccountJson>,
    job_quota: usize,
    active_jobs: usize,
}

#[derive(Deserialize)]
struct AccountJson {
    node_id: String,
    owner_address: String,
    beneficiary_address: String,
    balance: String,
    collateral: String,
    synced_at: i64,
}

pub async fn cmd_account(port: u16) -> Result<()> {
    let resp: ResourcesResponse = get_json(&format!("{}/cp", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Computing Provider");
    println!("═══════════════════════════════════════");
    println!("  Jobs running : {} / {}", resp.active_jobs, resp.job_quota);

    match resp.account {
        Some(a) => {
            println!("  Node ID      : {}", a.node_id);
            println!("  Owner        : {}", a.owner_address);
            println!("  Beneficiary  : {}", a.beneficiary_address);
            println!("  Balance      : {}", a.balance);
            println!("  Collateral   : {}", a.collateral);
            println!("  Synced at    : {}", a.synced_at);
        }
        None => println!("\n  Account not synced yet."),
    }

    Ok(())
}
