//! cp-ctl — command-line interface for the computing provider daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9085;

fn print_usage() {
    println!("Usage: cp-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  account                    Show provider account and job capacity");
    println!("  ubi list [--show-failed]   List UBI tasks (successful only by default)");
    println!("  ubi detail <task-id>       Show one task and its settlement record");
    println!("  ubi jobs <task-id>         Show the execution attempts of a task");
    println!("  ubi cancel <task-id>       Cancel a running task");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["account"] | [] => cmd::account::cmd_account(port).await,
        ["ubi", "list"] | ["ubi"] => cmd::ubi::cmd_list(port, false).await,
        ["ubi", "list", "--show-failed"] => cmd::ubi::cmd_list(port, true).await,
        ["ubi", "detail", id] => cmd::ubi::cmd_detail(port, id).await,
        ["ubi", "jobs", id] => cmd::ubi::cmd_jobs(port, id).await,
        ["ubi", "cancel", id] => cmd::ubi::cmd_cancel(port, id).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
