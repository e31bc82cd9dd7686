use cp_core::{JobOutcome, TaskStatus};

use crate::*;

/// Racing dispatches for one task: exactly one wins, every other caller
/// sees Conflict or Busy, and the ledger holds a single active job.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_single_winner() {
    const RACERS: usize = 16;
    let p = provider(ProviderOptions {
        quota: 8,
        ..ProviderOptions::default()
    });
    p.orch.ledger().create_task(&spec(1, "slow")).unwrap();

    let barrier = Arc::new(tokio::sync::Barrier::new(RACERS));
    let mut racers = Vec::new();
    for _ in 0..RACERS {
        let orch = p.orch.clone();
        let barrier = barrier.clone();
        racers.push(tokio::spawn(async move {
            barrier.wait().await;
            orch.dispatch(1)
        }));
    }

    let mut wins = 0;
    let mut losses = 0;
    for r in racers {
        match r.await.unwrap() {
            Ok(_) => wins += 1,
            Err(e) if e.is_conflict() || e.is_busy() => losses += 1,
            Err(e) => panic!("unexpected dispatch error: {e}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(losses, RACERS - 1);

    let jobs = p.orch.jobs(1).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].outcome, JobOutcome::Running);
    assert_eq!(p.orch.get_task(1).unwrap().task.status, TaskStatus::Running);
    assert_eq!(p.orch.resources().unwrap().active_jobs, 1);

    p.orch.cancel(1).unwrap();
    wait_idle(&p.orch).await;
}

/// The quota caps running workers; the overflow stays RECEIVED.
#[tokio::test]
async fn test_quota_limits_running_jobs() {
    let p = provider(ProviderOptions {
        quota: 2,
        ..ProviderOptions::default()
    });
    for id in 1..=4 {
        p.orch.receive_task(spec(id, "slow")).unwrap();
    }

    let statuses: Vec<TaskStatus> = (1..=4)
        .map(|id| p.orch.get_task(id).unwrap().task.status)
        .collect();
    assert_eq!(
        statuses,
        vec![
            TaskStatus::Running,
            TaskStatus::Running,
            TaskStatus::Received,
            TaskStatus::Received
        ]
    );
    assert!(p.orch.dispatch(3).unwrap_err().is_busy());

    for id in 1..=2 {
        p.orch.cancel(id).unwrap();
    }
    wait_idle(&p.orch).await;
}
