use cp_core::{RewardStatus, TaskStatus};
use cp_services::{LedgerError, ProviderError, SettlementEvent};

use crate::*;

async fn succeeded(p: &Provider, id: TaskId) -> Task {
    p.orch.receive_task(spec(id, "groth16")).unwrap();
    wait_for(&p.orch, id, |v| v.task.status == TaskStatus::Success)
        .await
        .task
}

fn assert_invalid(err: ProviderError) {
    assert!(
        matches!(err, ProviderError::Ledger(LedgerError::InvalidTransition { .. })),
        "expected InvalidTransition, got {err}"
    );
}

/// PAID → CHALLENGED → SLASHED; nothing moves a slashed task.
#[tokio::test]
async fn test_challenge_then_slash_is_terminal() {
    let p = provider(ProviderOptions::default());
    succeeded(&p, 3).await;

    let confirmed = SettlementEvent::Confirmed {
        reward: Some("1.0".into()),
        reward_tx: Some("0xr3".into()),
    };
    assert!(p.orch.receive_proof_callback("0xtx3", confirmed).unwrap());
    assert!(p
        .orch
        .receive_proof_callback(
            "0xtx3",
            SettlementEvent::Challenged {
                challenge_tx: Some("0xc3".into())
            }
        )
        .unwrap());
    assert_eq!(
        p.orch.get_task(3).unwrap().task.reward_status,
        Some(RewardStatus::Challenged)
    );

    assert!(p
        .orch
        .receive_proof_callback(
            "0xtx3",
            SettlementEvent::Slashed {
                slash_tx: Some("0xs3".into())
            }
        )
        .unwrap());

    assert_invalid(
        p.orch
            .receive_proof_callback("0xtx3", SettlementEvent::Challenged { challenge_tx: None })
            .unwrap_err(),
    );
    assert_invalid(
        p.orch
            .receive_proof_callback("0xtx3", SettlementEvent::Defended { reward_tx: None })
            .unwrap_err(),
    );

    let task = p.orch.get_task(3).unwrap().task;
    assert_eq!(task.status, TaskStatus::Success);
    assert_eq!(task.reward_status, Some(RewardStatus::Slashed));
    assert_eq!(task.reward_tx.as_deref(), Some("0xr3"));
    assert_eq!(task.challenge_tx.as_deref(), Some("0xc3"));
    assert_eq!(task.slash_tx.as_deref(), Some("0xs3"));
}

/// Replaying the same event leaves the ledger as the first delivery left it.
#[tokio::test]
async fn test_settlement_replay_is_idempotent() {
    let p = provider(ProviderOptions::default());
    succeeded(&p, 4).await;

    let event = SettlementEvent::Confirmed {
        reward: Some("2.75".into()),
        reward_tx: Some("0xr4".into()),
    };
    assert!(p.orch.receive_proof_callback("0xtx4", event.clone()).unwrap());
    let after_first = p.orch.get_task(4).unwrap();

    for _ in 0..5 {
        assert!(!p.orch.receive_proof_callback("0xtx4", event.clone()).unwrap());
    }
    assert_eq!(p.orch.get_task(4).unwrap(), after_first);

    // A later confirmation cannot overwrite the recorded amount.
    let restated = SettlementEvent::Confirmed {
        reward: Some("999".into()),
        reward_tx: Some("0xother".into()),
    };
    assert!(!p.orch.receive_proof_callback("0xtx4", restated).unwrap());
    assert_eq!(p.orch.get_task(4).unwrap(), after_first);
}

#[tokio::test]
async fn test_settlement_for_wrong_or_unknown_tx() {
    let p = provider(ProviderOptions::default());
    let task = succeeded(&p, 6).await;

    let err = p
        .orch
        .receive_proof_callback("0xmissing", SettlementEvent::Pending)
        .unwrap_err();
    assert!(matches!(err, ProviderError::Ledger(LedgerError::UnknownTx(_))));

    let mut forged = task.clone();
    forged.tx_hash = Some("0xforged".into());
    let err = p
        .orch
        .apply_settlement(
            &forged,
            SettlementEvent::Confirmed {
                reward: None,
                reward_tx: None,
            },
        )
        .unwrap_err();
    assert!(matches!(err, ProviderError::Ledger(LedgerError::ProofMismatch { .. })));
    assert_eq!(
        p.orch.get_task(6).unwrap().task.reward_status,
        Some(RewardStatus::Pending)
    );
}

/// Defended only answers a challenge.
#[tokio::test]
async fn test_defended_restores_paid() {
    let p = provider(ProviderOptions::default());
    succeeded(&p, 7).await;

    assert_invalid(
        p.orch
            .receive_proof_callback("0xtx7", SettlementEvent::Defended { reward_tx: None })
            .unwrap_err(),
    );
    assert!(p
        .orch
        .receive_proof_callback("0xtx7", SettlementEvent::Challenged { challenge_tx: None })
        .unwrap());
    assert_invalid(
        p.orch
            .receive_proof_callback(
                "0xtx7",
                SettlementEvent::Confirmed {
                    reward: None,
                    reward_tx: None
                }
            )
            .unwrap_err(),
    );
    assert!(p
        .orch
        .receive_proof_callback(
            "0xtx7",
            SettlementEvent::Defended {
                reward_tx: Some("0xr7".into())
            }
        )
        .unwrap());

    let task = p.orch.get_task(7).unwrap().task;
    assert_eq!(task.reward_status, Some(RewardStatus::Paid));
    assert_eq!(task.reward_tx.as_deref(), Some("0xr7"));
}
