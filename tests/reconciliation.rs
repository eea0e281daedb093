//! Settling requests left in `processing` by a crash

mod common;

use chrono::{Duration, Utc};

use eagle_relayer::confirmation::{SweepSummary, NEVER_SUBMITTED};
use eagle_relayer::db::{BridgeStore, NewBridgeRequest};
use eagle_relayer::processor::BridgeNotification;
use eagle_relayer::types::{format_evm_address, format_tx_hash, ChainName, Status};

use common::*;

fn request(n: u64, to_chain: ChainName) -> NewBridgeRequest {
    NewBridgeRequest {
        source_tx_hash: hash_str(tx_hash(n)),
        from_chain: ChainName::XLayer,
        to_chain,
        from_address: format_evm_address(&SENDER),
        to_address: format_evm_address(&RECIPIENT),
        amount: "1000".to_string(),
        fee: "0".to_string(),
        nonce: n as i64,
        block_number: 100,
    }
}

/// Leave a row in processing as if the process died mid-execution
async fn stuck(h: &Harness, n: u64, destination_tx: Option<String>) -> String {
    let req = request(n, ChainName::Bsc);
    let hash = req.source_tx_hash.clone();
    h.store.insert_pending(&req).await.unwrap();
    assert!(h.store.mark_processing(&hash).await.unwrap());
    if let Some(tx) = destination_tx {
        assert!(h.store.record_destination_tx(&hash, &tx).await.unwrap());
    }
    h.store
        .set_updated_at(&hash, Utc::now() - Duration::hours(1))
        .await;
    hash
}

#[tokio::test]
async fn test_sweep_settles_stuck_rows_from_destination_state() {
    let h = Harness::new();

    let landed_tx = tx_hash(0xa1);
    h.bsc.set_tx_status(landed_tx, true);
    let landed = stuck(&h, 1, Some(format_tx_hash(&landed_tx))).await;

    let reverted_tx = tx_hash(0xa2);
    h.bsc.set_tx_status(reverted_tx, false);
    let reverted = stuck(&h, 2, Some(format_tx_hash(&reverted_tx))).await;

    let unseen = stuck(&h, 3, Some(format_tx_hash(&tx_hash(0xa3)))).await;
    let never_sent = stuck(&h, 4, None).await;

    // Recently touched: not stuck yet
    let fresh = request(5, ChainName::Bsc);
    h.store.insert_pending(&fresh).await.unwrap();
    h.store.mark_processing(&fresh.source_tx_hash).await.unwrap();

    let summary = h.tracker().sweep().await.unwrap();
    assert_eq!(
        summary,
        SweepSummary {
            examined: 4,
            completed: 1,
            failed: 3,
            deferred: 0,
        }
    );

    let row = h.store.get_request(&landed).await.unwrap().unwrap();
    assert_eq!(row.status, Status::Completed);
    assert_eq!(row.destination_tx_hash, Some(format_tx_hash(&landed_tx)));

    let row = h.store.get_request(&reverted).await.unwrap().unwrap();
    assert_eq!(row.status, Status::Failed);
    assert!(row.error_message.unwrap().contains("reverted"));

    let row = h.store.get_request(&unseen).await.unwrap().unwrap();
    assert_eq!(row.status, Status::Failed);
    assert!(row.error_message.unwrap().contains("not found"));

    let row = h.store.get_request(&never_sent).await.unwrap().unwrap();
    assert_eq!(row.status, Status::Failed);
    assert_eq!(row.error_message.as_deref(), Some(NEVER_SUBMITTED));

    let row = h.store.get_request(&fresh.source_tx_hash).await.unwrap().unwrap();
    assert_eq!(row.status, Status::Processing);

    // Nothing is ever resubmitted
    assert!(h.bsc.sent().is_empty());
}

#[tokio::test]
async fn test_sweep_is_idempotent() {
    let h = Harness::new();
    stuck(&h, 1, None).await;

    let tracker = h.tracker();
    assert_eq!(tracker.sweep().await.unwrap().failed, 1);
    assert_eq!(tracker.sweep().await.unwrap(), SweepSummary::default());
}

#[tokio::test]
async fn test_sweep_notifies_listeners() {
    let h = Harness::new();
    let mut notifications = h.processor.subscribe();

    let landed_tx = tx_hash(0xb1);
    h.bsc.set_tx_status(landed_tx, true);
    let hash = stuck(&h, 1, Some(format_tx_hash(&landed_tx))).await;

    h.tracker().sweep().await.unwrap();

    match notifications.recv().await.unwrap() {
        BridgeNotification::Completed(row) => assert_eq!(row.source_tx_hash, hash),
        other => panic!("unexpected notification {:?}", other),
    }
}

#[tokio::test]
async fn test_terminal_rows_are_never_touched() {
    let h = Harness::new();
    let hash = stuck(&h, 1, None).await;
    h.store.mark_failed(&hash, "original error").await.unwrap();
    h.store
        .set_updated_at(&hash, Utc::now() - Duration::hours(2))
        .await;

    let summary = h.tracker().sweep().await.unwrap();
    assert_eq!(summary.examined, 0);

    let row = h.store.get_request(&hash).await.unwrap().unwrap();
    assert_eq!(row.error_message.as_deref(), Some("original error"));
    assert!(!h.store.mark_completed(&hash, "0x00").await.unwrap());
}
