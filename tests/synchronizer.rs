//! Checkpointed catch-up and live handling of the EVM watchers

mod common;

use eagle_relayer::db::BridgeStore;
use eagle_relayer::types::{ChainName, Status};

use common::*;

#[tokio::test]
async fn test_resumes_after_persisted_checkpoint() {
    let h = Harness::new();
    h.store.advance_checkpoint(ChainName::XLayer, 1000).await.unwrap();
    h.xlayer.set_head(2000);

    let checkpoint = h.watcher(ChainName::XLayer).catch_up().await.unwrap();

    let ranges = h.xlayer.requested_ranges();
    assert_eq!(ranges[0], (1001, 1100));
    assert_eq!(ranges.len(), 10);
    assert_eq!(*ranges.last().unwrap(), (1901, 2000));
    assert_eq!(checkpoint, 2000);
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), Some(2000));
}

#[tokio::test]
async fn test_seeds_from_lookback_window_without_checkpoint() {
    let h = Harness::new();
    h.bsc.set_head(10_000);
    // Outside the 500-block lookback window
    h.bsc.add_log(bridge_initiated_log(tx_hash(1), 9_000, 1, 1000));
    // Inside it
    h.bsc.add_log(bridge_initiated_log(tx_hash(2), 9_800, 2, 1000));

    h.watcher(ChainName::Bsc).catch_up().await.unwrap();

    assert_eq!(h.bsc.requested_ranges()[0], (9_501, 9_600));
    assert!(h.store.get_request(&hash_str(tx_hash(1))).await.unwrap().is_none());
    let row = h.store.get_request(&hash_str(tx_hash(2))).await.unwrap().unwrap();
    assert_eq!(row.status, Status::Completed);
    assert_eq!(h.store.get_checkpoint(ChainName::Bsc).await.unwrap(), Some(10_000));
}

#[tokio::test]
async fn test_skips_to_head_when_too_far_behind() {
    let h = Harness::new();
    h.store.advance_checkpoint(ChainName::XLayer, 1000).await.unwrap();
    h.xlayer.set_head(50_000);

    let checkpoint = h.watcher(ChainName::XLayer).catch_up().await.unwrap();

    assert_eq!(checkpoint, 50_000);
    assert!(h.xlayer.requested_ranges().is_empty());
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), Some(50_000));
}

#[tokio::test]
async fn test_failed_batch_does_not_advance_checkpoint() {
    let h = Harness::new();
    h.store.advance_checkpoint(ChainName::XLayer, 1000).await.unwrap();
    h.xlayer.set_head(1300);
    h.xlayer.add_log(bridge_out_log(tx_hash(3), 1150, 1, 1000, BSC_CHAIN_ID));
    h.xlayer.fail_range_from(1101);

    let watcher = h.watcher(ChainName::XLayer);
    assert!(watcher.catch_up().await.is_err());
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), Some(1100));
    assert!(h.store.get_request(&hash_str(tx_hash(3))).await.unwrap().is_none());

    // The next cycle retries the same range
    h.xlayer.clear_failures();
    assert_eq!(watcher.catch_up().await.unwrap(), 1300);

    let retried = h
        .xlayer
        .requested_ranges()
        .into_iter()
        .filter(|r| *r == (1101, 1200))
        .count();
    assert_eq!(retried, 2);
    let row = h.store.get_request(&hash_str(tx_hash(3))).await.unwrap().unwrap();
    assert_eq!(row.status, Status::Completed);
}

#[tokio::test]
async fn test_checkpoint_never_moves_backwards() {
    let h = Harness::new();
    h.store.advance_checkpoint(ChainName::XLayer, 2000).await.unwrap();
    let watcher = h.watcher(ChainName::XLayer);

    // A live event from an older block is still processed
    let old = bridge_out_log(tx_hash(4), 1500, 1, 1000, BSC_CHAIN_ID);
    watcher.handle_live_log(&old).await.unwrap();
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), Some(2000));
    assert!(h.store.get_request(&hash_str(tx_hash(4))).await.unwrap().is_some());

    // A provider reporting a lower head does not rewind either
    h.xlayer.set_head(1900);
    assert_eq!(watcher.catch_up().await.unwrap(), 2000);
    assert!(h.xlayer.requested_ranges().is_empty());

    // Live events settle the blocks before theirs
    let newer = bridge_out_log(tx_hash(5), 2100, 2, 1000, BSC_CHAIN_ID);
    watcher.handle_live_log(&newer).await.unwrap();
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), Some(2099));
}

#[tokio::test]
async fn test_removed_live_logs_are_ignored() {
    let h = Harness::new();
    let mut log = bridge_out_log(tx_hash(6), 100, 1, 1000, BSC_CHAIN_ID);
    log.removed = true;

    h.watcher(ChainName::XLayer).handle_live_log(&log).await.unwrap();

    assert!(h.store.get_request(&hash_str(tx_hash(6))).await.unwrap().is_none());
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), None);
}

#[tokio::test]
async fn test_same_event_from_every_path_executes_once() {
    let h = Harness::new();
    h.store.advance_checkpoint(ChainName::XLayer, 1100).await.unwrap();
    h.xlayer.set_head(1300);

    let log = bridge_out_log(tx_hash(7), 1200, 42, 1000, BSC_CHAIN_ID);
    h.xlayer.add_log(log.clone());
    // The subscription redelivers what catch-up already scanned
    h.xlayer.push_live(log.clone());
    h.xlayer.push_live(log);
    h.xlayer.close_live();

    h.watcher(ChainName::XLayer).run_cycle().await.unwrap();

    let recovered = h
        .recovery()
        .recover(&hash_str(tx_hash(7)), ChainName::XLayer)
        .await
        .unwrap();
    assert_eq!(recovered, eagle_relayer::recovery::RecoveryOutcome::AlreadyExists);

    assert_eq!(h.bsc.sent().len(), 1);
    assert_eq!(h.store.list_recent(10).await.unwrap().len(), 1);
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), Some(1300));
}

#[tokio::test]
async fn test_live_events_after_catch_up_advance_checkpoint() {
    let h = Harness::new();
    h.store.advance_checkpoint(ChainName::Bsc, 500).await.unwrap();
    h.bsc.set_head(500);

    h.bsc.push_live(bridge_initiated_log(tx_hash(8), 505, 1, 1000));
    h.bsc.push_live(bridge_initiated_log(tx_hash(9), 507, 2, 1000));
    h.bsc.close_live();

    h.watcher(ChainName::Bsc).run_cycle().await.unwrap();

    assert_eq!(h.xlayer.sent().len(), 2);
    // Block 507 is rescanned after a restart in case it held more events
    assert_eq!(h.store.get_checkpoint(ChainName::Bsc).await.unwrap(), Some(506));
}

#[tokio::test]
async fn test_chains_progress_independently() {
    let h = Harness::new();
    h.store.advance_checkpoint(ChainName::XLayer, 1000).await.unwrap();
    h.store.advance_checkpoint(ChainName::Bsc, 1000).await.unwrap();
    h.xlayer.set_head(1200);
    h.bsc.set_head(1200);
    h.xlayer.fail_range_from(1001);
    h.bsc.add_log(bridge_initiated_log(tx_hash(10), 1050, 1, 1000));

    let xlayer = h.watcher(ChainName::XLayer);
    let bsc = h.watcher(ChainName::Bsc);
    let (x, b) = tokio::join!(xlayer.catch_up(), bsc.catch_up());

    assert!(x.is_err());
    assert_eq!(b.unwrap(), 1200);
    assert_eq!(h.store.get_checkpoint(ChainName::XLayer).await.unwrap(), Some(1000));
    assert!(h.store.get_request(&hash_str(tx_hash(10))).await.unwrap().is_some());
}
