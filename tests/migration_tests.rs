//! Migration handshake and tablet reporting against in-memory root and
//! storage nodes.

use std::sync::Arc;
use std::time::Duration;

use tabletrpc::client::mock::{ChunkBehavior, MockChunkServer, MockRootServer};
use tabletrpc::error::logical;
use tabletrpc::migration::{MigrationDestination, BoundedPath};
use tabletrpc::prelude::*;
use tabletrpc::protocol::CommandKind;

fn root_addr() -> Address {
    Address::new("root", 2500)
}

fn source() -> Address {
    Address::new("cs1", 2600)
}

fn dest() -> Address {
    Address::new("cs2", 2600)
}

fn range() -> RangeDescriptor {
    RangeDescriptor::new(5, RowKeyRange::whole())
}

struct Cluster {
    root: MockRootServer,
    chunks: MockChunkServer,
    coordinator: MigrationCoordinator,
}

async fn cluster() -> Cluster {
    let root = MockRootServer::new();
    let chunks = MockChunkServer::new();

    root.set_route(
        range(),
        vec![TabletLocation {
            server: source(),
            tablet_version: 7,
        }],
    )
    .await;
    root.set_destination(Some(MigrationDestination {
        disk_no: 2,
        path: BoundedPath::new("/data/2").unwrap(),
    }))
    .await;
    chunks
        .set_behavior(dest(), ChunkBehavior::Serve(Scanner::default()))
        .await;
    chunks.stage_tablet(range(), 0xfeed).await;

    let coordinator = MigrationCoordinator::new(
        Arc::new(root.clone()),
        Arc::new(chunks.clone()),
        root_addr(),
        source(),
        Duration::from_millis(100),
        Duration::from_millis(500),
    );

    Cluster {
        root,
        chunks,
        coordinator,
    }
}

// ============================================================================
// Handshake
// ============================================================================

#[tokio::test]
async fn test_move_replaces_source_replica() {
    let c = cluster().await;

    let mut hs = c
        .coordinator
        .select_destination(range(), dest(), 1000)
        .await
        .unwrap();
    assert_eq!(hs.stage(), MigrationStage::Selected);
    assert_eq!(hs.destination().disk_no, 2);

    c.coordinator
        .load(&mut hs, 8, 2, 0xfeed, &["t1.sst", "t2.sst"])
        .await
        .unwrap();
    assert_eq!(hs.stage(), MigrationStage::LoadAcked);

    c.coordinator.complete(&mut hs, false).await.unwrap();
    assert_eq!(hs.stage(), MigrationStage::CompletionNotified);

    assert_eq!(c.root.route_addresses(&range()).await, vec![dest()]);
    assert_eq!(c.root.requested_sizes().await, vec![1000]);

    let loaded = c.chunks.loaded().await;
    assert_eq!(loaded.len(), 1);
    let paths: Vec<&str> = loaded[0].file_paths().iter().map(|p| p.as_str()).collect();
    assert_eq!(paths, vec!["/data/2/t1.sst", "/data/2/t2.sst"]);
    assert_eq!(loaded[0].dest_disk_no(), 2);
}

#[tokio::test]
async fn test_copy_keeps_both_replicas() {
    let c = cluster().await;

    let mut hs = c
        .coordinator
        .select_destination(range(), dest(), 1)
        .await
        .unwrap();
    c.coordinator
        .load(&mut hs, 8, 2, 0xfeed, &["t1.sst"])
        .await
        .unwrap();
    c.coordinator.complete(&mut hs, true).await.unwrap();

    assert_eq!(
        c.root.route_addresses(&range()).await,
        vec![source(), dest()]
    );
}

#[tokio::test]
async fn test_duplicate_completion_is_idempotent() {
    let c = cluster().await;

    let mut hs = c
        .coordinator
        .select_destination(range(), dest(), 1)
        .await
        .unwrap();
    c.coordinator
        .load(&mut hs, 8, 2, 0xfeed, &["t1.sst"])
        .await
        .unwrap();
    let completion = hs.task().unwrap().completion(false);
    c.coordinator.complete(&mut hs, false).await.unwrap();

    // A lost acknowledgement makes the source send the notice again.
    c.coordinator
        .notify_migration_complete(&completion)
        .await
        .unwrap();

    assert_eq!(c.root.applied_migrations().await, 1);
    assert_eq!(c.root.route_addresses(&range()).await, vec![dest()]);
}

#[tokio::test]
async fn test_checksum_mismatch_fails_handshake() {
    let c = cluster().await;

    let mut hs = c
        .coordinator
        .select_destination(range(), dest(), 1)
        .await
        .unwrap();
    let err = c
        .coordinator
        .load(&mut hs, 8, 2, 0xbad, &["t1.sst"])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RpcError::Logical {
            code: logical::CHECKSUM_MISMATCH,
            ..
        }
    ));
    assert_eq!(hs.stage(), MigrationStage::Failed);

    // A failed handshake cannot be completed; the root is never told.
    let err = c.coordinator.complete(&mut hs, false).await.unwrap_err();
    assert!(matches!(err, RpcError::InvalidStage { .. }));
    assert_eq!(c.root.script.call_count(CommandKind::MigrateOver).await, 0);
    assert_eq!(c.root.route_addresses(&range()).await, vec![source()]);
}

#[tokio::test(start_paused = true)]
async fn test_unresponsive_destination_times_out() {
    let c = cluster().await;
    c.chunks.set_behavior(dest(), ChunkBehavior::Hang).await;

    let mut hs = c
        .coordinator
        .select_destination(range(), dest(), 1)
        .await
        .unwrap();
    let err = c
        .coordinator
        .load(&mut hs, 8, 2, 0xfeed, &["t1.sst"])
        .await
        .unwrap_err();

    assert!(matches!(err, RpcError::Timeout { .. }));
    assert_eq!(hs.stage(), MigrationStage::Failed);
}

#[tokio::test]
async fn test_no_capacity_surfaces_logical_error() {
    let c = cluster().await;
    c.root.set_destination(None).await;

    let err = c
        .coordinator
        .select_destination(range(), dest(), 1 << 40)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RpcError::Logical {
            code: logical::NO_CAPACITY,
            ..
        }
    ));
}

#[tokio::test]
async fn test_completion_for_unserved_range_is_refused() {
    let c = cluster().await;
    let other = Address::new("cs3", 2600);
    c.root
        .set_route(
            range(),
            vec![TabletLocation {
                server: other.clone(),
                tablet_version: 7,
            }],
        )
        .await;

    let mut hs = c
        .coordinator
        .select_destination(range(), dest(), 1)
        .await
        .unwrap();
    c.coordinator
        .load(&mut hs, 8, 2, 0xfeed, &["t1.sst"])
        .await
        .unwrap();
    let err = c.coordinator.complete(&mut hs, false).await.unwrap_err();

    assert!(matches!(
        err,
        RpcError::Logical {
            code: logical::NOT_FOUND,
            ..
        }
    ));
    assert_eq!(hs.stage(), MigrationStage::Failed);
    assert_eq!(c.root.route_addresses(&range()).await, vec![other]);
    assert_eq!(c.root.applied_migrations().await, 0);
}

#[tokio::test]
async fn test_complete_before_load_is_rejected() {
    let c = cluster().await;

    let mut hs = c
        .coordinator
        .select_destination(range(), dest(), 1)
        .await
        .unwrap();
    let err = c.coordinator.complete(&mut hs, false).await.unwrap_err();

    assert!(matches!(err, RpcError::InvalidStage { .. }));
    assert_eq!(c.root.script.call_count(CommandKind::MigrateOver).await, 0);
}

// ============================================================================
// Reporting
// ============================================================================

fn tablet(table: u64, checksum: u64) -> TabletReportInfo {
    TabletReportInfo {
        range: RangeDescriptor::new(table, RowKeyRange::whole()),
        row_count: 10,
        occupy_size: 1024,
        checksum,
        tablet_version: 1,
        tablet_seq_num: 1,
    }
}

#[tokio::test]
async fn test_report_commits_only_after_last_batch() {
    let c = cluster().await;
    let coordinator = c.coordinator.with_report_batch_size(2);

    let tablets: Vec<_> = (1..=5).map(|t| tablet(t, t)).collect();
    let mut sequence = ReportSequence::new(source(), tablets, 100, 2).unwrap();

    let first = sequence.next().unwrap();
    assert!(first.has_more);
    coordinator.report_tablets(&first).await.unwrap();
    assert!(c.root.committed_report(&source()).await.is_none());
    assert_eq!(
        c.root.pending_report(&source()).await.unwrap().tablets.len(),
        2
    );

    for batch in sequence {
        coordinator.report_tablets(&batch).await.unwrap();
    }
    let committed = c.root.committed_report(&source()).await.unwrap();
    assert_eq!(committed.timestamp, 100);
    assert_eq!(committed.tablets.len(), 5);
}

#[tokio::test]
async fn test_report_all_sends_every_batch() {
    let c = cluster().await;
    let coordinator = c.coordinator.with_report_batch_size(2);

    let sent = coordinator
        .report_all((1..=5).map(|t| tablet(t, t)).collect(), 200)
        .await
        .unwrap();

    assert_eq!(sent, 3);
    assert_eq!(
        c.root.committed_report(&source()).await.unwrap().tablets.len(),
        5
    );
}

#[tokio::test]
async fn test_empty_report_still_commits() {
    let c = cluster().await;

    let sent = c.coordinator.report_all(Vec::new(), 300).await.unwrap();

    assert_eq!(sent, 1);
    let committed = c.root.committed_report(&source()).await.unwrap();
    assert!(committed.tablets.is_empty());
}

#[tokio::test]
async fn test_older_sequence_is_rejected() {
    let c = cluster().await;
    c.coordinator
        .report_all(vec![tablet(1, 1)], 500)
        .await
        .unwrap();

    let err = c
        .coordinator
        .report_all(vec![tablet(1, 2)], 400)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RpcError::Logical {
            code: logical::STALE_REPORT,
            ..
        }
    ));
    let committed = c.root.committed_report(&source()).await.unwrap();
    assert_eq!(committed.timestamp, 500);
    assert_eq!(committed.tablets[0].checksum, 1);
}

#[tokio::test]
async fn test_newer_sequence_abandons_partial_one() {
    let c = cluster().await;
    let coordinator = c.coordinator.with_report_batch_size(1);

    let mut partial = ReportSequence::new(source(), vec![tablet(1, 1), tablet(2, 2)], 600, 1)
        .unwrap();
    coordinator
        .report_tablets(&partial.next().unwrap())
        .await
        .unwrap();

    coordinator
        .report_all(vec![tablet(3, 3)], 700)
        .await
        .unwrap();

    let committed = c.root.committed_report(&source()).await.unwrap();
    assert_eq!(committed.timestamp, 700);
    assert_eq!(committed.tablets.len(), 1);

    // The rest of the abandoned sequence is refused.
    let err = coordinator
        .report_tablets(&partial.next().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Logical { .. }));
}

#[tokio::test]
async fn test_failed_batch_stops_report_sequence() {
    let c = cluster().await;
    let coordinator = c.coordinator.with_report_batch_size(1);
    coordinator
        .report_all(vec![tablet(1, 1)], 10)
        .await
        .unwrap();

    let timeout = RpcError::Timeout {
        target: root_addr(),
        after: Duration::from_millis(5),
    };
    c.root
        .script
        .fail_nth(CommandKind::ReportTablets, 2, timeout.clone())
        .await;

    let err = coordinator
        .report_all(vec![tablet(1, 7), tablet(2, 7), tablet(3, 7)], 20)
        .await
        .unwrap_err();

    assert_eq!(err, timeout);
    // One batch of the earlier report, then two of this one; the third never goes out.
    assert_eq!(c.root.script.call_count(CommandKind::ReportTablets).await, 3);
    let committed = c.root.committed_report(&source()).await.unwrap();
    assert_eq!(committed.timestamp, 10);
    assert_eq!(committed.tablets, vec![tablet(1, 1)]);
}

#[tokio::test]
async fn test_interrupted_sequence_keeps_prior_commit() {
    let c = cluster().await;
    c.coordinator
        .report_all(vec![tablet(1, 1)], 800)
        .await
        .unwrap();

    let mut next = ReportSequence::new(
        source(),
        vec![tablet(1, 9), tablet(2, 9), tablet(3, 9)],
        900,
        1,
    )
    .unwrap();
    for _ in 0..2 {
        c.coordinator
            .report_tablets(&next.next().unwrap())
            .await
            .unwrap();
    }
    // The third batch never lands.
    assert_eq!(next.remaining(), 1);

    let committed = c.root.committed_report(&source()).await.unwrap();
    assert_eq!(committed.timestamp, 800);
    assert_eq!(committed.tablets, vec![tablet(1, 1)]);
    assert_eq!(
        c.root.pending_report(&source()).await.unwrap().tablets.len(),
        2
    );
}
