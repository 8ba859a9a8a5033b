//! Migration handshake and tablet reporting against the root node.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, info, warn};

use super::handshake::{MigrationHandshake, MigrationStage};
use super::report::ReportSequence;
use super::task::{
    MigrationCompletion, MigrationDestination, MigrationTask, TabletReportBatch,
    TabletReportInfo,
};
use crate::client::{ChunkClient, RootClient, bounded};
use crate::config::ClientConfig;
use crate::constants::DEFAULT_REPORT_BATCH_SIZE;
use crate::error::RpcResult;
use crate::metrics;
use crate::observability::migration_span;
use crate::payload::TableImportInfo;
use crate::types::{Address, RangeDescriptor, TableId, TabletLocation};

/// Sequences migration steps and reports for one storage node.
///
/// Holds no per-task state: a [`MigrationHandshake`] owned by the caller
/// carries the stage of each migration, and every step here is exactly one
/// remote call. Nothing is retried.
pub struct MigrationCoordinator {
    root_client: Arc<dyn RootClient>,
    chunk_client: Arc<dyn ChunkClient>,
    root: Address,
    self_address: Address,
    rpc_timeout: Duration,
    migration_timeout: Duration,
    report_batch_size: usize,
}

impl MigrationCoordinator {
    /// `self_address` is this node: the reporter, and the source of the
    /// migrations it starts. `rpc_timeout` bounds every root call;
    /// `migration_timeout` bounds the load request to the destination.
    pub fn new(
        root_client: Arc<dyn RootClient>,
        chunk_client: Arc<dyn ChunkClient>,
        root: Address,
        self_address: Address,
        rpc_timeout: Duration,
        migration_timeout: Duration,
    ) -> Self {
        Self {
            root_client,
            chunk_client,
            root,
            self_address,
            rpc_timeout,
            migration_timeout,
            report_batch_size: DEFAULT_REPORT_BATCH_SIZE,
        }
    }

    pub fn from_config(
        root_client: Arc<dyn RootClient>,
        chunk_client: Arc<dyn ChunkClient>,
        config: &ClientConfig,
    ) -> Self {
        Self::new(
            root_client,
            chunk_client,
            config.root_server.clone(),
            config.self_address.clone(),
            config.rpc_timeout,
            config.migration_timeout,
        )
        .with_report_batch_size(config.report_batch_size)
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn migration_timeout(&self) -> Duration {
        self.migration_timeout
    }

    pub fn with_report_batch_size(mut self, batch_size: usize) -> Self {
        self.report_batch_size = batch_size;
        self
    }

    pub fn self_address(&self) -> &Address {
        &self.self_address
    }

    // ========================================================================
    // Single migration steps
    // ========================================================================

    /// Ask the root for a disk and path that can hold `occupy_size` bytes.
    pub async fn get_migration_destination(
        &self,
        occupy_size: u64,
    ) -> RpcResult<MigrationDestination> {
        self.root_client
            .get_migrate_destination(self.rpc_timeout, &self.root, occupy_size)
            .await
    }

    /// Tell `task.dest()` to pull and verify the task's files.
    pub async fn request_load(&self, task: &MigrationTask) -> RpcResult<()> {
        bounded(
            self.migration_timeout,
            task.dest(),
            self.chunk_client.load_tablet(self.migration_timeout, task),
        )
        .await
    }

    /// Tell the root the handshake is done.
    ///
    /// Safe to resend with identical parameters; the root applies a given
    /// completion once.
    pub async fn notify_migration_complete(
        &self,
        completion: &MigrationCompletion,
    ) -> RpcResult<()> {
        self.root_client
            .migrate_over(self.rpc_timeout, &self.root, completion)
            .await
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    /// Start a migration of `range` from this node to `dest`.
    ///
    /// `range` must be one this node serves; the root rejects the final
    /// completion otherwise, and the handshake ends `Failed`.
    pub async fn select_destination(
        &self,
        range: RangeDescriptor,
        dest: Address,
        occupy_size: u64,
    ) -> RpcResult<MigrationHandshake> {
        let span = migration_span(&range, &self.self_address, MigrationStage::Selected.as_str());
        let destination = self
            .step(
                MigrationStage::Selected,
                self.get_migration_destination(occupy_size),
            )
            .instrument(span)
            .await?;

        debug!(
            range = %range,
            dest = %dest,
            disk_no = destination.disk_no,
            path = %destination.path,
            "Migration destination selected"
        );
        Ok(MigrationHandshake::new(
            range,
            self.self_address.clone(),
            dest,
            occupy_size,
            destination,
        ))
    }

    /// Build the load task below the selected path and send it.
    ///
    /// `file_names` are joined onto the destination path the root assigned.
    pub async fn load(
        &self,
        handshake: &mut MigrationHandshake,
        tablet_version: i64,
        tablet_seq_num: i64,
        checksum: u64,
        file_names: &[&str],
    ) -> RpcResult<()> {
        handshake.advance(MigrationStage::LoadRequested)?;

        let task = file_names
            .iter()
            .map(|name| handshake.destination().path.join(name))
            .collect::<RpcResult<Vec<_>>>()
            .and_then(|paths| {
                MigrationTask::new(
                    handshake.range().clone(),
                    handshake.source().clone(),
                    handshake.dest().clone(),
                    handshake.destination().disk_no,
                    tablet_version,
                    tablet_seq_num,
                    checksum,
                    paths,
                )
            });
        let task = match task {
            Ok(task) => task,
            Err(e) => {
                handshake.fail();
                return Err(e);
            }
        };

        let span = migration_span(
            handshake.range(),
            handshake.source(),
            MigrationStage::LoadRequested.as_str(),
        );
        let result = self
            .step(MigrationStage::LoadRequested, self.request_load(&task))
            .instrument(span)
            .await;
        handshake.set_task(task);

        match result {
            Ok(()) => handshake.advance(MigrationStage::LoadAcked),
            Err(e) => {
                handshake.fail();
                Err(e)
            }
        }
    }

    /// Notify the root; `keep_source = false` retires this node's replica.
    pub async fn complete(
        &self,
        handshake: &mut MigrationHandshake,
        keep_source: bool,
    ) -> RpcResult<()> {
        let completion = match (handshake.stage(), handshake.task()) {
            (MigrationStage::LoadAcked, Some(task)) => task.completion(keep_source),
            _ => {
                return handshake.advance(MigrationStage::CompletionNotified);
            }
        };

        let span = migration_span(
            handshake.range(),
            handshake.source(),
            MigrationStage::CompletionNotified.as_str(),
        );
        let result = self
            .step(
                MigrationStage::CompletionNotified,
                self.notify_migration_complete(&completion),
            )
            .instrument(span)
            .await;

        match result {
            Ok(()) => {
                handshake.advance(MigrationStage::CompletionNotified)?;
                info!(
                    range = %completion.range,
                    source = %completion.source,
                    dest = %completion.dest,
                    keep_source,
                    elapsed_ms = handshake.elapsed().as_millis() as u64,
                    "Migration complete"
                );
                Ok(())
            }
            Err(e) => {
                handshake.fail();
                Err(e)
            }
        }
    }

    async fn step<T, F>(&self, stage: MigrationStage, call: F) -> RpcResult<T>
    where
        F: Future<Output = RpcResult<T>>,
    {
        let result = call.await;
        metrics::record_migration_step(stage.as_str(), result.is_ok());
        if let Err(e) = &result {
            warn!(stage = %stage, error = %e, "Migration step failed");
        }
        result
    }

    // ========================================================================
    // Reporting
    // ========================================================================

    /// Send one batch of a reporting sequence.
    pub async fn report_tablets(&self, batch: &TabletReportBatch) -> RpcResult<()> {
        let result = self
            .root_client
            .report_tablets(self.rpc_timeout, &self.root, batch)
            .await;
        metrics::record_report_batch(result.is_ok());
        result
    }

    /// Report this node's whole tablet set as one sequence.
    ///
    /// Batches go out strictly in order; the first failure stops the
    /// sequence, and the root keeps its previous committed view. Returns the
    /// number of batches sent.
    pub async fn report_all(
        &self,
        tablets: Vec<TabletReportInfo>,
        timestamp: i64,
    ) -> RpcResult<usize> {
        let sequence = ReportSequence::new(
            self.self_address.clone(),
            tablets,
            timestamp,
            self.report_batch_size,
        )?;
        let total = sequence.remaining();

        let mut sent = 0;
        for batch in sequence {
            if let Err(e) = self.report_tablets(&batch).await {
                warn!(
                    timestamp,
                    sent,
                    total,
                    error = %e,
                    "Tablet report sequence aborted"
                );
                return Err(e);
            }
            sent += 1;
        }
        debug!(timestamp, batches = sent, "Tablet report sequence committed");
        Ok(sent)
    }

    /// Tell the root these tablets are gone from this node.
    pub async fn delete_tablets(&self, tablets: &[TabletReportInfo]) -> RpcResult<()> {
        self.root_client
            .delete_tablets(self.rpc_timeout, &self.root, &self.self_address, tablets)
            .await
    }

    /// Report the outcome of a major merge.
    pub async fn merge_tablets_over(
        &self,
        tablets: &[TabletReportInfo],
        success: bool,
    ) -> RpcResult<()> {
        self.root_client
            .merge_tablets_over(self.rpc_timeout, &self.root, tablets, success)
            .await
    }

    pub async fn report_capacity(&self, capacity: u64, used: u64) -> RpcResult<()> {
        self.root_client
            .report_capacity(self.rpc_timeout, &self.root, &self.self_address, capacity, used)
            .await
    }

    /// Report the outcome of a bulk load.
    pub async fn load_bypass_over(
        &self,
        tables: &[TableImportInfo],
        success: bool,
    ) -> RpcResult<()> {
        self.root_client
            .load_bypass_over(self.rpc_timeout, &self.root, &self.self_address, tables, success)
            .await
    }

    /// Report that a dropped table's tablets were removed here.
    pub async fn delete_table_over(&self, table_id: TableId, success: bool) -> RpcResult<()> {
        self.root_client
            .delete_table_over(
                self.rpc_timeout,
                &self.root,
                &self.self_address,
                table_id,
                success,
            )
            .await
    }

    pub async fn last_frozen_version(&self) -> RpcResult<i64> {
        self.root_client
            .get_last_frozen_version(self.rpc_timeout, &self.root)
            .await
    }

    /// Replicas of `range` as the root currently knows them.
    pub async fn tablet_info(&self, range: &RangeDescriptor) -> RpcResult<Vec<TabletLocation>> {
        self.root_client
            .get_tablet_info(self.rpc_timeout, &self.root, range)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::mock::{ChunkBehavior, MockChunkServer, MockRootServer};
    use crate::error::{RpcError, logical};
    use crate::migration::BoundedPath;
    use crate::payload::Scanner;
    use crate::protocol::CommandKind;
    use crate::types::RowKeyRange;

    fn source() -> Address {
        Address::new("cs1", 2600)
    }

    fn dest() -> Address {
        Address::new("cs2", 2600)
    }

    fn range() -> RangeDescriptor {
        RangeDescriptor::new(1001, RowKeyRange::whole())
    }

    async fn setup() -> (MockRootServer, MockChunkServer, MigrationCoordinator) {
        let root = MockRootServer::new();
        root.set_destination(Some(MigrationDestination {
            disk_no: 2,
            path: BoundedPath::new("/data/2/1001").unwrap(),
        }))
        .await;
        root.set_route(
            range(),
            vec![TabletLocation {
                server: source(),
                tablet_version: 3,
            }],
        )
        .await;

        let chunk = MockChunkServer::new();
        chunk
            .set_behavior(dest(), ChunkBehavior::Serve(Scanner::default()))
            .await;
        chunk.stage_tablet(range(), 0xbeef).await;

        let coordinator = MigrationCoordinator::new(
            Arc::new(root.clone()),
            Arc::new(chunk.clone()),
            Address::new("rs", 2500),
            source(),
            Duration::from_millis(100),
            Duration::from_millis(500),
        )
        .with_report_batch_size(2);
        (root, chunk, coordinator)
    }

    // ========================================================================
    // Handshake
    // ========================================================================

    #[tokio::test]
    async fn test_load_builds_task_below_assigned_path() {
        let (_root, chunk, coordinator) = setup().await;
        let mut hs = coordinator
            .select_destination(range(), dest(), 1000)
            .await
            .unwrap();
        coordinator
            .load(&mut hs, 3, 7, 0xbeef, &["a.sst", "b.sst"])
            .await
            .unwrap();
        assert_eq!(hs.stage(), MigrationStage::LoadAcked);

        let loaded = chunk.loaded().await;
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].dest_disk_no(), 2);
        assert_eq!(
            loaded[0]
                .file_paths()
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>(),
            vec!["/data/2/1001/a.sst", "/data/2/1001/b.sst"]
        );
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_handshake() {
        let (root, _chunk, coordinator) = setup().await;
        let mut hs = coordinator
            .select_destination(range(), dest(), 1000)
            .await
            .unwrap();
        let err = coordinator
            .load(&mut hs, 3, 7, 0xdead, &["a.sst"])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Logical { code, .. } if code == logical::CHECKSUM_MISMATCH));
        assert_eq!(hs.stage(), MigrationStage::Failed);

        // A failed handshake cannot be completed
        let err = coordinator.complete(&mut hs, false).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidStage { .. }));
        assert_eq!(root.script.call_count(CommandKind::MigrateOver).await, 0);
    }

    #[tokio::test]
    async fn test_complete_before_load_is_rejected() {
        let (root, _chunk, coordinator) = setup().await;
        let mut hs = coordinator
            .select_destination(range(), dest(), 1000)
            .await
            .unwrap();
        let err = coordinator.complete(&mut hs, true).await.unwrap_err();
        assert!(matches!(err, RpcError::InvalidStage { .. }));
        assert_eq!(hs.stage(), MigrationStage::Selected);
        assert_eq!(root.script.call_count(CommandKind::MigrateOver).await, 0);
    }

    #[tokio::test]
    async fn test_load_twice_is_rejected() {
        let (_root, chunk, coordinator) = setup().await;
        let mut hs = coordinator
            .select_destination(range(), dest(), 1000)
            .await
            .unwrap();
        coordinator
            .load(&mut hs, 3, 7, 0xbeef, &["a.sst"])
            .await
            .unwrap();
        let err = coordinator
            .load(&mut hs, 3, 7, 0xbeef, &["a.sst"])
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::InvalidStage { .. }));
        assert_eq!(chunk.loaded().await.len(), 1);
    }

    #[tokio::test]
    async fn test_no_capacity_surfaces_to_caller() {
        let (root, _chunk, coordinator) = setup().await;
        root.set_destination(None).await;
        let err = coordinator
            .select_destination(range(), dest(), 1 << 40)
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Logical { code, .. } if code == logical::NO_CAPACITY));
    }

    #[tokio::test]
    async fn test_copy_keeps_source() {
        let (root, _chunk, coordinator) = setup().await;
        let mut hs = coordinator
            .select_destination(range(), dest(), 1000)
            .await
            .unwrap();
        coordinator
            .load(&mut hs, 3, 7, 0xbeef, &["a.sst"])
            .await
            .unwrap();
        coordinator.complete(&mut hs, true).await.unwrap();
        assert_eq!(hs.stage(), MigrationStage::CompletionNotified);
        assert_eq!(root.route_addresses(&range()).await, vec![source(), dest()]);
    }

    // ========================================================================
    // Reporting and notifications
    // ========================================================================

    #[tokio::test]
    async fn test_report_all_commits_whole_set() {
        let (root, _chunk, coordinator) = setup().await;
        let tablets: Vec<_> = (0..5)
            .map(|i| TabletReportInfo {
                range: RangeDescriptor::new(i, RowKeyRange::whole()),
                row_count: 1,
                occupy_size: 1,
                checksum: i,
                tablet_version: 1,
                tablet_seq_num: 1,
            })
            .collect();

        let sent = coordinator.report_all(tablets.clone(), 100).await.unwrap();
        assert_eq!(sent, 3);
        let view = root.committed_report(&source()).await.unwrap();
        assert_eq!(view.timestamp, 100);
        assert_eq!(view.tablets, tablets);
    }

    #[tokio::test]
    async fn test_notifications_carry_self_address() {
        let (root, _chunk, coordinator) = setup().await;
        coordinator.report_capacity(1000, 400).await.unwrap();
        coordinator.delete_table_over(TableId(9), true).await.unwrap();
        coordinator
            .load_bypass_over(
                &[TableImportInfo {
                    table_id: TableId(9),
                    tablet_count: 4,
                }],
                false,
            )
            .await
            .unwrap();

        assert_eq!(root.capacity_of(&source()).await, Some((1000, 400)));
        assert_eq!(root.deleted_tables().await, vec![(source(), TableId(9), true)]);
        assert_eq!(root.bypass_loads().await[0].0, source());
    }

    #[tokio::test]
    async fn test_delete_tablets_removes_reporter_from_route() {
        let (root, _chunk, coordinator) = setup().await;
        let info = TabletReportInfo {
            range: range(),
            row_count: 0,
            occupy_size: 0,
            checksum: 0,
            tablet_version: 3,
            tablet_seq_num: 1,
        };
        coordinator.delete_tablets(&[info]).await.unwrap();
        assert!(root.route_addresses(&range()).await.is_empty());
        assert!(coordinator.tablet_info(&range()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_merge_over_reports_flag() {
        let (root, _chunk, coordinator) = setup().await;
        coordinator.merge_tablets_over(&[], false).await.unwrap();
        assert_eq!(root.merges().await, vec![(vec![], false)]);
    }

    #[tokio::test]
    async fn test_last_frozen_version() {
        let (root, _chunk, coordinator) = setup().await;
        root.set_frozen_version(12);
        assert_eq!(coordinator.last_frozen_version().await.unwrap(), 12);
    }

    // ========================================================================
    // Construction
    // ========================================================================

    #[test]
    fn test_from_config_uses_configured_timeouts() {
        let config = ClientConfig {
            rpc_timeout: Duration::from_millis(250),
            migration_timeout: Duration::from_millis(750),
            report_batch_size: 16,
            ..ClientConfig::default()
        };
        let coordinator = MigrationCoordinator::from_config(
            Arc::new(MockRootServer::new()),
            Arc::new(MockChunkServer::new()),
            &config,
        );

        assert_eq!(coordinator.rpc_timeout(), Duration::from_millis(250));
        assert_eq!(coordinator.migration_timeout(), Duration::from_millis(750));
        assert_eq!(coordinator.self_address(), &config.self_address);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_is_bounded_by_given_migration_timeout() {
        let (_root, chunk, coordinator) = setup().await;
        chunk.set_behavior(dest(), ChunkBehavior::Hang).await;
        let mut hs = coordinator
            .select_destination(range(), dest(), 1000)
            .await
            .unwrap();

        let err = coordinator
            .load(&mut hs, 3, 7, 0xbeef, &["a.sst"])
            .await
            .unwrap_err();

        assert_eq!(
            err,
            RpcError::Timeout {
                target: dest(),
                after: Duration::from_millis(500),
            }
        );
    }
}
