//! In-memory doubles for every service-client trait.
//!
//! Each double keeps just enough state to check the protocols built on top
//! of the clients: the root double holds the authoritative route table and
//! the committed report view, the chunk double serves scripted per-address
//! outcomes, and the update double tracks open transactions.
//!
//! # Usage
//!
//! This module is available when the `test-utilities` feature is enabled,
//! or during unit tests:
//!
//! ```toml
//! [dev-dependencies]
//! tabletrpc = { path = ".", features = ["test-utilities"] }
//! ```
//!
//! Every double can be told to fail a specific upcoming call with
//! `fail_next` / `fail_nth`, and counts calls per [`CommandKind`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use super::traits::{ChunkClient, RootClient, TransactionClient, UpdateClient};
use crate::error::{RpcError, RpcResult, logical};
use crate::migration::{
    MigrationCompletion, MigrationDestination, MigrationTask, TabletReportBatch,
    TabletReportInfo,
};
use crate::payload::{
    AlterTableSchema, GetParam, Mutator, PhysicalPlan, PlanResult, ScanParam, Scanner,
    SchemaSnapshot, TableImportInfo, TableSchema, TransactionRequest,
};
use crate::protocol::{CommandKind, encode_body};
use crate::transaction::{EndTransactionRequest, TransactionId};
use crate::types::{
    Address, ClusterRole, RangeDescriptor, RowKey, ServerRole, TableId, TabletLocation,
    UpdateServerInfo,
};

// ============================================================================
// Call scripting
// ============================================================================

/// Per-kind call counters plus scripted failures.
#[derive(Debug, Clone, Default)]
pub struct CallScript {
    inner: Arc<Mutex<ScriptState>>,
}

#[derive(Debug, Default)]
struct ScriptState {
    calls: HashMap<CommandKind, u64>,
    failures: HashMap<(CommandKind, u64), RpcError>,
}

impl CallScript {
    /// Fail the next call of `kind` with `error`.
    pub async fn fail_next(&self, kind: CommandKind, error: RpcError) {
        self.fail_nth(kind, 1, error).await;
    }

    /// Fail the `n`-th upcoming call of `kind` (1-based) with `error`.
    pub async fn fail_nth(&self, kind: CommandKind, n: u64, error: RpcError) {
        let mut state = self.inner.lock().await;
        let seen = state.calls.get(&kind).copied().unwrap_or(0);
        state.failures.insert((kind, seen + n), error);
    }

    /// How many calls of `kind` were made so far.
    pub async fn call_count(&self, kind: CommandKind) -> u64 {
        self.inner
            .lock()
            .await
            .calls
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Count one call and return its scripted failure, if any.
    async fn enter(&self, kind: CommandKind) -> RpcResult<()> {
        let mut state = self.inner.lock().await;
        let count = state.calls.entry(kind).or_insert(0);
        *count += 1;
        let key = (kind, *count);
        match state.failures.remove(&key) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

fn encode_scanner<T: serde::Serialize>(value: &T) -> RpcResult<Scanner> {
    Ok(Scanner(encode_body(value)?))
}

// ============================================================================
// MockRootServer
// ============================================================================

/// One reporter's accumulated report sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportView {
    pub timestamp: i64,
    pub tablets: Vec<TabletReportInfo>,
}

#[derive(Debug, Default)]
struct RootState {
    routes: HashMap<RangeDescriptor, Vec<TabletLocation>>,
    applied_migrations: HashSet<MigrationCompletion>,
    pending_reports: HashMap<Address, ReportView>,
    committed_reports: HashMap<Address, ReportView>,
    destination: Option<MigrationDestination>,
    requested_sizes: Vec<u64>,
    registrations: Vec<(Address, ServerRole)>,
    heartbeats: Vec<(Address, ServerRole)>,
    capacities: HashMap<Address, (u64, u64)>,
    deleted_tablets: Vec<(Address, Vec<TabletReportInfo>)>,
    merges: Vec<(Vec<TabletReportInfo>, bool)>,
    bypass_loads: Vec<(Address, Vec<TableImportInfo>, bool)>,
    deleted_tables: Vec<(Address, TableId, bool)>,
    tables: HashSet<String>,
    schema: SchemaSnapshot,
    cluster_role: ClusterRole,
    master_update: Option<Address>,
    master_coordinator: Option<Address>,
    update_servers: Vec<UpdateServerInfo>,
}

/// Root node double: the single writer of tablet-location metadata.
///
/// Migration completions are applied to the route table under one write
/// lock, so a concurrent `get_tablet_info` sees either the old or the new
/// list, never a half-applied one. Report sequences stay provisional until
/// their `has_more = false` batch arrives.
#[derive(Debug, Clone, Default)]
pub struct MockRootServer {
    state: Arc<RwLock<RootState>>,
    schema_version: Arc<AtomicI64>,
    frozen_version: Arc<AtomicI64>,
    pub script: CallScript,
}

impl MockRootServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the route table for one range.
    pub async fn set_route(&self, range: RangeDescriptor, replicas: Vec<TabletLocation>) {
        self.state.write().await.routes.insert(range, replicas);
    }

    /// Current replica addresses for `range`, in route-table order.
    pub async fn route_addresses(&self, range: &RangeDescriptor) -> Vec<Address> {
        self.state
            .read()
            .await
            .routes
            .get(range)
            .map(|replicas| replicas.iter().map(|r| r.server.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn set_destination(&self, destination: Option<MigrationDestination>) {
        self.state.write().await.destination = destination;
    }

    /// Sizes passed to `get_migrate_destination`, in call order.
    pub async fn requested_sizes(&self) -> Vec<u64> {
        self.state.read().await.requested_sizes.clone()
    }

    pub async fn set_cluster_role(&self, role: ClusterRole) {
        self.state.write().await.cluster_role = role;
    }

    pub async fn set_master_update(&self, master: Option<Address>) {
        self.state.write().await.master_update = master;
    }

    pub async fn set_master_coordinator(&self, master: Option<Address>) {
        self.state.write().await.master_coordinator = master;
    }

    pub async fn set_update_servers(&self, servers: Vec<UpdateServerInfo>) {
        self.state.write().await.update_servers = servers;
    }

    pub fn set_frozen_version(&self, version: i64) {
        self.frozen_version.store(version, Ordering::SeqCst);
    }

    pub fn schema_version(&self) -> i64 {
        self.schema_version.load(Ordering::SeqCst)
    }

    /// The last fully committed report sequence from `reporter`.
    pub async fn committed_report(&self, reporter: &Address) -> Option<ReportView> {
        self.state
            .read()
            .await
            .committed_reports
            .get(reporter)
            .cloned()
    }

    /// A sequence still waiting for its terminal batch.
    pub async fn pending_report(&self, reporter: &Address) -> Option<ReportView> {
        self.state
            .read()
            .await
            .pending_reports
            .get(reporter)
            .cloned()
    }

    /// Number of distinct completions applied to the route table.
    pub async fn applied_migrations(&self) -> usize {
        self.state.read().await.applied_migrations.len()
    }

    pub async fn capacity_of(&self, server: &Address) -> Option<(u64, u64)> {
        self.state.read().await.capacities.get(server).copied()
    }

    pub async fn heartbeats(&self) -> Vec<(Address, ServerRole)> {
        self.state.read().await.heartbeats.clone()
    }

    pub async fn registrations(&self) -> Vec<(Address, ServerRole)> {
        self.state.read().await.registrations.clone()
    }

    pub async fn merges(&self) -> Vec<(Vec<TabletReportInfo>, bool)> {
        self.state.read().await.merges.clone()
    }

    pub async fn deleted_tablets(&self) -> Vec<(Address, Vec<TabletReportInfo>)> {
        self.state.read().await.deleted_tablets.clone()
    }

    pub async fn bypass_loads(&self) -> Vec<(Address, Vec<TableImportInfo>, bool)> {
        self.state.read().await.bypass_loads.clone()
    }

    pub async fn deleted_tables(&self) -> Vec<(Address, TableId, bool)> {
        self.state.read().await.deleted_tables.clone()
    }
}

#[async_trait]
impl RootClient for MockRootServer {
    async fn register_server(
        &self,
        _timeout: Duration,
        _root: &Address,
        server: &Address,
        is_merger: bool,
        _server_version: &str,
    ) -> RpcResult<i32> {
        self.script.enter(CommandKind::RegisterServer).await?;
        let role = if is_merger {
            ServerRole::Merge
        } else {
            ServerRole::Chunk
        };
        self.state
            .write()
            .await
            .registrations
            .push((server.clone(), role));
        Ok(0)
    }

    async fn register_merge_server(
        &self,
        _timeout: Duration,
        _root: &Address,
        server: &Address,
        _sql_port: u16,
        _server_version: &str,
    ) -> RpcResult<i32> {
        self.script.enter(CommandKind::RegisterMergeServer).await?;
        self.state
            .write()
            .await
            .registrations
            .push((server.clone(), ServerRole::Merge));
        Ok(0)
    }

    async fn heartbeat(
        &self,
        _timeout: Duration,
        _root: &Address,
        server: &Address,
        role: ServerRole,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::Heartbeat).await?;
        self.state
            .write()
            .await
            .heartbeats
            .push((server.clone(), role));
        Ok(())
    }

    async fn report_capacity(
        &self,
        _timeout: Duration,
        _root: &Address,
        server: &Address,
        capacity: u64,
        used: u64,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::ReportCapacity).await?;
        if used > capacity {
            return Err(RpcError::logical(
                logical::INTERNAL,
                format!("used {} exceeds capacity {}", used, capacity),
            ));
        }
        self.state
            .write()
            .await
            .capacities
            .insert(server.clone(), (capacity, used));
        Ok(())
    }

    async fn find_update_server(&self, _timeout: Duration, _root: &Address) -> RpcResult<Address> {
        self.script.enter(CommandKind::FindUpdateServer).await?;
        self.current_master_update().await
    }

    async fn fetch_update_server(
        &self,
        _timeout: Duration,
        _root: &Address,
        _for_merge: bool,
    ) -> RpcResult<Address> {
        self.script.enter(CommandKind::FetchUpdateServer).await?;
        self.current_master_update().await
    }

    async fn fetch_update_server_list(
        &self,
        _timeout: Duration,
        _root: &Address,
    ) -> RpcResult<Vec<UpdateServerInfo>> {
        self.script.enter(CommandKind::FetchUpdateServerList).await?;
        Ok(self.state.read().await.update_servers.clone())
    }

    async fn fetch_tablet_location(
        &self,
        _timeout: Duration,
        _root: &Address,
        _root_table_id: TableId,
        table_id: TableId,
        _row_key: &RowKey,
    ) -> RpcResult<Scanner> {
        self.script.enter(CommandKind::FetchTabletLocation).await?;
        let state = self.state.read().await;
        // Key comparison is out of scope here; any range of the table matches.
        let replicas = state
            .routes
            .iter()
            .find(|(range, _)| range.table_id == table_id)
            .map(|(_, replicas)| replicas.clone())
            .ok_or_else(|| {
                RpcError::logical(logical::NOT_FOUND, format!("no tablets for table {}", table_id))
            })?;
        encode_scanner(&replicas)
    }

    async fn get_tablet_info(
        &self,
        _timeout: Duration,
        _root: &Address,
        range: &RangeDescriptor,
    ) -> RpcResult<Vec<TabletLocation>> {
        self.script.enter(CommandKind::GetTabletInfo).await?;
        self.state
            .read()
            .await
            .routes
            .get(range)
            .cloned()
            .ok_or_else(|| RpcError::logical(logical::NOT_FOUND, format!("no route for {}", range)))
    }

    async fn fetch_schema(
        &self,
        _timeout: Duration,
        _root: &Address,
        _timestamp: i64,
        _only_core_tables: bool,
    ) -> RpcResult<SchemaSnapshot> {
        self.script.enter(CommandKind::FetchSchema).await?;
        Ok(self.state.read().await.schema.clone())
    }

    async fn fetch_schema_version(&self, _timeout: Duration, _root: &Address) -> RpcResult<i64> {
        self.script.enter(CommandKind::FetchSchemaVersion).await?;
        Ok(self.schema_version())
    }

    async fn create_table(
        &self,
        _timeout: Duration,
        _root: &Address,
        if_not_exists: bool,
        schema: &TableSchema,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::CreateTable).await?;
        // The schema payload is opaque; its bytes stand in for the table name.
        let name = String::from_utf8_lossy(schema.as_bytes()).into_owned();
        let mut state = self.state.write().await;
        if !state.tables.insert(name.clone()) {
            if if_not_exists {
                return Ok(());
            }
            return Err(RpcError::logical(
                logical::INTERNAL,
                format!("table {} already exists", name),
            ));
        }
        state.schema = SchemaSnapshot(schema.0.clone());
        self.schema_version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn drop_table(
        &self,
        _timeout: Duration,
        _root: &Address,
        if_exists: bool,
        tables: &[String],
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::DropTable).await?;
        let mut state = self.state.write().await;
        for name in tables {
            if !state.tables.remove(name) && !if_exists {
                return Err(RpcError::logical(
                    logical::NOT_FOUND,
                    format!("table {} does not exist", name),
                ));
            }
        }
        self.schema_version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn alter_table(
        &self,
        _timeout: Duration,
        _root: &Address,
        schema: &AlterTableSchema,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::AlterTable).await?;
        self.state.write().await.schema = SchemaSnapshot(schema.0.clone());
        self.schema_version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_last_frozen_version(&self, _timeout: Duration, _root: &Address) -> RpcResult<i64> {
        self.script.enter(CommandKind::GetLastFrozenVersion).await?;
        Ok(self.frozen_version.load(Ordering::SeqCst))
    }

    async fn get_migrate_destination(
        &self,
        _timeout: Duration,
        _root: &Address,
        occupy_size: u64,
    ) -> RpcResult<MigrationDestination> {
        self.script.enter(CommandKind::GetMigrateDestination).await?;
        let mut state = self.state.write().await;
        state.requested_sizes.push(occupy_size);
        state.destination.clone().ok_or_else(|| {
            RpcError::logical(
                logical::NO_CAPACITY,
                format!("no disk can hold {} bytes", occupy_size),
            )
        })
    }

    async fn migrate_over(
        &self,
        _timeout: Duration,
        _root: &Address,
        completion: &MigrationCompletion,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::MigrateOver).await?;
        let mut state = self.state.write().await;
        if state.applied_migrations.contains(completion) {
            return Ok(());
        }
        let replicas = state
            .routes
            .get_mut(&completion.range)
            .ok_or_else(|| {
                RpcError::logical(
                    logical::NOT_FOUND,
                    format!("no route for {}", completion.range),
                )
            })?;

        if !replicas.iter().any(|r| r.server == completion.source) {
            return Err(RpcError::logical(
                logical::NOT_FOUND,
                format!("{} does not serve {}", completion.source, completion.range),
            ));
        }

        if !completion.keep_source {
            replicas.retain(|r| r.server != completion.source);
        }
        match replicas.iter_mut().find(|r| r.server == completion.dest) {
            Some(existing) => existing.tablet_version = completion.tablet_version,
            None => replicas.push(TabletLocation {
                server: completion.dest.clone(),
                tablet_version: completion.tablet_version,
            }),
        }
        state.applied_migrations.insert(completion.clone());
        Ok(())
    }

    async fn report_tablets(
        &self,
        _timeout: Duration,
        _root: &Address,
        batch: &TabletReportBatch,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::ReportTablets).await?;
        let mut state = self.state.write().await;

        let committed_ts = state
            .committed_reports
            .get(&batch.reporter)
            .map(|v| v.timestamp);
        let pending_ts = state
            .pending_reports
            .get(&batch.reporter)
            .map(|v| v.timestamp);
        let newest = committed_ts.max(pending_ts);
        if newest.is_some_and(|ts| batch.timestamp < ts)
            || committed_ts.is_some_and(|ts| batch.timestamp == ts)
        {
            return Err(RpcError::logical(
                logical::STALE_REPORT,
                format!(
                    "report from {} at {} is older than {:?}",
                    batch.reporter, batch.timestamp, newest
                ),
            ));
        }

        let pending = state
            .pending_reports
            .entry(batch.reporter.clone())
            .or_default();
        if pending.timestamp != batch.timestamp {
            // A newer sequence abandons whatever partial one was in flight.
            *pending = ReportView {
                timestamp: batch.timestamp,
                tablets: Vec::new(),
            };
        }
        pending.tablets.extend(batch.tablets.iter().cloned());

        if !batch.has_more {
            if let Some(done) = state.pending_reports.remove(&batch.reporter) {
                state.committed_reports.insert(batch.reporter.clone(), done);
            }
        }
        Ok(())
    }

    async fn delete_tablets(
        &self,
        _timeout: Duration,
        _root: &Address,
        reporter: &Address,
        tablets: &[TabletReportInfo],
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::DeleteTablets).await?;
        let mut state = self.state.write().await;
        for tablet in tablets {
            if let Some(replicas) = state.routes.get_mut(&tablet.range) {
                replicas.retain(|r| &r.server != reporter);
            }
        }
        state
            .deleted_tablets
            .push((reporter.clone(), tablets.to_vec()));
        Ok(())
    }

    async fn merge_tablets_over(
        &self,
        _timeout: Duration,
        _root: &Address,
        tablets: &[TabletReportInfo],
        success: bool,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::MergeTabletsOver).await?;
        self.state
            .write()
            .await
            .merges
            .push((tablets.to_vec(), success));
        Ok(())
    }

    async fn load_bypass_over(
        &self,
        _timeout: Duration,
        _root: &Address,
        server: &Address,
        tables: &[TableImportInfo],
        success: bool,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::LoadBypassOver).await?;
        self.state
            .write()
            .await
            .bypass_loads
            .push((server.clone(), tables.to_vec(), success));
        Ok(())
    }

    async fn delete_table_over(
        &self,
        _timeout: Duration,
        _root: &Address,
        server: &Address,
        table_id: TableId,
        success: bool,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::DeleteTableOver).await?;
        self.state
            .write()
            .await
            .deleted_tables
            .push((server.clone(), table_id, success));
        Ok(())
    }

    async fn get_cluster_role(&self, _timeout: Duration, _root: &Address) -> RpcResult<ClusterRole> {
        self.script.enter(CommandKind::GetClusterRole).await?;
        Ok(self.state.read().await.cluster_role)
    }

    async fn get_master_update_server(
        &self,
        _timeout: Duration,
        _root: &Address,
    ) -> RpcResult<Address> {
        self.script.enter(CommandKind::GetMasterUpdateServer).await?;
        self.current_master_update().await
    }

    async fn get_master_coordinator(
        &self,
        _timeout: Duration,
        _root: &Address,
    ) -> RpcResult<Address> {
        self.script.enter(CommandKind::GetMasterCoordinator).await?;
        self.state
            .read()
            .await
            .master_coordinator
            .clone()
            .ok_or_else(|| RpcError::logical(logical::NOT_FOUND, "no master root node"))
    }
}

impl MockRootServer {
    async fn current_master_update(&self) -> RpcResult<Address> {
        self.state
            .read()
            .await
            .master_update
            .clone()
            .ok_or_else(|| RpcError::logical(logical::NOT_FOUND, "no master update node"))
    }
}

// ============================================================================
// MockChunkServer
// ============================================================================

/// How a storage node double answers reads.
#[derive(Debug, Clone)]
pub enum ChunkBehavior {
    /// Answer every read with this scanner.
    Serve(Scanner),
    /// Fail every call with this error.
    Fail(RpcError),
    /// Never answer; only the caller's timeout ends the call.
    Hang,
}

/// Storage node doubles, keyed by address.
///
/// Addresses without a behavior refuse the connection.
#[derive(Debug, Clone, Default)]
pub struct MockChunkServer {
    behaviors: Arc<RwLock<HashMap<Address, ChunkBehavior>>>,
    /// Checksum the source holds for each range, checked on load.
    checksums: Arc<RwLock<HashMap<RangeDescriptor, u64>>>,
    loaded: Arc<RwLock<Vec<MigrationTask>>>,
    calls: Arc<RwLock<Vec<(CommandKind, Address)>>>,
    reloads: Arc<AtomicU64>,
}

impl MockChunkServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_behavior(&self, server: Address, behavior: ChunkBehavior) {
        self.behaviors.write().await.insert(server, behavior);
    }

    /// Record the checksum of the files that back `range`.
    pub async fn stage_tablet(&self, range: RangeDescriptor, checksum: u64) {
        self.checksums.write().await.insert(range, checksum);
    }

    /// Every call in arrival order.
    pub async fn calls(&self) -> Vec<(CommandKind, Address)> {
        self.calls.read().await.clone()
    }

    /// Addresses a read of `kind` was sent to, in order.
    pub async fn read_targets(&self, kind: CommandKind) -> Vec<Address> {
        self.calls
            .read()
            .await
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, a)| a.clone())
            .collect()
    }

    pub async fn loaded(&self) -> Vec<MigrationTask> {
        self.loaded.read().await.clone()
    }

    pub fn reload_count(&self) -> u64 {
        self.reloads.load(Ordering::SeqCst)
    }

    async fn answer(&self, kind: CommandKind, server: &Address) -> RpcResult<Scanner> {
        self.calls.write().await.push((kind, server.clone()));
        let behavior = self.behaviors.read().await.get(server).cloned();
        match behavior {
            Some(ChunkBehavior::Serve(scanner)) => Ok(scanner),
            Some(ChunkBehavior::Fail(error)) => Err(error),
            Some(ChunkBehavior::Hang) => std::future::pending().await,
            None => Err(RpcError::Transport {
                target: server.clone(),
                reason: "connection refused".into(),
            }),
        }
    }
}

#[async_trait]
impl ChunkClient for MockChunkServer {
    async fn get(
        &self,
        _timeout: Duration,
        server: &Address,
        _param: &GetParam,
    ) -> RpcResult<Scanner> {
        self.answer(CommandKind::Get, server).await
    }

    async fn scan(
        &self,
        _timeout: Duration,
        server: &Address,
        _param: &ScanParam,
    ) -> RpcResult<Scanner> {
        self.answer(CommandKind::Scan, server).await
    }

    async fn load_tablet(&self, _timeout: Duration, task: &MigrationTask) -> RpcResult<()> {
        // Destination behaves like any other target first.
        self.answer(CommandKind::LoadTablet, task.dest()).await?;

        let expected = self.checksums.read().await.get(task.range()).copied();
        match expected {
            None => Err(RpcError::logical(
                logical::NOT_FOUND,
                format!("{} holds no files for {}", task.source(), task.range()),
            )),
            Some(sum) if sum != task.checksum() => Err(RpcError::logical(
                logical::CHECKSUM_MISMATCH,
                format!("checksum {:#x} does not match {:#x}", task.checksum(), sum),
            )),
            Some(_) => {
                self.loaded.write().await.push(task.clone());
                Ok(())
            }
        }
    }

    async fn reload_config(
        &self,
        _timeout: Duration,
        server: &Address,
        _filename: &str,
    ) -> RpcResult<()> {
        self.calls
            .write()
            .await
            .push((CommandKind::ReloadConfig, server.clone()));
        self.reloads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ============================================================================
// MockUpdateServer
// ============================================================================

/// One transaction as the update double tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockTransaction {
    pub coordinator: Address,
    pub open: bool,
    /// `Some(true)` once committed, `Some(false)` once rolled back.
    pub committed: Option<bool>,
    pub plans: usize,
    pub statements: Vec<String>,
}

/// Update node double: writes plus a transaction table.
#[derive(Debug, Clone, Default)]
pub struct MockUpdateServer {
    transactions: Arc<RwLock<HashMap<TransactionId, MockTransaction>>>,
    /// Statements and plans run without a transaction, with their target.
    auto_commits: Arc<RwLock<Vec<(Address, CommandKind)>>>,
    mutations: Arc<RwLock<Vec<(Address, Mutator)>>>,
    next_id: Arc<AtomicU64>,
    pub script: CallScript,
}

impl MockUpdateServer {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            ..Default::default()
        }
    }

    pub async fn transaction(&self, id: TransactionId) -> Option<MockTransaction> {
        self.transactions.read().await.get(&id).cloned()
    }

    pub async fn auto_commits(&self) -> Vec<(Address, CommandKind)> {
        self.auto_commits.read().await.clone()
    }

    pub async fn mutations(&self) -> Vec<(Address, Mutator)> {
        self.mutations.read().await.clone()
    }

    async fn with_open<T>(
        &self,
        id: TransactionId,
        f: impl FnOnce(&mut MockTransaction) -> T,
    ) -> RpcResult<T> {
        let mut transactions = self.transactions.write().await;
        match transactions.get_mut(&id) {
            Some(txn) if txn.open => Ok(f(txn)),
            _ => Err(RpcError::logical(
                logical::TRANSACTION_CLOSED,
                format!("transaction {} is closed", id),
            )),
        }
    }
}

#[async_trait]
impl UpdateClient for MockUpdateServer {
    async fn mutate(
        &self,
        _timeout: Duration,
        server: &Address,
        mutator: &Mutator,
        has_data: bool,
    ) -> RpcResult<Scanner> {
        self.script.enter(CommandKind::Mutate).await?;
        self.mutations
            .write()
            .await
            .push((server.clone(), mutator.clone()));
        if has_data {
            Ok(Scanner(mutator.0.clone()))
        } else {
            Ok(Scanner::default())
        }
    }

    async fn apply(&self, _timeout: Duration, server: &Address, mutator: &Mutator) -> RpcResult<()> {
        self.script.enter(CommandKind::Apply).await?;
        self.mutations
            .write()
            .await
            .push((server.clone(), mutator.clone()));
        Ok(())
    }

    async fn fetch_frozen_time(
        &self,
        _timeout: Duration,
        _server: &Address,
        frozen_version: i64,
    ) -> RpcResult<i64> {
        self.script.enter(CommandKind::FetchFrozenTime).await?;
        Ok(frozen_version * 1_000)
    }
}

#[async_trait]
impl TransactionClient for MockUpdateServer {
    async fn start_transaction(
        &self,
        _timeout: Duration,
        server: &Address,
        _request: &TransactionRequest,
    ) -> RpcResult<TransactionId> {
        self.script.enter(CommandKind::StartTransaction).await?;
        let id = TransactionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.transactions.write().await.insert(
            id,
            MockTransaction {
                coordinator: server.clone(),
                open: true,
                committed: None,
                plans: 0,
                statements: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn execute_plan(
        &self,
        _timeout: Duration,
        server: &Address,
        transaction: Option<TransactionId>,
        plan: &PhysicalPlan,
    ) -> RpcResult<PlanResult> {
        self.script.enter(CommandKind::ExecutePlan).await?;
        match transaction {
            Some(id) => self.with_open(id, |txn| txn.plans += 1).await?,
            None => self
                .auto_commits
                .write()
                .await
                .push((server.clone(), CommandKind::ExecutePlan)),
        }
        Ok(PlanResult(plan.0.clone()))
    }

    async fn execute_statement(
        &self,
        _timeout: Duration,
        server: &Address,
        transaction: Option<TransactionId>,
        statement: &str,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::ExecuteStatement).await?;
        match transaction {
            Some(id) => {
                self.with_open(id, |txn| txn.statements.push(statement.to_string()))
                    .await
            }
            None => {
                self.auto_commits
                    .write()
                    .await
                    .push((server.clone(), CommandKind::ExecuteStatement));
                Ok(())
            }
        }
    }

    async fn end_transaction(
        &self,
        _timeout: Duration,
        _server: &Address,
        request: &EndTransactionRequest,
    ) -> RpcResult<()> {
        self.script.enter(CommandKind::EndTransaction).await?;
        self.with_open(request.id, |txn| {
            txn.open = false;
            txn.committed = Some(!request.rollback);
        })
        .await
    }
}
