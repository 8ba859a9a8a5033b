//! Service-client traits, one per target role.
//!
//! Each trait covers the calls addressed to one kind of cluster member, so
//! callers compose only the clients they need and tests can double each one
//! independently.
//!
//! # Available Implementations
//!
//! - [`RpcStub`](super::RpcStub): real calls over an injected [`Transport`](crate::protocol::Transport)
//! - [`mock`](super::mock): in-memory doubles for tests
//!
//! # Trait Map
//!
//! - [`RootClient`]: membership, topology, schema, migration bookkeeping and
//!   leadership queries, all answered by the root node
//! - [`ChunkClient`]: single-target reads and tablet loads on storage nodes
//! - [`UpdateClient`]: writes and frozen-version queries on the update node
//! - [`TransactionClient`]: transaction lifecycle and plan/statement execution
//!
//! Every method takes an explicit per-attempt `timeout`; there is no implicit
//! default. None of them retry.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::RpcResult;
use crate::migration::{
    MigrationCompletion, MigrationDestination, MigrationTask, TabletReportBatch,
    TabletReportInfo,
};
use crate::payload::{
    AlterTableSchema, GetParam, Mutator, PhysicalPlan, PlanResult, ScanParam, Scanner,
    SchemaSnapshot, TableImportInfo, TableSchema, TransactionRequest,
};
use crate::transaction::{EndTransactionRequest, TransactionId};
use crate::types::{
    Address, ClusterRole, RangeDescriptor, RowKey, ServerRole, TableId, TabletLocation,
    UpdateServerInfo,
};

/// Calls answered by the root node.
#[async_trait]
pub trait RootClient: Send + Sync {
    // ========================================================================
    // Membership
    // ========================================================================

    /// Register `server` as a storage (or merge, when `is_merger`) node.
    ///
    /// Returns the registration status the root assigns.
    async fn register_server(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        is_merger: bool,
        server_version: &str,
    ) -> RpcResult<i32>;

    /// Register `server` as a merge node serving SQL on `sql_port`.
    async fn register_merge_server(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        sql_port: u16,
        server_version: &str,
    ) -> RpcResult<i32>;

    /// Liveness heartbeat. Sent at the heartbeat version tag.
    async fn heartbeat(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        role: ServerRole,
    ) -> RpcResult<()>;

    /// Report total and used disk capacity for load balancing.
    async fn report_capacity(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        capacity: u64,
        used: u64,
    ) -> RpcResult<()>;

    // ========================================================================
    // Topology
    // ========================================================================

    /// The update node's virtual address.
    async fn find_update_server(&self, timeout: Duration, root: &Address) -> RpcResult<Address>;

    /// The update node to write to (or to merge from, when `for_merge`).
    async fn fetch_update_server(
        &self,
        timeout: Duration,
        root: &Address,
        for_merge: bool,
    ) -> RpcResult<Address>;

    /// Update-node replicas available for reads.
    async fn fetch_update_server_list(
        &self,
        timeout: Duration,
        root: &Address,
    ) -> RpcResult<Vec<UpdateServerInfo>>;

    /// Locations of the tablet holding `row_key`, as an encoded scanner.
    async fn fetch_tablet_location(
        &self,
        timeout: Duration,
        root: &Address,
        root_table_id: TableId,
        table_id: TableId,
        row_key: &RowKey,
    ) -> RpcResult<Scanner>;

    /// Current replicas of one tablet, with their versions.
    async fn get_tablet_info(
        &self,
        timeout: Duration,
        root: &Address,
        range: &RangeDescriptor,
    ) -> RpcResult<Vec<TabletLocation>>;

    // ========================================================================
    // Schema
    // ========================================================================

    async fn fetch_schema(
        &self,
        timeout: Duration,
        root: &Address,
        timestamp: i64,
        only_core_tables: bool,
    ) -> RpcResult<SchemaSnapshot>;

    async fn fetch_schema_version(&self, timeout: Duration, root: &Address) -> RpcResult<i64>;

    async fn create_table(
        &self,
        timeout: Duration,
        root: &Address,
        if_not_exists: bool,
        schema: &TableSchema,
    ) -> RpcResult<()>;

    async fn drop_table(
        &self,
        timeout: Duration,
        root: &Address,
        if_exists: bool,
        tables: &[String],
    ) -> RpcResult<()>;

    async fn alter_table(
        &self,
        timeout: Duration,
        root: &Address,
        schema: &AlterTableSchema,
    ) -> RpcResult<()>;

    /// Last frozen memtable version on the update node.
    async fn get_last_frozen_version(&self, timeout: Duration, root: &Address) -> RpcResult<i64>;

    // ========================================================================
    // Migration and Reporting
    // ========================================================================

    /// Ask the root to pick a destination disk and path for `occupy_size` bytes.
    async fn get_migrate_destination(
        &self,
        timeout: Duration,
        root: &Address,
        occupy_size: u64,
    ) -> RpcResult<MigrationDestination>;

    /// Tell the root a migration handshake is done.
    async fn migrate_over(
        &self,
        timeout: Duration,
        root: &Address,
        completion: &MigrationCompletion,
    ) -> RpcResult<()>;

    /// Send one batch of a reporting sequence.
    async fn report_tablets(
        &self,
        timeout: Duration,
        root: &Address,
        batch: &TabletReportBatch,
    ) -> RpcResult<()>;

    /// Tell the root these tablets were removed from `reporter`.
    async fn delete_tablets(
        &self,
        timeout: Duration,
        root: &Address,
        reporter: &Address,
        tablets: &[TabletReportInfo],
    ) -> RpcResult<()>;

    /// Report the outcome of a major merge over `tablets`.
    async fn merge_tablets_over(
        &self,
        timeout: Duration,
        root: &Address,
        tablets: &[TabletReportInfo],
        success: bool,
    ) -> RpcResult<()>;

    /// Report the outcome of a bulk load.
    async fn load_bypass_over(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        tables: &[TableImportInfo],
        success: bool,
    ) -> RpcResult<()>;

    /// Report that a dropped table's tablets were removed from `server`.
    async fn delete_table_over(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        table_id: TableId,
        success: bool,
    ) -> RpcResult<()>;

    // ========================================================================
    // Leadership
    // ========================================================================

    /// The queried root node's own cluster role.
    async fn get_cluster_role(&self, timeout: Duration, root: &Address) -> RpcResult<ClusterRole>;

    /// The update-node replica currently authoritative for writes.
    async fn get_master_update_server(
        &self,
        timeout: Duration,
        root: &Address,
    ) -> RpcResult<Address>;

    /// The authoritative root node in a multi-root deployment.
    async fn get_master_coordinator(&self, timeout: Duration, root: &Address)
    -> RpcResult<Address>;
}

/// Single-target calls on storage nodes.
#[async_trait]
pub trait ChunkClient: Send + Sync {
    async fn get(
        &self,
        timeout: Duration,
        server: &Address,
        param: &GetParam,
    ) -> RpcResult<Scanner>;

    async fn scan(
        &self,
        timeout: Duration,
        server: &Address,
        param: &ScanParam,
    ) -> RpcResult<Scanner>;

    /// Ask `task.dest()` to pull and checksum the task's files.
    async fn load_tablet(&self, timeout: Duration, task: &MigrationTask) -> RpcResult<()>;

    /// Make `server` reload its configuration file.
    async fn reload_config(
        &self,
        timeout: Duration,
        server: &Address,
        filename: &str,
    ) -> RpcResult<()>;
}

/// Writes and version queries on the update node.
#[async_trait]
pub trait UpdateClient: Send + Sync {
    /// Apply a mutation, returning affected rows when `has_data`.
    async fn mutate(
        &self,
        timeout: Duration,
        server: &Address,
        mutator: &Mutator,
        has_data: bool,
    ) -> RpcResult<Scanner>;

    /// Apply a mutation without a result.
    async fn apply(&self, timeout: Duration, server: &Address, mutator: &Mutator)
    -> RpcResult<()>;

    /// When `frozen_version` was frozen.
    async fn fetch_frozen_time(
        &self,
        timeout: Duration,
        server: &Address,
        frozen_version: i64,
    ) -> RpcResult<i64>;
}

/// Transaction lifecycle on the update node.
#[async_trait]
pub trait TransactionClient: Send + Sync {
    async fn start_transaction(
        &self,
        timeout: Duration,
        server: &Address,
        request: &TransactionRequest,
    ) -> RpcResult<TransactionId>;

    /// Execute a plan inside `transaction`, or auto-committed when `None`.
    async fn execute_plan(
        &self,
        timeout: Duration,
        server: &Address,
        transaction: Option<TransactionId>,
        plan: &PhysicalPlan,
    ) -> RpcResult<PlanResult>;

    /// Execute a statement with no result set.
    async fn execute_statement(
        &self,
        timeout: Duration,
        server: &Address,
        transaction: Option<TransactionId>,
        statement: &str,
    ) -> RpcResult<()>;

    async fn end_transaction(
        &self,
        timeout: Duration,
        server: &Address,
        request: &EndTransactionRequest,
    ) -> RpcResult<()>;
}
