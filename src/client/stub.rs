//! Transport-backed implementation of every service-client trait.
//!
//! [`RpcStub`] takes care of exactly one call at a time: it builds the
//! [`Command`] with the kind's fixed version tag, encodes the body, bounds
//! the call by the per-attempt timeout, maps the response status to an
//! [`RpcError`](crate::error::RpcError), and decodes the reply. Anything
//! that needs several calls (failover, handshakes) lives in the components
//! built on top of it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::bounded;
use super::traits::{ChunkClient, RootClient, TransactionClient, UpdateClient};
use crate::error::RpcResult;
use crate::metrics;
use crate::migration::{
    MigrationCompletion, MigrationDestination, MigrationTask, TabletReportBatch,
    TabletReportInfo,
};
use crate::payload::{
    AlterTableSchema, GetParam, Mutator, PhysicalPlan, PlanResult, ScanParam, Scanner,
    SchemaSnapshot, TableImportInfo, TableSchema, TransactionRequest,
};
use crate::protocol::{Command, CommandKind, RpcRequest, Transport, decode_body, encode_body};
use crate::transaction::{EndTransactionRequest, TransactionId};
use crate::types::{
    Address, ClusterRole, RangeDescriptor, RowKey, ServerRole, TableId, TabletLocation,
    UpdateServerInfo,
};

/// Service client that issues one remote call per method.
pub struct RpcStub<T: ?Sized> {
    transport: Arc<T>,
}

impl<T: ?Sized> Clone for RpcStub<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport + ?Sized> RpcStub<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    async fn call<B, R>(
        &self,
        kind: CommandKind,
        timeout: Duration,
        target: &Address,
        body: &B,
        range: Option<&RangeDescriptor>,
    ) -> RpcResult<R>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let command = Command::new(kind, timeout);
        let request = RpcRequest {
            command: command.clone(),
            body: encode_body(body)?,
        };

        let started = Instant::now();
        let result = bounded(timeout, target, self.transport.send(target, request))
            .await
            .and_then(|response| response.into_body(target, &command, range))
            .and_then(|body| decode_body::<R>(&body));

        let status = match &result {
            Ok(_) => "success",
            Err(e) => e.status_code().as_str(),
        };
        metrics::record_rpc(kind.as_str(), status, started.elapsed().as_secs_f64());

        if let Err(e) = &result {
            debug!(
                command = %kind,
                version = %command.version,
                request_id = %command.request_id,
                target = %target,
                error = %e,
                "Remote call failed"
            );
        }
        result
    }
}

#[async_trait]
impl<T: Transport + ?Sized> RootClient for RpcStub<T> {
    async fn register_server(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        is_merger: bool,
        server_version: &str,
    ) -> RpcResult<i32> {
        self.call(
            CommandKind::RegisterServer,
            timeout,
            root,
            &(server, is_merger, server_version),
            None,
        )
        .await
    }

    async fn register_merge_server(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        sql_port: u16,
        server_version: &str,
    ) -> RpcResult<i32> {
        self.call(
            CommandKind::RegisterMergeServer,
            timeout,
            root,
            &(server, sql_port, server_version),
            None,
        )
        .await
    }

    async fn heartbeat(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        role: ServerRole,
    ) -> RpcResult<()> {
        self.call(CommandKind::Heartbeat, timeout, root, &(server, role), None)
            .await
    }

    async fn report_capacity(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        capacity: u64,
        used: u64,
    ) -> RpcResult<()> {
        self.call(
            CommandKind::ReportCapacity,
            timeout,
            root,
            &(server, capacity, used),
            None,
        )
        .await
    }

    async fn find_update_server(&self, timeout: Duration, root: &Address) -> RpcResult<Address> {
        self.call(CommandKind::FindUpdateServer, timeout, root, &(), None)
            .await
    }

    async fn fetch_update_server(
        &self,
        timeout: Duration,
        root: &Address,
        for_merge: bool,
    ) -> RpcResult<Address> {
        self.call(
            CommandKind::FetchUpdateServer,
            timeout,
            root,
            &for_merge,
            None,
        )
        .await
    }

    async fn fetch_update_server_list(
        &self,
        timeout: Duration,
        root: &Address,
    ) -> RpcResult<Vec<UpdateServerInfo>> {
        self.call(CommandKind::FetchUpdateServerList, timeout, root, &(), None)
            .await
    }

    async fn fetch_tablet_location(
        &self,
        timeout: Duration,
        root: &Address,
        root_table_id: TableId,
        table_id: TableId,
        row_key: &RowKey,
    ) -> RpcResult<Scanner> {
        self.call(
            CommandKind::FetchTabletLocation,
            timeout,
            root,
            &(root_table_id, table_id, row_key),
            None,
        )
        .await
    }

    async fn get_tablet_info(
        &self,
        timeout: Duration,
        root: &Address,
        range: &RangeDescriptor,
    ) -> RpcResult<Vec<TabletLocation>> {
        self.call(CommandKind::GetTabletInfo, timeout, root, range, Some(range))
            .await
    }

    async fn fetch_schema(
        &self,
        timeout: Duration,
        root: &Address,
        timestamp: i64,
        only_core_tables: bool,
    ) -> RpcResult<SchemaSnapshot> {
        self.call(
            CommandKind::FetchSchema,
            timeout,
            root,
            &(timestamp, only_core_tables),
            None,
        )
        .await
    }

    async fn fetch_schema_version(&self, timeout: Duration, root: &Address) -> RpcResult<i64> {
        self.call(CommandKind::FetchSchemaVersion, timeout, root, &(), None)
            .await
    }

    async fn create_table(
        &self,
        timeout: Duration,
        root: &Address,
        if_not_exists: bool,
        schema: &TableSchema,
    ) -> RpcResult<()> {
        self.call(
            CommandKind::CreateTable,
            timeout,
            root,
            &(if_not_exists, schema),
            None,
        )
        .await
    }

    async fn drop_table(
        &self,
        timeout: Duration,
        root: &Address,
        if_exists: bool,
        tables: &[String],
    ) -> RpcResult<()> {
        self.call(
            CommandKind::DropTable,
            timeout,
            root,
            &(if_exists, tables),
            None,
        )
        .await
    }

    async fn alter_table(
        &self,
        timeout: Duration,
        root: &Address,
        schema: &AlterTableSchema,
    ) -> RpcResult<()> {
        self.call(CommandKind::AlterTable, timeout, root, schema, None)
            .await
    }

    async fn get_last_frozen_version(&self, timeout: Duration, root: &Address) -> RpcResult<i64> {
        self.call(CommandKind::GetLastFrozenVersion, timeout, root, &(), None)
            .await
    }

    async fn get_migrate_destination(
        &self,
        timeout: Duration,
        root: &Address,
        occupy_size: u64,
    ) -> RpcResult<MigrationDestination> {
        self.call(
            CommandKind::GetMigrateDestination,
            timeout,
            root,
            &occupy_size,
            None,
        )
        .await
    }

    async fn migrate_over(
        &self,
        timeout: Duration,
        root: &Address,
        completion: &MigrationCompletion,
    ) -> RpcResult<()> {
        self.call(
            CommandKind::MigrateOver,
            timeout,
            root,
            completion,
            Some(&completion.range),
        )
        .await
    }

    async fn report_tablets(
        &self,
        timeout: Duration,
        root: &Address,
        batch: &TabletReportBatch,
    ) -> RpcResult<()> {
        self.call(CommandKind::ReportTablets, timeout, root, batch, None)
            .await
    }

    async fn delete_tablets(
        &self,
        timeout: Duration,
        root: &Address,
        reporter: &Address,
        tablets: &[TabletReportInfo],
    ) -> RpcResult<()> {
        self.call(
            CommandKind::DeleteTablets,
            timeout,
            root,
            &(reporter, tablets),
            None,
        )
        .await
    }

    async fn merge_tablets_over(
        &self,
        timeout: Duration,
        root: &Address,
        tablets: &[TabletReportInfo],
        success: bool,
    ) -> RpcResult<()> {
        self.call(
            CommandKind::MergeTabletsOver,
            timeout,
            root,
            &(tablets, success),
            None,
        )
        .await
    }

    async fn load_bypass_over(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        tables: &[TableImportInfo],
        success: bool,
    ) -> RpcResult<()> {
        self.call(
            CommandKind::LoadBypassOver,
            timeout,
            root,
            &(server, tables, success),
            None,
        )
        .await
    }

    async fn delete_table_over(
        &self,
        timeout: Duration,
        root: &Address,
        server: &Address,
        table_id: TableId,
        success: bool,
    ) -> RpcResult<()> {
        self.call(
            CommandKind::DeleteTableOver,
            timeout,
            root,
            &(server, table_id, success),
            None,
        )
        .await
    }

    async fn get_cluster_role(&self, timeout: Duration, root: &Address) -> RpcResult<ClusterRole> {
        self.call(CommandKind::GetClusterRole, timeout, root, &(), None)
            .await
    }

    async fn get_master_update_server(
        &self,
        timeout: Duration,
        root: &Address,
    ) -> RpcResult<Address> {
        self.call(CommandKind::GetMasterUpdateServer, timeout, root, &(), None)
            .await
    }

    async fn get_master_coordinator(
        &self,
        timeout: Duration,
        root: &Address,
    ) -> RpcResult<Address> {
        self.call(CommandKind::GetMasterCoordinator, timeout, root, &(), None)
            .await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> ChunkClient for RpcStub<T> {
    async fn get(
        &self,
        timeout: Duration,
        server: &Address,
        param: &GetParam,
    ) -> RpcResult<Scanner> {
        self.call(CommandKind::Get, timeout, server, param, None)
            .await
    }

    async fn scan(
        &self,
        timeout: Duration,
        server: &Address,
        param: &ScanParam,
    ) -> RpcResult<Scanner> {
        self.call(CommandKind::Scan, timeout, server, param, None)
            .await
    }

    async fn load_tablet(&self, timeout: Duration, task: &MigrationTask) -> RpcResult<()> {
        self.call(
            CommandKind::LoadTablet,
            timeout,
            task.dest(),
            task,
            Some(task.range()),
        )
        .await
    }

    async fn reload_config(
        &self,
        timeout: Duration,
        server: &Address,
        filename: &str,
    ) -> RpcResult<()> {
        self.call(CommandKind::ReloadConfig, timeout, server, filename, None)
            .await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> UpdateClient for RpcStub<T> {
    async fn mutate(
        &self,
        timeout: Duration,
        server: &Address,
        mutator: &Mutator,
        has_data: bool,
    ) -> RpcResult<Scanner> {
        self.call(
            CommandKind::Mutate,
            timeout,
            server,
            &(mutator, has_data),
            None,
        )
        .await
    }

    async fn apply(
        &self,
        timeout: Duration,
        server: &Address,
        mutator: &Mutator,
    ) -> RpcResult<()> {
        self.call(CommandKind::Apply, timeout, server, mutator, None)
            .await
    }

    async fn fetch_frozen_time(
        &self,
        timeout: Duration,
        server: &Address,
        frozen_version: i64,
    ) -> RpcResult<i64> {
        self.call(
            CommandKind::FetchFrozenTime,
            timeout,
            server,
            &frozen_version,
            None,
        )
        .await
    }
}

#[async_trait]
impl<T: Transport + ?Sized> TransactionClient for RpcStub<T> {
    async fn start_transaction(
        &self,
        timeout: Duration,
        server: &Address,
        request: &TransactionRequest,
    ) -> RpcResult<TransactionId> {
        self.call(CommandKind::StartTransaction, timeout, server, request, None)
            .await
    }

    async fn execute_plan(
        &self,
        timeout: Duration,
        server: &Address,
        transaction: Option<TransactionId>,
        plan: &PhysicalPlan,
    ) -> RpcResult<PlanResult> {
        self.call(
            CommandKind::ExecutePlan,
            timeout,
            server,
            &(transaction, plan),
            None,
        )
        .await
    }

    async fn execute_statement(
        &self,
        timeout: Duration,
        server: &Address,
        transaction: Option<TransactionId>,
        statement: &str,
    ) -> RpcResult<()> {
        self.call(
            CommandKind::ExecuteStatement,
            timeout,
            server,
            &(transaction, statement),
            None,
        )
        .await
    }

    async fn end_transaction(
        &self,
        timeout: Duration,
        server: &Address,
        request: &EndTransactionRequest,
    ) -> RpcResult<()> {
        self.call(CommandKind::EndTransaction, timeout, server, request, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{RpcError, StatusCode};
    use crate::protocol::{CommandVersion, RpcResponse};
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Records every request and replays scripted responses.
    #[derive(Default)]
    struct ScriptedTransport {
        sent: Mutex<Vec<(Address, Command)>>,
        replies: Mutex<VecDeque<RpcResult<RpcResponse>>>,
        hang: bool,
    }

    impl ScriptedTransport {
        fn replying(replies: Vec<RpcResult<RpcResponse>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                ..Default::default()
            })
        }

        fn commands(&self) -> Vec<Command> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|(_, c)| c.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, target: &Address, request: RpcRequest) -> RpcResult<RpcResponse> {
            self.sent
                .lock()
                .unwrap()
                .push((target.clone(), request.command.clone()));
            if self.hang {
                std::future::pending::<()>().await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(RpcResponse::ok(request.command.version, Bytes::new())))
        }
    }

    fn root() -> Address {
        Address::new("10.0.0.1", 2500)
    }

    #[tokio::test]
    async fn test_heartbeat_sent_at_heartbeat_version() {
        let transport = ScriptedTransport::replying(vec![Ok(RpcResponse::ok(
            CommandVersion::Heartbeat,
            Bytes::new(),
        ))]);
        let stub = RpcStub::new(transport.clone());

        stub.heartbeat(
            Duration::from_millis(100),
            &root(),
            &Address::new("10.0.0.5", 2600),
            ServerRole::Chunk,
        )
        .await
        .unwrap();

        let commands = transport.commands();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, CommandKind::Heartbeat);
        assert_eq!(commands[0].version, CommandVersion::Heartbeat);
        assert_eq!(commands[0].timeout, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_ordinary_calls_use_default_version() {
        let schema_version = encode_body(&42i64).unwrap();
        let transport = ScriptedTransport::replying(vec![Ok(RpcResponse::ok(
            CommandVersion::Default,
            schema_version,
        ))]);
        let stub = RpcStub::new(transport.clone());

        let version = stub
            .fetch_schema_version(Duration::from_millis(100), &root())
            .await
            .unwrap();
        assert_eq!(version, 42);
        assert_eq!(transport.commands()[0].version, CommandVersion::Default);
    }

    #[tokio::test]
    async fn test_decodes_typed_reply() {
        let master = Address::new("10.0.0.7", 2700);
        let transport = ScriptedTransport::replying(vec![Ok(RpcResponse::ok(
            CommandVersion::Default,
            encode_body(&master).unwrap(),
        ))]);
        let stub = RpcStub::new(transport);

        let got = stub
            .get_master_update_server(Duration::from_millis(100), &root())
            .await
            .unwrap();
        assert_eq!(got, master);
    }

    #[tokio::test]
    async fn test_maps_remote_status() {
        let transport = ScriptedTransport::replying(vec![Ok(RpcResponse::failure(
            StatusCode::NotAuthoritativeForRange,
            0,
            "moved",
        ))]);
        let stub = RpcStub::new(transport);

        let err = stub
            .get(
                Duration::from_millis(100),
                &Address::new("10.0.0.5", 2600),
                &GetParam::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::StaleOwnership { .. }));
    }

    #[tokio::test]
    async fn test_propagates_transport_error() {
        let target = Address::new("10.0.0.5", 2600);
        let transport = ScriptedTransport::replying(vec![Err(RpcError::Transport {
            target: target.clone(),
            reason: "connection refused".into(),
        })]);
        let stub = RpcStub::new(transport);

        let err = stub
            .scan(Duration::from_millis(100), &target, &ScanParam::default())
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::Transport { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_peer_times_out_locally() {
        let transport = Arc::new(ScriptedTransport {
            hang: true,
            ..Default::default()
        });
        let stub = RpcStub::new(transport);

        let err = stub
            .fetch_schema_version(Duration::from_millis(30), &root())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RpcError::Timeout {
                target: root(),
                after: Duration::from_millis(30)
            }
        );
    }

    #[tokio::test]
    async fn test_load_tablet_targets_destination() {
        use crate::migration::BoundedPath;
        use crate::types::RowKeyRange;

        let transport = ScriptedTransport::replying(vec![]);
        let stub = RpcStub::new(transport.clone());
        let dest = Address::new("10.0.0.8", 2600);
        let task = MigrationTask::new(
            RangeDescriptor::new(1, RowKeyRange::whole()),
            Address::new("10.0.0.5", 2600),
            dest.clone(),
            2,
            10,
            1,
            0xfeed,
            vec![BoundedPath::new("/data/2/t.sst").unwrap()],
        )
        .unwrap();

        stub.load_tablet(Duration::from_secs(1), &task).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent[0].0, dest);
        assert_eq!(sent[0].1.kind, CommandKind::LoadTablet);
    }
}
