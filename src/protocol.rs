//! Outgoing command envelope and the transport seam.
//!
//! Every remote call is a [`Command`] (kind, version tag, per-attempt
//! timeout, request id) plus an encoded body, handed to a [`Transport`].
//! Connection management and framing live behind that trait; this module
//! only fixes which version tag each command kind carries and how a
//! response status turns into an [`RpcError`].
//!
//! # Version Tags
//!
//! | Tag | Value | Commands |
//! |-----|-------|----------|
//! | [`CommandVersion::Default`] | 1 | everything else |
//! | [`CommandVersion::Heartbeat`] | 2 | [`CommandKind::Heartbeat`] |

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{DEFAULT_COMMAND_VERSION, HEARTBEAT_COMMAND_VERSION};
use crate::error::{RpcError, RpcResult, StatusCode};
use crate::types::{Address, RangeDescriptor};

/// Protocol revision tag on an outgoing command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandVersion {
    /// Tag for ordinary calls.
    Default,
    /// Tag for heartbeat-style calls.
    Heartbeat,
}

impl CommandVersion {
    /// The integer carried on the wire.
    pub const fn tag(self) -> i32 {
        match self {
            CommandVersion::Default => DEFAULT_COMMAND_VERSION,
            CommandVersion::Heartbeat => HEARTBEAT_COMMAND_VERSION,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Self> {
        match tag {
            DEFAULT_COMMAND_VERSION => Some(CommandVersion::Default),
            HEARTBEAT_COMMAND_VERSION => Some(CommandVersion::Heartbeat),
            _ => None,
        }
    }
}

impl fmt::Display for CommandVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.tag())
    }
}

/// Every remote operation this layer can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    // Membership
    RegisterServer,
    RegisterMergeServer,
    Heartbeat,
    ReportCapacity,
    ReloadConfig,
    // Topology
    FindUpdateServer,
    FetchUpdateServer,
    FetchUpdateServerList,
    FetchTabletLocation,
    GetTabletInfo,
    // Reads and writes
    Get,
    Scan,
    Mutate,
    Apply,
    FetchFrozenTime,
    GetLastFrozenVersion,
    // Schema
    FetchSchema,
    FetchSchemaVersion,
    CreateTable,
    DropTable,
    AlterTable,
    // Migration and reporting
    GetMigrateDestination,
    LoadTablet,
    MigrateOver,
    ReportTablets,
    DeleteTablets,
    MergeTabletsOver,
    LoadBypassOver,
    DeleteTableOver,
    // Leadership
    GetClusterRole,
    GetMasterUpdateServer,
    GetMasterCoordinator,
    // Transactions
    StartTransaction,
    ExecutePlan,
    EndTransaction,
    ExecuteStatement,
}

impl CommandKind {
    /// The fixed version tag this command is sent with.
    pub const fn version(self) -> CommandVersion {
        match self {
            CommandKind::Heartbeat => CommandVersion::Heartbeat,
            _ => CommandVersion::Default,
        }
    }

    /// Stable name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::RegisterServer => "register_server",
            CommandKind::RegisterMergeServer => "register_merge_server",
            CommandKind::Heartbeat => "heartbeat",
            CommandKind::ReportCapacity => "report_capacity",
            CommandKind::ReloadConfig => "reload_config",
            CommandKind::FindUpdateServer => "find_update_server",
            CommandKind::FetchUpdateServer => "fetch_update_server",
            CommandKind::FetchUpdateServerList => "fetch_update_server_list",
            CommandKind::FetchTabletLocation => "fetch_tablet_location",
            CommandKind::GetTabletInfo => "get_tablet_info",
            CommandKind::Get => "get",
            CommandKind::Scan => "scan",
            CommandKind::Mutate => "mutate",
            CommandKind::Apply => "apply",
            CommandKind::FetchFrozenTime => "fetch_frozen_time",
            CommandKind::GetLastFrozenVersion => "get_last_frozen_version",
            CommandKind::FetchSchema => "fetch_schema",
            CommandKind::FetchSchemaVersion => "fetch_schema_version",
            CommandKind::CreateTable => "create_table",
            CommandKind::DropTable => "drop_table",
            CommandKind::AlterTable => "alter_table",
            CommandKind::GetMigrateDestination => "get_migrate_destination",
            CommandKind::LoadTablet => "load_tablet",
            CommandKind::MigrateOver => "migrate_over",
            CommandKind::ReportTablets => "report_tablets",
            CommandKind::DeleteTablets => "delete_tablets",
            CommandKind::MergeTabletsOver => "merge_tablets_over",
            CommandKind::LoadBypassOver => "load_bypass_over",
            CommandKind::DeleteTableOver => "delete_table_over",
            CommandKind::GetClusterRole => "get_cluster_role",
            CommandKind::GetMasterUpdateServer => "get_master_update_server",
            CommandKind::GetMasterCoordinator => "get_master_coordinator",
            CommandKind::StartTransaction => "start_transaction",
            CommandKind::ExecutePlan => "execute_plan",
            CommandKind::EndTransaction => "end_transaction",
            CommandKind::ExecuteStatement => "execute_statement",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Header of one outgoing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub kind: CommandKind,
    pub version: CommandVersion,
    /// Budget for this single attempt.
    pub timeout: Duration,
    pub request_id: Uuid,
}

impl Command {
    /// Build a command with the kind's fixed version tag.
    pub fn new(kind: CommandKind, timeout: Duration) -> Self {
        Self {
            kind,
            version: kind.version(),
            timeout,
            request_id: Uuid::new_v4(),
        }
    }
}

/// A command plus its encoded body.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub command: Command,
    pub body: Bytes,
}

/// What a peer sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcResponse {
    /// Raw status value; see [`StatusCode::from_raw`].
    pub status: i32,
    /// Version tag the peer processed the command at.
    pub version: i32,
    /// Logical failure code; zero on success.
    pub code: i32,
    pub message: String,
    pub body: Bytes,
}

impl RpcResponse {
    pub fn ok(version: CommandVersion, body: Bytes) -> Self {
        Self {
            status: StatusCode::Success as i32,
            version: version.tag(),
            code: 0,
            message: String::new(),
            body,
        }
    }

    pub fn failure(status: StatusCode, code: i32, message: impl Into<String>) -> Self {
        Self {
            status: status as i32,
            version: DEFAULT_COMMAND_VERSION,
            code,
            message: message.into(),
            body: Bytes::new(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_raw(self.status)
    }

    /// Map the response status to the body or an error.
    ///
    /// A success echoed at any tag other than the one sent is a version
    /// mismatch. `range` is attached to stale-ownership errors so logs can
    /// name the tablet whose location list is outdated.
    pub fn into_body(
        self,
        target: &Address,
        command: &Command,
        range: Option<&RangeDescriptor>,
    ) -> RpcResult<Bytes> {
        let status = self.status_code();
        if status.is_success() {
            return match CommandVersion::from_tag(self.version) {
                Some(echoed) if echoed == command.version => Ok(self.body),
                _ => Err(RpcError::VersionMismatch {
                    kind: command.kind,
                    sent: command.version,
                    expected: self.version,
                }),
            };
        }

        match status {
            StatusCode::Success => Ok(self.body),
            StatusCode::Timeout => Err(RpcError::Timeout {
                target: target.clone(),
                after: command.timeout,
            }),
            StatusCode::NotAuthoritativeForRange => Err(RpcError::StaleOwnership {
                target: target.clone(),
                range: range.cloned(),
            }),
            StatusCode::VersionMismatch => Err(RpcError::VersionMismatch {
                kind: command.kind,
                sent: command.version,
                expected: self.version,
            }),
            StatusCode::LogicalFailure => Err(RpcError::Logical {
                code: self.code,
                message: self.message,
            }),
        }
    }
}

/// Delivers one request to one peer and waits for its response.
///
/// Implementations own connections and framing. They should honor
/// `request.command.timeout`; callers additionally bound every call with
/// the same timeout locally.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, target: &Address, request: RpcRequest) -> RpcResult<RpcResponse>;
}

/// Encode a request or response body.
pub fn encode_body<T: Serialize + ?Sized>(value: &T) -> RpcResult<Bytes> {
    Ok(Bytes::from(bincode::serialize(value)?))
}

/// Decode a request or response body.
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> RpcResult<T> {
    Ok(bincode::deserialize(bytes)?)
}
