//! # tabletrpc
//! Client-side remote-call layer for a tablet-partitioned storage cluster.
//!
//! A cluster has one (or a few) root nodes holding metadata, chunk nodes
//! serving tablet replicas, update nodes accepting writes, and merge nodes
//! answering queries. This crate is what every one of them links to talk to
//! the others: typed per-role clients, replica read routing with failover,
//! the tablet migration handshake, tablet reporting, and transaction calls.
//!
//! # Goals
//! - Every remote call is bounded by its own timeout
//! - Read routing never retries a request another replica would refuse too
//! - No hidden state: mastership and locations are the caller's to hold
//!
//! ## Reading with failover
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tabletrpc::prelude::*;
//!
//! async fn read(
//!     chunks: Arc<dyn ChunkClient>,
//!     list: &LocationList,
//!     param: &GetParam,
//! ) -> RpcResult<(Scanner, LocationList)> {
//!     let router = RetryRouter::new(chunks, Duration::from_millis(500));
//!     let outcome = router.get(list, false, param).await;
//!     // Keep the reordered list for the next read of this tablet.
//!     let locations = outcome.locations;
//!     Ok((outcome.result?, locations))
//! }
//! ```
//!
//! ## Wiring
//!
//! The crate does not own a network stack. [`client::RpcStub`] implements
//! every client trait on top of a [`protocol::Transport`] supplied by the
//! embedding process; the in-memory doubles under `client::mock` (feature
//! `test-utilities`) implement the same traits for tests.

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod observability;
pub mod payload;
pub mod protocol;
pub mod retry;
pub mod role;
pub mod routing;
pub mod telemetry;
pub mod transaction;
pub mod types;

pub mod prelude {
    //! The types most callers need.
    pub use crate::client::{ChunkClient, RootClient, RpcStub, TransactionClient, UpdateClient};
    pub use crate::config::ClientConfig;
    pub use crate::error::{ErrorClass, RpcError, RpcResult, StatusCode};
    pub use crate::migration::{
        MigrationCompletion, MigrationCoordinator, MigrationHandshake, MigrationStage,
        MigrationTask, ReportSequence, TabletReportInfo,
    };
    pub use crate::payload::{GetParam, Mutator, ScanParam, Scanner};
    pub use crate::protocol::{CommandKind, CommandVersion, Transport};
    pub use crate::role::ClusterRoleResolver;
    pub use crate::routing::{
        ByDistance, LocationList, LocationOrder, ReplicaLocation, RetryRouter, RouteOptions,
        RouteOutcome,
    };
    pub use crate::transaction::{TransactionGateway, TransactionHandle, TransactionId};
    pub use crate::types::{
        Address, ClusterRole, RangeDescriptor, RowKey, RowKeyRange, ServerRole, TableId,
        TabletLocation,
    };

    pub use bytes;
}
