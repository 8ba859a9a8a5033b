//! Caller-side retry helpers.
//!
//! Single-target calls never retry on their own. When a caller does want to
//! retry a write against a master, the master has to be resolved again
//! before every attempt: the failure may well be that mastership moved.
//!
//! # Available Policies
//!
//! | Policy | Min Delay | Max Delay | Retries | Use Case |
//! |--------|-----------|-----------|---------|----------|
//! | `role_policy` | 20ms | 1s | 5 | Writes routed to a resolved master |
//! | `migration_policy` | 200ms | 5s | 3 | Restarting a failed migration handshake |
//!
//! ```rust,ignore
//! use tabletrpc::retry::{self, Master};
//!
//! let applied = retry::with_fresh_master(
//!     &resolver,
//!     &root,
//!     Master::UpdateNode,
//!     retry::role_policy(),
//!     |master| async move { update.apply(timeout, &master, &mutator).await },
//! )
//! .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::warn;

use crate::error::{RpcError, RpcResult};
use crate::role::ClusterRoleResolver;
use crate::types::Address;

/// Policy for calls against a freshly resolved master.
///
/// Short delays: a mastership switch settles within a few hundred
/// milliseconds, and the caller is usually on a request path.
pub fn role_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(20))
        .with_max_delay(Duration::from_secs(1))
        .with_max_times(5)
        .with_jitter()
}

/// Policy for re-running a whole migration handshake.
pub fn migration_policy() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(3)
        .with_jitter()
}

/// Which master an operation must be sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Master {
    /// The update node accepting writes.
    UpdateNode,
    /// The authoritative root node.
    Coordinator,
}

/// Run `operation` against the current master, resolving it anew before
/// each attempt.
///
/// Only transient and stale-ownership failures are retried, whether they
/// come from the resolution or from the operation itself.
pub async fn with_fresh_master<T, F, Fut>(
    resolver: &ClusterRoleResolver,
    root: &Address,
    master: Master,
    policy: ExponentialBuilder,
    operation: F,
) -> RpcResult<T>
where
    F: Fn(Address) -> Fut,
    Fut: Future<Output = RpcResult<T>>,
{
    let operation = &operation;
    (move || async move {
        let target = match master {
            Master::UpdateNode => resolver.get_master_update_node(root).await?,
            Master::Coordinator => resolver.get_master_coordinator(root).await?,
        };
        operation(target).await
    })
    .retry(policy)
    .when(RpcError::is_failover)
    .notify(|e: &RpcError, delay: Duration| {
        warn!(
            master = ?master,
            root = %root,
            error = %e,
            delay_ms = delay.as_millis() as u64,
            "Master call failed, re-resolving"
        );
    })
    .await
}
