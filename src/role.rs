//! Point-in-time resolution of authoritative cluster roles.
//!
//! [`ClusterRoleResolver`] asks the root node who currently holds a role and
//! returns the answer as-is. It keeps no cache: mastership can move between
//! any two calls, so every attempt that needs the master must ask again.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, debug, warn};

use crate::client::RootClient;
use crate::error::RpcResult;
use crate::metrics;
use crate::observability::role_query_span;
use crate::types::{Address, ClusterRole, UpdateServerInfo};

/// Resolves role and mastership by querying a root node.
#[derive(Clone)]
pub struct ClusterRoleResolver {
    root: Arc<dyn RootClient>,
    timeout: Duration,
}

impl ClusterRoleResolver {
    pub fn new(root: Arc<dyn RootClient>, timeout: Duration) -> Self {
        Self { root, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The queried node's own cluster role.
    pub async fn get_role(&self, node: &Address) -> RpcResult<ClusterRole> {
        self.resolve(
            "cluster_role",
            node,
            self.root.get_cluster_role(self.timeout, node),
        )
        .await
    }

    /// Whether `node` currently reports itself as master.
    pub async fn is_master(&self, node: &Address) -> RpcResult<bool> {
        Ok(self.get_role(node).await?.is_master())
    }

    /// The update-node replica currently authoritative for writes.
    pub async fn get_master_update_node(&self, node: &Address) -> RpcResult<Address> {
        self.resolve(
            "master_update_node",
            node,
            self.root.get_master_update_server(self.timeout, node),
        )
        .await
    }

    /// The authoritative root node in a multi-root deployment.
    pub async fn get_master_coordinator(&self, node: &Address) -> RpcResult<Address> {
        self.resolve(
            "master_coordinator",
            node,
            self.root.get_master_coordinator(self.timeout, node),
        )
        .await
    }

    /// The update node to write to.
    ///
    /// `for_merge` is forwarded to the root untouched; whether it changes
    /// the answer is the root's decision.
    pub async fn get_update_node(&self, node: &Address, for_merge: bool) -> RpcResult<Address> {
        let query = if for_merge {
            "update_node_for_merge"
        } else {
            "update_node"
        };
        self.resolve(
            query,
            node,
            self.root.fetch_update_server(self.timeout, node, for_merge),
        )
        .await
    }

    /// Update-node replicas with their read weights and roles.
    pub async fn get_update_nodes(&self, node: &Address) -> RpcResult<Vec<UpdateServerInfo>> {
        self.resolve(
            "update_node_list",
            node,
            self.root.fetch_update_server_list(self.timeout, node),
        )
        .await
    }

    async fn resolve<T, F>(&self, query: &'static str, node: &Address, call: F) -> RpcResult<T>
    where
        T: std::fmt::Debug,
        F: Future<Output = RpcResult<T>>,
    {
        let result = call.instrument(role_query_span(query, node)).await;
        match &result {
            Ok(answer) => debug!(query, root = %node, ?answer, "Resolved role"),
            Err(e) => warn!(query, root = %node, error = %e, "Role resolution failed"),
        }
        metrics::record_role_resolution(query, result.is_ok());
        result
    }
}
