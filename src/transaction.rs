//! Remote transaction lifecycle against the update node.
//!
//! A [`TransactionHandle`] is bound to the update node that started it and
//! moves through a small state machine:
//!
//! ```text
//! Open ──end(commit)──► Committed
//!   │
//!   └───end(abort)────► Aborted
//! ```
//!
//! Both end states are terminal. Any use of a handle outside `Open` fails
//! with [`RpcError::HandleNotOpen`] before a call is issued.
//!
//! Calls without a handle run auto-committed on whichever update node is
//! master *at that moment*: [`TransactionGateway`] re-resolves it for every
//! such call and for every start.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, warn};

use crate::client::TransactionClient;
use crate::error::{RpcError, RpcResult};
use crate::metrics;
use crate::observability::{TransactionOperation, transaction_span};
use crate::payload::{PhysicalPlan, PlanResult, TransactionRequest};
use crate::role::ClusterRoleResolver;
use crate::types::Address;
use crate::{record_error, record_success};

/// Transaction id allocated by the update node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of an end-transaction call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndTransactionRequest {
    pub id: TransactionId,
    pub rollback: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Open,
    Committed,
    Aborted,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// An open (or finished) transaction on one update node.
///
/// Not `Clone`: a handle is finished exactly once, through the only copy.
#[derive(Debug)]
pub struct TransactionHandle {
    id: TransactionId,
    coordinator: Address,
    state: TransactionState,
}

impl TransactionHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// The update node holding this transaction.
    pub fn coordinator(&self) -> &Address {
        &self.coordinator
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    fn ensure_open(&self) -> RpcResult<TransactionId> {
        if self.is_open() {
            Ok(self.id)
        } else {
            Err(RpcError::HandleNotOpen {
                id: self.id.0,
                state: self.state.to_string(),
            })
        }
    }
}

/// Starts, drives, and ends transactions on the master update node.
pub struct TransactionGateway {
    client: Arc<dyn TransactionClient>,
    resolver: ClusterRoleResolver,
    root: Address,
    timeout: Duration,
}

impl TransactionGateway {
    /// `root` is the root node asked for the current master update node.
    pub fn new(
        client: Arc<dyn TransactionClient>,
        resolver: ClusterRoleResolver,
        root: Address,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            resolver,
            root,
            timeout,
        }
    }

    /// Open a transaction on the current master update node.
    pub async fn start_transaction(
        &self,
        request: &TransactionRequest,
    ) -> RpcResult<TransactionHandle> {
        let span = transaction_span(TransactionOperation::Start, None);
        let result = async {
            let coordinator = self.resolver.get_master_update_node(&self.root).await?;
            tracing::Span::current().record("coordinator", tracing::field::display(&coordinator));
            let id = self
                .client
                .start_transaction(self.timeout, &coordinator, request)
                .await?;
            Ok(TransactionHandle {
                id,
                coordinator,
                state: TransactionState::Open,
            })
        }
        .instrument(span.clone())
        .await;

        match &result {
            Ok(handle) => {
                record_success!(span);
                metrics::record_transaction("started");
                debug!(transaction_id = %handle.id, coordinator = %handle.coordinator, "Transaction started");
            }
            Err(e) => {
                record_error!(span, e);
                metrics::record_transaction("start_failed");
            }
        }
        result
    }

    /// Execute `plan` inside `handle`, or auto-committed when `None`.
    pub async fn apply_plan(
        &self,
        handle: Option<&TransactionHandle>,
        plan: &PhysicalPlan,
    ) -> RpcResult<PlanResult> {
        let span = transaction_span(
            TransactionOperation::ApplyPlan,
            handle.map(|h| h.id.0),
        );
        async {
            let (target, id) = self.target(handle).await?;
            self.client
                .execute_plan(self.timeout, &target, id, plan)
                .await
        }
        .instrument(span)
        .await
    }

    /// Execute a statement inside `handle`, or auto-committed when `None`.
    pub async fn execute_statement(
        &self,
        handle: Option<&TransactionHandle>,
        statement: &str,
    ) -> RpcResult<()> {
        let span = transaction_span(
            TransactionOperation::ExecuteStatement,
            handle.map(|h| h.id.0),
        );
        async {
            let (target, id) = self.target(handle).await?;
            self.client
                .execute_statement(self.timeout, &target, id, statement)
                .await
        }
        .instrument(span)
        .await
    }

    /// Commit (`commit = true`) or roll back the transaction.
    ///
    /// If the remote call fails the handle stays `Open`, so the caller can
    /// retry the end or abort instead.
    pub async fn end_transaction(
        &self,
        handle: &mut TransactionHandle,
        commit: bool,
    ) -> RpcResult<()> {
        let id = handle.ensure_open()?;
        let span = transaction_span(TransactionOperation::End, Some(id.0));
        let request = EndTransactionRequest {
            id,
            rollback: !commit,
        };

        let result = self
            .client
            .end_transaction(self.timeout, &handle.coordinator, &request)
            .instrument(span.clone())
            .await;

        match result {
            Ok(()) => {
                handle.state = if commit {
                    TransactionState::Committed
                } else {
                    TransactionState::Aborted
                };
                record_success!(span);
                metrics::record_transaction(if commit { "committed" } else { "aborted" });
                info!(transaction_id = %id, state = %handle.state, "Transaction ended");
                Ok(())
            }
            Err(e) => {
                record_error!(span, e);
                metrics::record_transaction("end_failed");
                warn!(
                    transaction_id = %id,
                    coordinator = %handle.coordinator,
                    error = %e,
                    "Ending transaction failed, handle left open"
                );
                Err(e)
            }
        }
    }

    /// Where a call goes and under which transaction.
    async fn target(
        &self,
        handle: Option<&TransactionHandle>,
    ) -> RpcResult<(Address, Option<TransactionId>)> {
        match handle {
            Some(handle) => {
                let id = handle.ensure_open()?;
                Ok((handle.coordinator.clone(), Some(id)))
            }
            None => {
                let master = self.resolver.get_master_update_node(&self.root).await?;
                Ok((master, None))
            }
        }
    }
}
