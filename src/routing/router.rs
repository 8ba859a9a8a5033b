//! Read routing with failover across replicas.
//!
//! # Algorithm
//!
//! 1. Sort the list with the injected [`LocationOrder`], unless the caller
//!    says it is already ordered from a previous sequence.
//! 2. Try the front entry with the per-attempt timeout.
//! 3. On success the front entry is the winner (index 0). Stop.
//! 4. On a transient or stale-ownership failure, move the front entry to the
//!    back and try the new front.
//! 5. On a protocol or logical failure, stop immediately; another replica
//!    would refuse the same request.
//! 6. Once every entry (or `max_attempts`) was tried, return the last error.
//!
//! The entry sort does not count as a change; every demotion does. Each
//! attempt is bounded on its own, so a sequence over `n` replicas may take
//! up to `n` attempt timeouts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{Instrument, Span, debug, warn};

use super::location::{ByDistance, LocationList, LocationOrder, ReplicaLocation};
use crate::client::{ChunkClient, bounded};
use crate::config::ClientConfig;
use crate::error::{ErrorClass, RpcError, RpcResult};
use crate::metrics;
use crate::observability::{RouteOperation, route_span};
use crate::payload::{GetParam, ScanParam, Scanner};
use crate::types::Address;
use crate::{record_error, record_success};

/// Per-sequence routing knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOptions {
    /// Skip the entry sort; the list is already in preferred order.
    pub presorted: bool,
    /// Stop after this many attempts. `None` (or 0) means every entry once.
    pub max_attempts: Option<usize>,
}

impl RouteOptions {
    pub fn presorted() -> Self {
        Self {
            presorted: true,
            ..Default::default()
        }
    }
}

/// Result of one routing sequence.
#[derive(Debug)]
pub struct RouteOutcome<T> {
    /// The winner's answer, or the last error observed.
    pub result: RpcResult<T>,
    /// The list after this sequence; hand it back next time with
    /// [`RouteOptions::presorted`].
    pub locations: LocationList,
    /// Index of the winning entry in `locations` (always 0 on success).
    pub winner: Option<usize>,
    /// Whether any entry was demoted.
    pub changed: bool,
    pub attempts: usize,
}

impl<T> RouteOutcome<T> {
    pub fn winner_location(&self) -> Option<&ReplicaLocation> {
        self.winner.and_then(|i| self.locations.locations().get(i))
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> RpcResult<T> {
        self.result
    }
}

/// Drive one routing sequence over `list`.
///
/// `attempt` issues the single-target read against one address. It is
/// expected to bound itself by the per-attempt timeout.
pub async fn route<T, F, Fut>(
    operation: RouteOperation,
    list: &LocationList,
    order: &dyn LocationOrder,
    options: RouteOptions,
    mut attempt: F,
) -> RouteOutcome<T>
where
    F: FnMut(Address) -> Fut,
    Fut: Future<Output = RpcResult<T>>,
{
    let mut locations = if options.presorted {
        list.clone()
    } else {
        list.sorted(order)
    };

    if locations.is_empty() {
        return RouteOutcome {
            result: Err(RpcError::InvalidArgument(format!(
                "no locations for {}; refetch from the root node",
                list.range()
            ))),
            locations,
            winner: None,
            changed: false,
            attempts: 0,
        };
    }

    let limit = options
        .max_attempts
        .filter(|&n| n > 0)
        .unwrap_or(locations.len())
        .min(locations.len());
    let op = operation.as_str();
    let mut changed = false;
    let mut attempts = 0;
    let mut last_error = None;

    while attempts < limit {
        let Some(target) = locations.front().map(|l| l.address.clone()) else {
            break;
        };
        attempts += 1;

        match attempt(target.clone()).await {
            Ok(value) => {
                // The front entry is always the one tried, so it wins in place.
                locations.mark_front_good();
                metrics::record_route_attempt(op, "success");
                if changed {
                    metrics::record_route_reorder(op);
                }
                return RouteOutcome {
                    result: Ok(value),
                    locations,
                    winner: Some(0),
                    changed,
                    attempts,
                };
            }
            Err(e) => {
                let class = e.class();
                metrics::record_route_attempt(op, class.as_str());
                match class {
                    ErrorClass::StaleOwnership => warn!(
                        operation = op,
                        range = %list.range(),
                        target = %target,
                        attempt = attempts,
                        "Replica no longer serves range, location list is outdated"
                    ),
                    ErrorClass::Transient => debug!(
                        operation = op,
                        range = %list.range(),
                        target = %target,
                        attempt = attempts,
                        error = %e,
                        "Replica attempt failed, trying next"
                    ),
                    ErrorClass::Protocol | ErrorClass::Logical => {
                        warn!(
                            operation = op,
                            range = %list.range(),
                            target = %target,
                            error = %e,
                            "Replica refused request, not failing over"
                        );
                        if changed {
                            metrics::record_route_reorder(op);
                        }
                        return RouteOutcome {
                            result: Err(e),
                            locations,
                            winner: None,
                            changed,
                            attempts,
                        };
                    }
                }
                locations.demote_front();
                changed = true;
                last_error = Some(e);
            }
        }
    }

    if changed {
        metrics::record_route_reorder(op);
    }
    let error = match last_error {
        Some(e) => e,
        None => RpcError::InvalidArgument(format!("no attempt made for {}", list.range())),
    };
    RouteOutcome {
        result: Err(error),
        locations,
        winner: None,
        changed,
        attempts,
    }
}

/// Get and scan with failover over a caller-supplied location list.
#[derive(Clone)]
pub struct RetryRouter {
    client: Arc<dyn ChunkClient>,
    order: Arc<dyn LocationOrder>,
    attempt_timeout: Duration,
    max_attempts: Option<usize>,
}

impl RetryRouter {
    pub fn new(client: Arc<dyn ChunkClient>, attempt_timeout: Duration) -> Self {
        Self {
            client,
            order: Arc::new(ByDistance),
            attempt_timeout,
            max_attempts: None,
        }
    }

    pub fn from_config(client: Arc<dyn ChunkClient>, config: &ClientConfig) -> Self {
        Self::new(client, config.route_attempt_timeout)
            .with_max_attempts(config.route_attempt_limit())
    }

    /// Replace the default distance ordering.
    pub fn with_order(mut self, order: Arc<dyn LocationOrder>) -> Self {
        self.order = order;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: Option<usize>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Point lookup against the first replica that answers.
    pub async fn get(
        &self,
        list: &LocationList,
        presorted: bool,
        param: &GetParam,
    ) -> RouteOutcome<Scanner> {
        let client = &*self.client;
        let timeout = self.attempt_timeout;
        self.run(RouteOperation::Get, list, presorted, move |target: Address| async move {
            bounded(timeout, &target, client.get(timeout, &target, param)).await
        })
        .await
    }

    /// Range scan against the first replica that answers.
    pub async fn scan(
        &self,
        list: &LocationList,
        presorted: bool,
        param: &ScanParam,
    ) -> RouteOutcome<Scanner> {
        let client = &*self.client;
        let timeout = self.attempt_timeout;
        self.run(RouteOperation::Scan, list, presorted, move |target: Address| async move {
            bounded(timeout, &target, client.scan(timeout, &target, param)).await
        })
        .await
    }

    async fn run<F, Fut>(
        &self,
        operation: RouteOperation,
        list: &LocationList,
        presorted: bool,
        attempt: F,
    ) -> RouteOutcome<Scanner>
    where
        F: FnMut(Address) -> Fut,
        Fut: Future<Output = RpcResult<Scanner>>,
    {
        let options = RouteOptions {
            presorted,
            max_attempts: self.max_attempts,
        };
        let span = route_span(operation, list.range(), list.len());
        let outcome = route(operation, list, self.order.as_ref(), options, attempt)
            .instrument(span.clone())
            .await;

        record_outcome(span, &outcome);
        outcome
    }
}

fn record_outcome<T>(span: Span, outcome: &RouteOutcome<T>) {
    span.record("attempts", outcome.attempts);
    match (&outcome.result, outcome.winner_location()) {
        (Ok(_), Some(winner)) => {
            span.record("winner", tracing::field::display(&winner.address));
            record_success!(span);
        }
        (Err(e), _) => {
            record_error!(span, e);
        }
        _ => {}
    }
}
