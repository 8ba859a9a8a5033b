//! Tracing span helpers for the multi-step paths.
//!
//! Single remote calls only log on failure; the paths below span several
//! calls, so each gets its own span that OpenTelemetry (with the `otel`
//! feature) can export as one unit.
//!
//! # Paths Instrumented
//!
//! - Read routing sequences (one span per sequence, not per attempt)
//! - Migration handshake steps
//! - Transaction lifecycle calls
//! - Role and mastership resolution
//!
//! # Usage
//!
//! ```rust,ignore
//! use tabletrpc::observability::{route_span, RouteOperation};
//!
//! let span = route_span(RouteOperation::Scan, &range, list.len());
//! async {
//!     // drive the sequence
//! }.instrument(span).await;
//! ```

use std::fmt;

use tracing::{Level, Span, span};

use crate::types::{Address, RangeDescriptor};

/// Which read a routing sequence performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOperation {
    Get,
    Scan,
}

impl RouteOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Scan => "scan",
        }
    }
}

impl fmt::Display for RouteOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction lifecycle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionOperation {
    Start,
    ApplyPlan,
    ExecuteStatement,
    End,
}

impl fmt::Display for TransactionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::ApplyPlan => write!(f, "apply_plan"),
            Self::ExecuteStatement => write!(f, "execute_statement"),
            Self::End => write!(f, "end"),
        }
    }
}

/// Create a span for one read-routing sequence.
///
/// # Arguments
/// * `operation` - Get or scan
/// * `range` - The tablet being read
/// * `candidates` - Number of replicas in the location list
pub fn route_span(operation: RouteOperation, range: &RangeDescriptor, candidates: usize) -> Span {
    span!(
        Level::INFO,
        "tablet.route",
        operation = %operation,
        range = %range,
        candidates = candidates,
        winner = tracing::field::Empty,
        attempts = tracing::field::Empty,
        otel.kind = "client",
        otel.status_code = tracing::field::Empty,
    )
}

/// Create a span for one migration handshake step.
pub fn migration_span(range: &RangeDescriptor, source: &Address, stage: &str) -> Span {
    span!(
        Level::INFO,
        "tablet.migration",
        range = %range,
        source = %source,
        stage = %stage,
        otel.kind = "client",
        otel.status_code = tracing::field::Empty,
    )
}

/// Create a span for a transaction call.
///
/// `transaction_id` is `None` for start and for auto-commit calls.
pub fn transaction_span(operation: TransactionOperation, transaction_id: Option<u64>) -> Span {
    span!(
        Level::INFO,
        "transaction",
        operation = %operation,
        transaction_id = transaction_id.map(|id| id as i64).unwrap_or(-1),
        coordinator = tracing::field::Empty,
        otel.kind = "client",
        otel.status_code = tracing::field::Empty,
    )
}

/// Create a span for a role or mastership query.
pub fn role_query_span(query: &str, root: &Address) -> Span {
    span!(
        Level::DEBUG,
        "cluster.role",
        query = %query,
        root = %root,
        otel.kind = "client",
    )
}

/// Record an error on a span.
///
/// This sets the `otel.status_code` to "ERROR" and records the error message.
#[macro_export]
macro_rules! record_error {
    ($span:expr, $err:expr) => {
        $span.record("otel.status_code", "ERROR");
        tracing::debug!(parent: &$span, error = %$err, "Operation failed");
    };
}

/// Record success on a span.
#[macro_export]
macro_rules! record_success {
    ($span:expr) => {
        $span.record("otel.status_code", "OK");
    };
}
