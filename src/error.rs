//! Crate & protocol level errors.
//!
//! Every remote operation resolves to either a decoded value or an
//! [`RpcError`]. Remote peers only ever report one of the closed set of
//! [`StatusCode`]s; the richer variants here carry the local context (target
//! address, range, handle id) needed to act on them.
//!
//! # Error Classes
//!
//! | Class | Variants | Read routing | Single-target calls |
//! |-------|----------|--------------|---------------------|
//! | [`ErrorClass::Transient`] | `Timeout`, `Transport` | demote, try next | propagate |
//! | [`ErrorClass::StaleOwnership`] | `StaleOwnership` | demote, try next | propagate |
//! | [`ErrorClass::Protocol`] | `VersionMismatch`, `Codec` | stop | propagate |
//! | [`ErrorClass::Logical`] | everything else | stop | propagate |
//!
//! Single-target operations never retry internally; the right recovery
//! (re-resolve the master, abort the transaction, pick a new destination)
//! differs per call and belongs to the caller. See [`crate::retry`] for
//! caller-side helpers.

use std::time::Duration;

use num_derive::FromPrimitive;
use thiserror::Error as ThisError;

use crate::protocol::{CommandKind, CommandVersion};
use crate::types::{Address, RangeDescriptor};

pub type RpcResult<T> = Result<T, RpcError>;

/// Status codes a remote peer can put on a response.
///
/// This is intentionally a small closed set rather than free-form messages.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive, Default)]
#[repr(i32)]
pub enum StatusCode {
    #[default]
    Success = 0,
    /// The peer gave up on the request before finishing it.
    Timeout = 1,
    /// The peer no longer serves the requested tablet range.
    NotAuthoritativeForRange = 2,
    /// The peer cannot interpret the command at the version sent.
    VersionMismatch = 3,
    /// The peer was reached and refused the request; see the logical code.
    LogicalFailure = 4,
}

impl StatusCode {
    /// Decode a raw wire value, treating unknown values as logical failures.
    pub fn from_raw(raw: i32) -> Self {
        num_traits::FromPrimitive::from_i32(raw).unwrap_or(StatusCode::LogicalFailure)
    }

    pub fn is_success(self) -> bool {
        self == StatusCode::Success
    }

    /// Label used for metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::Success => "success",
            StatusCode::Timeout => "timeout",
            StatusCode::NotAuthoritativeForRange => "not_authoritative",
            StatusCode::VersionMismatch => "version_mismatch",
            StatusCode::LogicalFailure => "logical_failure",
        }
    }
}

/// Well-known logical failure codes.
///
/// Peers may report other codes too; these are the ones this layer produces
/// or inspects itself.
pub mod logical {
    /// Schema or table not found.
    pub const NOT_FOUND: i32 = 1001;
    /// The referenced transaction is already closed on the update node.
    pub const TRANSACTION_CLOSED: i32 = 1002;
    /// Destination could not satisfy the requested capacity.
    pub const NO_CAPACITY: i32 = 1003;
    /// File checksum did not match the migration task.
    pub const CHECKSUM_MISMATCH: i32 = 1004;
    /// A report batch arrived for an older sequence than the one in progress.
    pub const STALE_REPORT: i32 = 1005;
    /// Generic internal failure on the peer.
    pub const INTERNAL: i32 = 1999;
}

/// How the caller should react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connection refused, reset, or timed out.
    Transient,
    /// The target no longer serves the range; the caller's location list is outdated.
    StaleOwnership,
    /// The request itself is malformed for this peer; retrying elsewhere will not help.
    Protocol,
    /// A correctly reached peer refused the request.
    Logical,
}

impl ErrorClass {
    /// Whether read routing should demote the failing replica and move on.
    pub fn is_failover(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::StaleOwnership)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::StaleOwnership => "stale",
            ErrorClass::Protocol => "protocol",
            ErrorClass::Logical => "logical",
        }
    }
}

/// Errors produced by the remote-call layer.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum RpcError {
    /// No answer within the per-attempt timeout.
    #[error("request to {target} timed out after {after:?}")]
    Timeout { target: Address, after: Duration },

    /// Connection refused, reset, or otherwise lost.
    #[error("transport failure talking to {target}: {reason}")]
    Transport { target: Address, reason: String },

    /// The target reported it no longer serves the range.
    #[error("{target} is not authoritative for range {range:?}")]
    StaleOwnership {
        target: Address,
        range: Option<RangeDescriptor>,
    },

    /// The peer rejected the command version.
    #[error("{kind} sent at version {sent}, peer expects {expected}")]
    VersionMismatch {
        kind: CommandKind,
        sent: CommandVersion,
        expected: i32,
    },

    /// Explicit failure code from a correctly reached peer.
    #[error("remote failure {code}: {message}")]
    Logical { code: i32, message: String },

    /// A transaction handle was used after it was committed or aborted.
    #[error("transaction {id} is not open ({state})")]
    HandleNotOpen { id: u64, state: String },

    /// A migration step was attempted out of order.
    #[error("migration cannot move from {from} to {to}")]
    InvalidStage { from: String, to: String },

    /// Caller supplied something that can never succeed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Request or response body could not be (de)serialized.
    #[error("codec error: {0}")]
    Codec(String),
}

impl RpcError {
    pub fn logical(code: i32, message: impl Into<String>) -> Self {
        RpcError::Logical {
            code,
            message: message.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            RpcError::Timeout { .. } | RpcError::Transport { .. } => ErrorClass::Transient,
            RpcError::StaleOwnership { .. } => ErrorClass::StaleOwnership,
            RpcError::VersionMismatch { .. } | RpcError::Codec(_) => ErrorClass::Protocol,
            RpcError::Logical { .. }
            | RpcError::HandleNotOpen { .. }
            | RpcError::InvalidStage { .. }
            | RpcError::InvalidArgument(_) => ErrorClass::Logical,
        }
    }

    /// Shorthand for `self.class().is_failover()`.
    pub fn is_failover(&self) -> bool {
        self.class().is_failover()
    }

    /// The wire status this error corresponds to.
    pub fn status_code(&self) -> StatusCode {
        match self {
            RpcError::Timeout { .. } => StatusCode::Timeout,
            RpcError::StaleOwnership { .. } => StatusCode::NotAuthoritativeForRange,
            RpcError::VersionMismatch { .. } => StatusCode::VersionMismatch,
            // Transport failures never reach a peer; report them as timeouts.
            RpcError::Transport { .. } => StatusCode::Timeout,
            _ => StatusCode::LogicalFailure,
        }
    }
}

impl From<bincode::Error> for RpcError {
    fn from(e: bincode::Error) -> Self {
        RpcError::Codec(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> Address {
        Address::new("10.0.0.1", 2600)
    }

    #[test]
    fn test_status_code_from_raw() {
        assert_eq!(StatusCode::from_raw(0), StatusCode::Success);
        assert_eq!(StatusCode::from_raw(2), StatusCode::NotAuthoritativeForRange);
        assert_eq!(StatusCode::from_raw(3), StatusCode::VersionMismatch);
        // Unknown values fold into the logical bucket
        assert_eq!(StatusCode::from_raw(-7), StatusCode::LogicalFailure);
        assert_eq!(StatusCode::from_raw(99), StatusCode::LogicalFailure);
        assert!(StatusCode::from_raw(0).is_success());
        assert!(!StatusCode::from_raw(1).is_success());
    }

    #[test]
    fn test_error_classes() {
        let timeout = RpcError::Timeout {
            target: addr(),
            after: Duration::from_millis(10),
        };
        assert_eq!(timeout.class(), ErrorClass::Transient);
        assert!(timeout.is_failover());

        let stale = RpcError::StaleOwnership {
            target: addr(),
            range: None,
        };
        assert_eq!(stale.class(), ErrorClass::StaleOwnership);
        assert!(stale.is_failover());

        let version = RpcError::VersionMismatch {
            kind: CommandKind::Get,
            sent: CommandVersion::Default,
            expected: 3,
        };
        assert_eq!(version.class(), ErrorClass::Protocol);
        assert!(!version.is_failover());

        let logical = RpcError::logical(logical::NOT_FOUND, "no such table");
        assert_eq!(logical.class(), ErrorClass::Logical);
        assert!(!logical.is_failover());
    }

    #[test]
    fn test_status_code_mapping() {
        assert_eq!(
            RpcError::StaleOwnership {
                target: addr(),
                range: None
            }
            .status_code(),
            StatusCode::NotAuthoritativeForRange
        );
        assert_eq!(
            RpcError::HandleNotOpen {
                id: 1,
                state: "committed".into()
            }
            .status_code(),
            StatusCode::LogicalFailure
        );
    }

    #[test]
    fn test_error_display() {
        let err = RpcError::Transport {
            target: addr(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "transport failure talking to 10.0.0.1:2600: connection refused"
        );
    }
}
