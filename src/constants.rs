//! Centralized protocol and configuration constants.
//!
//! # Categories
//!
//! - **Protocol Constants**: command version tags
//! - **Timeout Constants**: default per-attempt timeouts used by [`crate::config`]
//! - **Migration Constants**: path limits and report batching

use std::time::Duration;

// =============================================================================
// Protocol Constants
// =============================================================================

/// Version tag carried on ordinary commands.
pub const DEFAULT_COMMAND_VERSION: i32 = 1;

/// Version tag carried on heartbeat-style commands.
///
/// Receivers on a newer negotiated protocol revision read heartbeats at this
/// version; it is fixed per command kind and never negotiated here.
pub const HEARTBEAT_COMMAND_VERSION: i32 = 2;

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default timeout for a single control-plane call (root, update node).
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(1);

/// Default timeout for one replica attempt during read routing.
///
/// This bounds each attempt, not the whole sequence: a sequence over `n`
/// replicas can take up to `n` times this value.
pub const DEFAULT_ROUTE_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(500);

/// Default timeout for migration handshake steps.
///
/// Load requests make the destination validate files before acknowledging,
/// so they get a longer budget than ordinary calls.
pub const DEFAULT_MIGRATION_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Migration Constants
// =============================================================================

/// Maximum byte length of a file path in a migration task.
pub const MAX_FILE_PATH_LENGTH: usize = 1024;

/// Maximum number of files a single migration task may reference.
pub const MAX_MIGRATION_FILES: usize = 64;

/// Default number of tablets per report batch.
pub const DEFAULT_REPORT_BATCH_SIZE: usize = 1024;

/// Default upper bound on replica attempts for one read.
///
/// Zero means "as many as the location list holds".
pub const DEFAULT_MAX_ROUTE_ATTEMPTS: usize = 0;
