//! Tablet migration handshake and existence reporting.
//!
//! # Handshake
//!
//! Moving (or copying) one tablet replica is three remote steps, always in
//! this order:
//!
//! 1. ask the root for a destination disk and path
//!    ([`MigrationCoordinator::select_destination`])
//! 2. ask the destination to load and checksum the files
//!    ([`MigrationCoordinator::load`])
//! 3. tell the root the handshake is done
//!    ([`MigrationCoordinator::complete`])
//!
//! [`MigrationHandshake`] enforces the order. Any failure ends the handshake
//! in [`MigrationStage::Failed`]; the caller decides whether to start over.
//!
//! # Reporting
//!
//! A storage node periodically reports its whole tablet set as one
//! [`ReportSequence`]: ordered batches sharing a timestamp, the last one
//! flagged `has_more = false`. The root treats the sequence as provisional
//! until that last batch arrives.

mod coordinator;
mod handshake;
mod report;
mod task;

pub use coordinator::MigrationCoordinator;
pub use handshake::{MigrationHandshake, MigrationStage};
pub use report::{ReportSequence, report_timestamp};
pub use task::{
    BoundedPath, MigrationCompletion, MigrationDestination, MigrationTask, TabletReportBatch,
    TabletReportInfo,
};
