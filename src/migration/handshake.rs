//! Per-task migration state machine.
//!
//! # State Transitions
//!
//! ```text
//! Selected -> LoadRequested -> LoadAcked -> CompletionNotified
//!    |             |              |
//!    +-------------+--------------+------> Failed
//! ```
//!
//! `CompletionNotified` and `Failed` are terminal. A failed handshake is
//! never resumed; the caller starts over with a fresh destination.

use std::fmt;
use std::time::{Duration, Instant};

use super::task::{MigrationDestination, MigrationTask};
use crate::error::{RpcError, RpcResult};
use crate::types::{Address, RangeDescriptor};

/// Stage of one migration handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MigrationStage {
    /// The root picked a destination disk and path.
    Selected,
    /// A load request is in flight to the destination.
    LoadRequested,
    /// The destination verified and loaded the files.
    LoadAcked,
    /// The root was told the handshake is done.
    CompletionNotified,
    /// A step failed; the handshake cannot continue.
    Failed,
}

impl MigrationStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Selected => "selected",
            Self::LoadRequested => "load_requested",
            Self::LoadAcked => "load_acked",
            Self::CompletionNotified => "completion_notified",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::CompletionNotified | Self::Failed)
    }

    /// Whether `next` may directly follow this stage.
    pub fn can_transition_to(self, next: MigrationStage) -> bool {
        use MigrationStage::*;
        match (self, next) {
            (Selected, LoadRequested) => true,
            (LoadRequested, LoadAcked) => true,
            (LoadAcked, CompletionNotified) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for MigrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tablet's trip from `source` to `dest`.
///
/// Built by [`MigrationCoordinator::select_destination`](super::MigrationCoordinator::select_destination)
/// and driven step by step; each step checks the stage first so steps can
/// never run out of order or twice.
#[derive(Debug)]
pub struct MigrationHandshake {
    range: RangeDescriptor,
    source: Address,
    dest: Address,
    occupy_size: u64,
    destination: MigrationDestination,
    task: Option<MigrationTask>,
    stage: MigrationStage,
    started_at: Instant,
}

impl MigrationHandshake {
    pub(crate) fn new(
        range: RangeDescriptor,
        source: Address,
        dest: Address,
        occupy_size: u64,
        destination: MigrationDestination,
    ) -> Self {
        Self {
            range,
            source,
            dest,
            occupy_size,
            destination,
            task: None,
            stage: MigrationStage::Selected,
            started_at: Instant::now(),
        }
    }

    pub fn range(&self) -> &RangeDescriptor {
        &self.range
    }

    pub fn source(&self) -> &Address {
        &self.source
    }

    pub fn dest(&self) -> &Address {
        &self.dest
    }

    pub fn occupy_size(&self) -> u64 {
        self.occupy_size
    }

    /// Disk and path the root assigned.
    pub fn destination(&self) -> &MigrationDestination {
        &self.destination
    }

    /// The load task, once one was built.
    pub fn task(&self) -> Option<&MigrationTask> {
        self.task.as_ref()
    }

    pub fn stage(&self) -> MigrationStage {
        self.stage
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub(crate) fn set_task(&mut self, task: MigrationTask) {
        self.task = Some(task);
    }

    /// Move to `next`, or fail with [`RpcError::InvalidStage`].
    pub(crate) fn advance(&mut self, next: MigrationStage) -> RpcResult<()> {
        if !self.stage.can_transition_to(next) {
            return Err(RpcError::InvalidStage {
                from: self.stage.to_string(),
                to: next.to_string(),
            });
        }
        self.stage = next;
        Ok(())
    }

    pub(crate) fn fail(&mut self) {
        if !self.stage.is_terminal() {
            self.stage = MigrationStage::Failed;
        }
    }
}
