//! Migration and tablet-report value types.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::{MAX_FILE_PATH_LENGTH, MAX_MIGRATION_FILES};
use crate::error::{RpcError, RpcResult};
use crate::types::{Address, RangeDescriptor};

/// A file path no longer than [`MAX_FILE_PATH_LENGTH`] bytes.
///
/// Validated at construction (and on deserialization), so a task can never
/// carry a path the destination would have to truncate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BoundedPath(String);

impl BoundedPath {
    pub const MAX_LEN: usize = MAX_FILE_PATH_LENGTH;

    pub fn new(path: impl Into<String>) -> RpcResult<Self> {
        let path = path.into();
        if path.is_empty() {
            return Err(RpcError::InvalidArgument("file path is empty".into()));
        }
        if path.len() > Self::MAX_LEN {
            return Err(RpcError::InvalidArgument(format!(
                "file path is {} bytes, limit is {}",
                path.len(),
                Self::MAX_LEN
            )));
        }
        Ok(BoundedPath(path))
    }

    /// Append a file name below this directory.
    pub fn join(&self, name: &str) -> RpcResult<Self> {
        let name = name.trim_start_matches('/');
        if self.0.ends_with('/') {
            BoundedPath::new(format!("{}{}", self.0, name))
        } else {
            BoundedPath::new(format!("{}/{}", self.0, name))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for BoundedPath {
    type Error = RpcError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        BoundedPath::new(value)
    }
}

impl From<BoundedPath> for String {
    fn from(path: BoundedPath) -> Self {
        path.0
    }
}

impl fmt::Display for BoundedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the root node wants migrated files placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationDestination {
    pub disk_no: i32,
    pub path: BoundedPath,
}

/// Everything a destination needs to pull and validate one tablet.
///
/// Immutable once built; a correction requires a new task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationTask {
    range: RangeDescriptor,
    source: Address,
    dest: Address,
    dest_disk_no: i32,
    tablet_version: i64,
    tablet_seq_num: i64,
    checksum: u64,
    file_paths: Vec<BoundedPath>,
}

impl MigrationTask {
    /// `range` must be the range `source` currently serves. That is not
    /// checked here: the root owns the routing table and refuses the
    /// completion of a task whose source does not hold the range.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        range: RangeDescriptor,
        source: Address,
        dest: Address,
        dest_disk_no: i32,
        tablet_version: i64,
        tablet_seq_num: i64,
        checksum: u64,
        file_paths: Vec<BoundedPath>,
    ) -> RpcResult<Self> {
        if source == dest {
            return Err(RpcError::InvalidArgument(format!(
                "migration source and destination are both {}",
                source
            )));
        }
        if file_paths.len() > MAX_MIGRATION_FILES {
            return Err(RpcError::InvalidArgument(format!(
                "migration references {} files, limit is {}",
                file_paths.len(),
                MAX_MIGRATION_FILES
            )));
        }
        Ok(Self {
            range,
            source,
            dest,
            dest_disk_no,
            tablet_version,
            tablet_seq_num,
            checksum,
            file_paths,
        })
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

    pub fn dest_disk_no(&self) -> i32 {
        self.dest_disk_no
    }

    pub fn tablet_version(&self) -> i64 {
        self.tablet_version
    }

    pub fn tablet_seq_num(&self) -> i64 {
        self.tablet_seq_num
    }

    pub fn checksum(&self) -> u64 {
        self.checksum
    }

    pub fn file_paths(&self) -> &[BoundedPath] {
        &self.file_paths
    }

    /// The completion notice matching this task.
    pub fn completion(&self, keep_source: bool) -> MigrationCompletion {
        MigrationCompletion {
            range: self.range.clone(),
            source: self.source.clone(),
            dest: self.dest.clone(),
            keep_source,
            tablet_version: self.tablet_version,
            tablet_seq_num: self.tablet_seq_num,
        }
    }
}

/// Notice to the root node that a handshake finished.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MigrationCompletion {
    pub range: RangeDescriptor,
    pub source: Address,
    pub dest: Address,
    /// `true` for a copy (both replicas stay valid), `false` for a move.
    pub keep_source: bool,
    pub tablet_version: i64,
    pub tablet_seq_num: i64,
}

/// One tablet as a storage node sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReportInfo {
    pub range: RangeDescriptor,
    pub row_count: u64,
    pub occupy_size: u64,
    pub checksum: u64,
    pub tablet_version: i64,
    pub tablet_seq_num: i64,
}

/// One slice of a reporter's tablet set.
///
/// Batches sharing `(reporter, timestamp)` form one reporting sequence; the
/// root commits the sequence only when the batch with `has_more = false`
/// arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletReportBatch {
    pub reporter: Address,
    pub tablets: Vec<TabletReportInfo>,
    pub timestamp: i64,
    pub has_more: bool,
}
