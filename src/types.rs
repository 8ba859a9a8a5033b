//! Value types shared by every client.
//!
//! These are plain immutable values: node addresses, tablet range
//! identifiers, and the role designations the root node hands out.
//! Row keys are opaque byte strings; ordering and overlap of ranges is the
//! business of the schema layer, not of this crate.

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Network address of one cluster member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("address '{}' is missing a port", s))?;
        if host.is_empty() {
            return Err(format!("address '{}' is missing a host", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| format!("address '{}' has an invalid port: {}", s, e))?;
        Ok(Address::new(host, port))
    }
}

/// A table identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TableId(pub u64);

impl TableId {
    #[inline]
    pub const fn new(value: u64) -> Self {
        TableId(value)
    }

    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for TableId {
    fn from(value: u64) -> Self {
        TableId(value)
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque encoded row key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct RowKey(pub Bytes);

impl RowKey {
    pub fn new(key: impl Into<Bytes>) -> Self {
        RowKey(key.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Row-key interval of a tablet.
///
/// `None` on either side means unbounded. The bounds are carried as-is;
/// comparing them is left to the schema layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RowKeyRange {
    pub start: Option<RowKey>,
    pub end: Option<RowKey>,
}

impl RowKeyRange {
    pub fn new(start: Option<RowKey>, end: Option<RowKey>) -> Self {
        Self { start, end }
    }

    /// The range covering every key.
    pub fn whole() -> Self {
        Self::default()
    }
}

impl fmt::Display for RowKeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |key: &Option<RowKey>| match key {
            Some(k) => format!("{:02x?}", k.as_bytes()),
            None => "*".to_string(),
        };
        write!(f, "({}, {}]", side(&self.start), side(&self.end))
    }
}

/// Identifies one tablet: a table plus a row-key range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RangeDescriptor {
    pub table_id: TableId,
    pub range: RowKeyRange,
}

impl RangeDescriptor {
    pub fn new(table_id: impl Into<TableId>, range: RowKeyRange) -> Self {
        Self {
            table_id: table_id.into(),
            range,
        }
    }
}

impl fmt::Display for RangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "table {} {}", self.table_id, self.range)
    }
}

/// Master/slave designation of a node replica.
///
/// Always a point-in-time answer. Nothing in this crate keeps one beyond the
/// call that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ClusterRole {
    #[default]
    Unknown,
    Master,
    Slave,
}

impl ClusterRole {
    pub fn is_master(self) -> bool {
        self == ClusterRole::Master
    }
}

impl fmt::Display for ClusterRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterRole::Unknown => write!(f, "unknown"),
            ClusterRole::Master => write!(f, "master"),
            ClusterRole::Slave => write!(f, "slave"),
        }
    }
}

/// The kind of server sending a heartbeat or registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRole {
    Root,
    Chunk,
    Merge,
    Update,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerRole::Root => write!(f, "root"),
            ServerRole::Chunk => write!(f, "chunk"),
            ServerRole::Merge => write!(f, "merge"),
            ServerRole::Update => write!(f, "update"),
        }
    }
}

/// One replica of a tablet as the root node reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletLocation {
    pub server: Address,
    pub tablet_version: i64,
}

/// One update-node replica offered for reads, with its share of read traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateServerInfo {
    pub server: Address,
    pub read_percent: u8,
    pub role: ClusterRole,
}
