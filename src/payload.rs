//! Opaque request and result payloads.
//!
//! Scanner results, mutations, get/scan parameters, schema snapshots and
//! query plans are produced and consumed by layers above this one. This
//! crate only ferries them between nodes, so each is a thin newtype over
//! already-encoded bytes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

macro_rules! opaque_payload {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
        pub struct $name(pub Bytes);

        impl $name {
            pub fn new(bytes: impl Into<Bytes>) -> Self {
                Self(bytes.into())
            }

            pub fn as_bytes(&self) -> &[u8] {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<Bytes> for $name {
            fn from(bytes: Bytes) -> Self {
                Self(bytes)
            }
        }
    };
}

opaque_payload!(
    /// Parameters of a point lookup.
    GetParam
);
opaque_payload!(
    /// Parameters of a range scan.
    ScanParam
);
opaque_payload!(
    /// Rows returned by a get, scan, or mutation.
    Scanner
);
opaque_payload!(
    /// A batch of row mutations.
    Mutator
);
opaque_payload!(
    /// A full schema manager snapshot.
    SchemaSnapshot
);
opaque_payload!(
    /// Schema of a table to create.
    TableSchema
);
opaque_payload!(
    /// Column changes for an existing table.
    AlterTableSchema
);
opaque_payload!(
    /// A physical query plan for the update node.
    PhysicalPlan
);
opaque_payload!(
    /// Result of executing a physical plan.
    PlanResult
);
opaque_payload!(
    /// Transaction start parameters (isolation, timeouts).
    TransactionRequest
);

/// Outcome of a bulk-load of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableImportInfo {
    pub table_id: crate::types::TableId,
    pub tablet_count: u64,
}
