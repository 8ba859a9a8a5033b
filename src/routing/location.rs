//! Replica locations and their ordering.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::types::{Address, RangeDescriptor};

/// One candidate holder of a tablet range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplicaLocation {
    pub address: Address,
    /// Locality score from an external topology scorer; lower is closer.
    pub distance_score: u64,
    /// Whether the last attempt against this replica succeeded.
    pub last_known_good: bool,
}

impl ReplicaLocation {
    pub fn new(address: Address, distance_score: u64) -> Self {
        Self {
            address,
            distance_score,
            last_known_good: false,
        }
    }
}

/// Decides which replicas are tried first.
///
/// The locality metric behind the order is not this crate's business, so
/// it is injected rather than computed here.
pub trait LocationOrder: Send + Sync {
    fn compare(&self, a: &ReplicaLocation, b: &ReplicaLocation) -> Ordering;
}

/// Ascending [`ReplicaLocation::distance_score`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ByDistance;

impl LocationOrder for ByDistance {
    fn compare(&self, a: &ReplicaLocation, b: &ReplicaLocation) -> Ordering {
        a.distance_score.cmp(&b.distance_score)
    }
}

impl<F> LocationOrder for F
where
    F: Fn(&ReplicaLocation, &ReplicaLocation) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &ReplicaLocation, b: &ReplicaLocation) -> Ordering {
        self(a, b)
    }
}

/// Ordered replicas of one tablet.
///
/// Owned by the caller between routing sequences. Routing never edits a
/// list in place; it returns the reordered list in its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationList {
    range: RangeDescriptor,
    locations: Vec<ReplicaLocation>,
}

impl LocationList {
    pub fn new(range: RangeDescriptor, locations: Vec<ReplicaLocation>) -> Self {
        Self { range, locations }
    }

    pub fn range(&self) -> &RangeDescriptor {
        &self.range
    }

    pub fn locations(&self) -> &[ReplicaLocation] {
        &self.locations
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn front(&self) -> Option<&ReplicaLocation> {
        self.locations.first()
    }

    /// Addresses in current order.
    pub fn addresses(&self) -> Vec<Address> {
        self.locations.iter().map(|l| l.address.clone()).collect()
    }

    /// A copy stably sorted by `order`.
    pub fn sorted(&self, order: &dyn LocationOrder) -> Self {
        let mut sorted = self.clone();
        sorted.locations.sort_by(|a, b| order.compare(a, b));
        sorted
    }

    /// Move the front entry to the back, keeping the others in order.
    pub(crate) fn demote_front(&mut self) {
        if self.locations.is_empty() {
            return;
        }
        let mut failed = self.locations.remove(0);
        failed.last_known_good = false;
        self.locations.push(failed);
    }

    pub(crate) fn mark_front_good(&mut self) {
        if let Some(front) = self.locations.first_mut() {
            front.last_known_good = true;
        }
    }
}
