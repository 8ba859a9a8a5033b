//! Replica read routing.
//!
//! Gets and scans go to one replica of a tablet at a time, chosen from a
//! caller-held [`LocationList`]. Failed replicas move to the back of the
//! list; the reordered list comes back in the [`RouteOutcome`] so the
//! caller can start the next read from the replica that last answered.

mod location;
mod router;

pub use location::{ByDistance, LocationList, LocationOrder, ReplicaLocation};
pub use router::{RetryRouter, RouteOptions, RouteOutcome, route};
