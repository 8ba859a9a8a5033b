//! Role-scoped service clients.
//!
//! - [`traits`]: one async trait per target role
//! - [`RpcStub`]: implements every trait over an injected transport
//! - [`mock`]: in-memory doubles (tests and the `test-utilities` feature)

use std::future::Future;
use std::time::Duration;

use crate::error::{RpcError, RpcResult};
use crate::types::Address;

#[cfg(any(test, feature = "test-utilities"))]
pub mod mock;
mod stub;
pub mod traits;

pub use stub::RpcStub;
pub use traits::{ChunkClient, RootClient, TransactionClient, UpdateClient};

/// Bound one remote call by its per-attempt timeout.
///
/// The peer is also told the timeout, but a hung connection would never
/// answer, so every call is cut off locally as well.
pub(crate) async fn bounded<T, F>(timeout: Duration, target: &Address, call: F) -> RpcResult<T>
where
    F: Future<Output = RpcResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout {
            target: target.clone(),
            after: timeout,
        }),
    }
}
