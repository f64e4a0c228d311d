//! Distributed locking boundary. [`LockClient`] is deliberately narrow:
//! acquire-with-retry and release-by-handle, matching the two operations
//! the dirty-document protocol needs. Concrete access lives in
//! [`redis_lock`].

pub mod redis_lock;

use async_trait::async_trait;

use crate::error::Result;

pub use redis_lock::RedisLockClient;

/// An acquired lock's identity: the key it guards and the opaque token
/// that must be presented to release it. The token makes release
/// idempotent and safe against a different holder's lock of the same key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHandle {
    pub key: String,
    pub token: String,
}

/// A distributed mutual-exclusion service keyed by opaque strings.
///
/// Implementations must make `release` safe to call on a lock this
/// process no longer holds (because it expired and was re-acquired by
/// someone else): it must only delete the key if the token still
/// matches.
#[async_trait]
pub trait LockClient: Send + Sync {
    /// Attempts to acquire `key`, retrying internally up to the
    /// implementation's configured budget. Returns
    /// [`crate::error::SchedulerError::LockFailure`] if the budget is
    /// exhausted without success.
    async fn acquire(&self, key: &str) -> Result<LockHandle>;

    /// Releases `handle` if and only if it is still the current holder of
    /// its key. Never fails the caller's unit of work: a failure here is
    /// logged by the implementation and swallowed, since the lock's TTL
    /// will eventually reclaim it.
    async fn release(&self, handle: LockHandle);
}
