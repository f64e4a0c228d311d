use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};

use super::{LockClient, LockHandle};

/// Compare-and-delete Lua script: only releases a key if the caller's
/// token is still the one that holds it. Makes release idempotent
/// against a lock this process no longer owns.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed [`LockClient`]: `SET key token NX PX ttl` to acquire,
/// retrying with a fixed backoff up to a configured attempt budget.
pub struct RedisLockClient {
    manager: redis::aio::ConnectionManager,
    ttl: Duration,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl RedisLockClient {
    pub async fn connect(
        url: &str,
        ttl: Duration,
        retry_attempts: u32,
        retry_backoff: Duration,
    ) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| SchedulerError::ConfigFatal(format!("redis url: {e}")))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| SchedulerError::ConfigFatal(format!("redis connect: {e}")))?;
        Ok(Self {
            manager,
            ttl,
            retry_attempts,
            retry_backoff,
        })
    }
}

#[async_trait]
impl LockClient for RedisLockClient {
    async fn acquire(&self, key: &str) -> Result<LockHandle> {
        let mut conn = self.manager.clone();
        let ttl_ms: usize = self.ttl.as_millis().try_into().unwrap_or(usize::MAX);

        let mut last_err: Option<redis::RedisError> = None;
        for attempt in 0..self.retry_attempts.max(1) {
            let token = Uuid::new_v4().to_string();
            let result: std::result::Result<Option<String>, redis::RedisError> = conn
                .set_options(
                    key,
                    token.clone(),
                    redis::SetOptions::default()
                        .conditional_set(redis::ExistenceCheck::NX)
                        .with_expiration(redis::SetExpiry::PX(ttl_ms)),
                )
                .await;

            match result {
                Ok(Some(_)) => {
                    return Ok(LockHandle { key: key.to_string(), token });
                }
                Ok(None) => {
                    if attempt + 1 < self.retry_attempts {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
                Err(e) => {
                    last_err = Some(e);
                    if attempt + 1 < self.retry_attempts {
                        tokio::time::sleep(self.retry_backoff).await;
                    }
                }
            }
        }

        Err(SchedulerError::LockFailure {
            key: key.to_string(),
            reason: last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "lock already held".to_string()),
        })
    }

    async fn release(&self, handle: LockHandle) {
        let mut conn = self.manager.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let result: std::result::Result<i64, redis::RedisError> = script
            .key(&handle.key)
            .arg(&handle.token)
            .invoke_async(&mut conn)
            .await;
        if let Err(e) = result {
            warn!(key = %handle.key, error = %e, "failed to release lock; relying on TTL expiry");
        }
    }
}
