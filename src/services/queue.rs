use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::{AsyncCommands, Script};
use uuid::Uuid;

use crate::models::job::JobMessage;

const QUEUE_KEY: &str = "document_classifier:jobs";
const INFLIGHT_KEY: &str = "document_classifier:inflight";
const RECEIPTS_KEY: &str = "document_classifier:receipts";

/// Redeliver the oldest expired lease if any, otherwise pop the next ready
/// message. Either way the message is leased until ARGV[2] under receipt ARGV[3].
const RECEIVE_SCRIPT: &str = r#"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1], 'LIMIT', 0, 1)
local payload = expired[1]
if not payload then
  payload = redis.call('RPOP', KEYS[1])
end
if not payload then
  return false
end
redis.call('ZADD', KEYS[2], ARGV[2], payload)
redis.call('HSET', KEYS[3], payload, ARGV[3])
return payload
"#;

const ACK_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) == ARGV[2] then
  redis.call('ZREM', KEYS[1], ARGV[1])
  redis.call('HDEL', KEYS[2], ARGV[1])
  return 1
end
return 0
"#;

const DEFER_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[2], ARGV[1]) == ARGV[2] then
  redis.call('ZADD', KEYS[1], 'XX', ARGV[3], ARGV[1])
  return 1
end
return 0
"#;

/// Identifies one delivery of a message. Only the current holder of a lease
/// has a handle whose receipt is accepted by `ack` and `defer`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AckHandle {
    payload: String,
    receipt: String,
}

impl AckHandle {
    pub fn new(payload: String, receipt: String) -> Self {
        Self { payload, receipt }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn receipt(&self) -> &str {
        &self.receipt
    }
}

/// A message received under a visibility lease.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: JobMessage,
    pub handle: AckHandle,
}

/// At-least-once delivery channel with visibility leases.
///
/// A received message stays hidden from other consumers until its lease
/// expires, then becomes visible again unless it was acknowledged.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn publish(&self, message: &JobMessage) -> Result<(), QueueError>;

    /// Take the next visible message, leasing it for `lease`. Returns `None`
    /// when nothing is visible.
    async fn receive(&self, lease: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove the message for good. Returns `false` if the lease was lost.
    async fn ack(&self, handle: &AckHandle) -> Result<bool, QueueError>;

    /// Keep the message unacknowledged but hidden for `delay` from now, after
    /// which it is redelivered. Returns `false` if the lease was lost.
    async fn defer(&self, handle: &AckHandle, delay: Duration) -> Result<bool, QueueError>;

    /// Number of messages waiting to be received.
    async fn depth(&self) -> Result<u64, QueueError>;

    async fn health_check(&self) -> Result<(), QueueError>;
}

/// Redis-backed broker: a ready list, a sorted set of leased messages scored
/// by lease deadline, and a hash of the current receipt per leased message.
pub struct RedisBroker {
    client: redis::Client,
    receive_script: Script,
    ack_script: Script,
    defer_script: Script,
}

impl RedisBroker {
    pub fn new(redis_url: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::Redis)?;
        Ok(Self {
            client,
            receive_script: Script::new(RECEIVE_SCRIPT),
            ack_script: Script::new(ACK_SCRIPT),
            defer_script: Script::new(DEFER_SCRIPT),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(QueueError::Redis)
    }
}

fn deadline_ms(delay: Duration) -> i64 {
    Utc::now().timestamp_millis() + delay.as_millis() as i64
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, message: &JobMessage) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(message).map_err(QueueError::Serialize)?;
        conn.lpush::<_, _, ()>(QUEUE_KEY, &payload)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }

    async fn receive(&self, lease: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        let receipt = Uuid::new_v4().to_string();
        let payload: Option<String> = self
            .receive_script
            .key(QUEUE_KEY)
            .key(INFLIGHT_KEY)
            .key(RECEIPTS_KEY)
            .arg(Utc::now().timestamp_millis())
            .arg(deadline_ms(lease))
            .arg(&receipt)
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;

        let Some(payload) = payload else {
            return Ok(None);
        };

        match serde_json::from_str::<JobMessage>(&payload) {
            Ok(message) => Ok(Some(Delivery {
                message,
                handle: AckHandle::new(payload, receipt),
            })),
            Err(e) => {
                // Unparseable payloads would otherwise be redelivered forever.
                tracing::error!(payload = %payload, error = %e, "Dropping malformed queue message");
                self.ack(&AckHandle::new(payload, receipt)).await?;
                Err(QueueError::Serialize(e))
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let removed: i32 = self
            .ack_script
            .key(INFLIGHT_KEY)
            .key(RECEIPTS_KEY)
            .arg(handle.payload())
            .arg(handle.receipt())
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(removed == 1)
    }

    async fn defer(&self, handle: &AckHandle, delay: Duration) -> Result<bool, QueueError> {
        let mut conn = self.connection().await?;
        let updated: i32 = self
            .defer_script
            .key(INFLIGHT_KEY)
            .key(RECEIPTS_KEY)
            .arg(handle.payload())
            .arg(handle.receipt())
            .arg(deadline_ms(delay))
            .invoke_async(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(updated == 1)
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let depth: u64 = conn.llen(QUEUE_KEY).await.map_err(QueueError::Redis)?;
        Ok(depth)
    }

    /// Check Redis connectivity (for health checks).
    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(QueueError::Redis)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}
