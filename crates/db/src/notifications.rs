//! Rolling-window notification ledger in Redis.
//!
//! One sorted set per wallet object, scored by send time in milliseconds.
//! Each key expires one window after its newest record, so idle objects
//! clean themselves up; `reap` trims the rest.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::time::Duration;
use stampsync_core::ports::NotificationLedger;
use stampsync_core::types::NotificationRecord;
use stampsync_core::SyncResult;
use tracing::debug;

use crate::redis_error;

const KEY_PREFIX: &str = "stampsync:notify:";

const RECORD_SCRIPT: &str = r#"
local key = KEYS[1]
local score = tonumber(ARGV[1])
local member = ARGV[2]
local ttl_ms = tonumber(ARGV[3])

redis.call('ZADD', key, score, member)
redis.call('PEXPIRE', key, ttl_ms)
return redis.call('ZCARD', key)
"#;

/// Trim, count and conditionally insert in one round trip, so concurrent
/// senders for the same object cannot both take the last slot.
const RESERVE_SCRIPT: &str = r#"
local key = KEYS[1]
local score = tonumber(ARGV[1])
local member = ARGV[2]
local ttl_ms = tonumber(ARGV[3])
local since = ARGV[4]
local limit = tonumber(ARGV[5])

redis.call('ZREMRANGEBYSCORE', key, '-inf', since)
local sent = redis.call('ZCOUNT', key, '(' .. since, '+inf')
if sent >= limit then
  return 0
end
redis.call('ZADD', key, score, member)
redis.call('PEXPIRE', key, ttl_ms)
return 1
"#;

pub fn ledger_key(object_id: &str) -> String {
    format!("{}{}", KEY_PREFIX, object_id)
}

/// Sorted-set member: unique per record, readable in `redis-cli`.
fn ledger_member(record: &NotificationRecord) -> String {
    format!(
        "{}:{}:{}",
        record.sent_at.timestamp_millis(),
        record.kind.as_str(),
        nanoid::nanoid!(8)
    )
}

/// Score bound that excludes `at` itself.
fn exclusive(at: DateTime<Utc>) -> String {
    format!("({}", at.timestamp_millis())
}

#[derive(Clone)]
pub struct RedisNotificationLedger {
    client: redis::Client,
    window: chrono::Duration,
    timeout: Duration,
}

impl RedisNotificationLedger {
    pub fn new(client: redis::Client, window: chrono::Duration, timeout: Duration) -> Self {
        Self {
            client,
            window,
            timeout,
        }
    }

    /// Both connecting and every later response are bounded by `timeout`.
    async fn connection(&self) -> SyncResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection_with_timeouts(self.timeout, self.timeout)
            .await
            .map_err(redis_error)
    }

    fn ttl_ms(&self) -> i64 {
        self.window.num_milliseconds().max(1)
    }
}

#[async_trait]
impl NotificationLedger for RedisNotificationLedger {
    async fn count_since(&self, object_id: &str, since: DateTime<Utc>) -> SyncResult<u32> {
        let mut conn = self.connection().await?;
        let count: u32 = conn
            .zcount(ledger_key(object_id), exclusive(since), "+inf")
            .await
            .map_err(redis_error)?;
        Ok(count)
    }

    async fn try_reserve(
        &self,
        record: &NotificationRecord,
        since: DateTime<Utc>,
        limit: u32,
    ) -> SyncResult<Option<String>> {
        let mut conn = self.connection().await?;
        let member = ledger_member(record);
        let reserved: i32 = redis::Script::new(RESERVE_SCRIPT)
            .key(ledger_key(&record.object_id))
            .arg(record.sent_at.timestamp_millis())
            .arg(&member)
            .arg(self.ttl_ms())
            .arg(since.timestamp_millis())
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        debug!(
            object_id = %record.object_id,
            kind = record.kind.as_str(),
            reserved = reserved == 1,
            "notification reservation"
        );
        Ok((reserved == 1).then_some(member))
    }

    async fn record(&self, record: &NotificationRecord) -> SyncResult<String> {
        let mut conn = self.connection().await?;
        let member = ledger_member(record);
        let total: u32 = redis::Script::new(RECORD_SCRIPT)
            .key(ledger_key(&record.object_id))
            .arg(record.sent_at.timestamp_millis())
            .arg(&member)
            .arg(self.ttl_ms())
            .invoke_async(&mut conn)
            .await
            .map_err(redis_error)?;
        debug!(
            object_id = %record.object_id,
            kind = record.kind.as_str(),
            total,
            "notification recorded"
        );
        Ok(member)
    }

    async fn release(&self, object_id: &str, reservation: &str) -> SyncResult<()> {
        let mut conn = self.connection().await?;
        let _: u32 = conn
            .zrem(ledger_key(object_id), reservation)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn reap(&self, older_than: DateTime<Utc>) -> SyncResult<u64> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = {
            let mut iter = conn
                .scan_match::<_, String>(format!("{}*", KEY_PREFIX))
                .await
                .map_err(redis_error)?;
            let mut keys = Vec::new();
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
            keys
        };

        let mut removed = 0u64;
        for key in keys {
            let trimmed: u64 = conn
                .zrembyscore(&key, "-inf", exclusive(older_than))
                .await
                .map_err(redis_error)?;
            removed += trimmed;
        }
        Ok(removed)
    }
}
