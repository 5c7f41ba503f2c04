//! Ephemeral, fast-access key-value store. Backed by Redis through a
//! `ConnectionManager`, the same collaborator the pack's caching layer
//! uses for its L3 tier, issuing raw `redis::cmd` calls rather than the
//! typed `redis::Commands` trait so every call site stays explicit about
//! the wire command it sends.
//!
//! Keys are namespaced by prefix (`upload_session:`, `file:`,
//! `ratelimit:`, `abuse:`, `blacklist:`) — see the `keys` module.
//!
//! This module does NOT decide fail-open/fail-closed policy; it only
//! reports whether the store answered. Callers (`RateLimiter`,
//! `DownloadEngine`'s cache lookups, `UploadEngine`'s session cache)
//! each apply the degraded-mode behavior spec.md §4.3 assigns to their
//! own call site.

use crate::error::{Error, Result};
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::time::Duration;

mod in_memory;
pub use in_memory::InMemoryVolatileStore;

pub mod keys {
    pub fn upload_session(session_id: &str) -> String {
        format!("upload_session:{session_id}")
    }

    pub fn session_chunks(session_id: &str) -> String {
        format!("upload_session:{session_id}:chunks")
    }

    pub fn file(file_id: &str) -> String {
        format!("file:{file_id}")
    }

    pub fn rate_limit(identifier: &str, limit_type: &str) -> String {
        format!("ratelimit:{limit_type}:{identifier}")
    }

    pub fn abuse(ip: &str) -> String {
        format!("abuse:{ip}")
    }

    pub fn blacklist(ip: &str) -> String {
        format!("blacklist:{ip}")
    }
}

#[async_trait::async_trait]
pub trait VolatileStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;
    async fn ttl(&self, key: &str) -> Result<Option<i64>>;

    async fn incr(&self, key: &str) -> Result<i64>;
    async fn incrby(&self, key: &str, delta: i64) -> Result<i64>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;

    async fn sadd(&self, key: &str, member: &str) -> Result<()>;
    async fn sismember(&self, key: &str, member: &str) -> Result<bool>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()>;
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64>;
    async fn zcard(&self, key: &str) -> Result<i64>;
    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Deletes every key matching `pattern` (glob-style, as Redis `SCAN`
    /// interprets it). Used by admin tooling and the cleanup worker, not
    /// the hot path.
    async fn scan_delete(&self, pattern: &str) -> Result<u64>;
}

/// Redis-backed `VolatileStore`. Connects via a `ConnectionManager`,
/// which reconnects transparently on transient failures; genuine
/// unavailability surfaces as `Error::Storage` for the caller to
/// interpret per its own degraded-mode policy.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Internal { msg: format!("invalid redis url: {e}") })?;
        let conn = tokio::time::timeout(Duration::from_secs(10), client.get_connection_manager())
            .await
            .map_err(|_| Error::Storage { error: "redis connect timeout".into(), path: redis_url.to_string() })?
            .map_err(|e| Error::Storage { error: e.to_string(), path: redis_url.to_string() })?;
        Ok(Self { conn })
    }

    fn map_err(error: redis::RedisError) -> Error {
        Error::Storage { error: error.to_string(), path: "<redis>".to_string() }
    }
}

#[async_trait::async_trait]
impl VolatileStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET").arg(key).query_async(&mut conn).await.map_err(Self::map_err)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => {
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs())
                    .arg(value)
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(Self::map_err)
            }
            None => redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
                .map_err(Self::map_err),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await.map_err(Self::map_err)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let count: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await.map_err(Self::map_err)?;
        Ok(count > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("EXPIRE")
            .arg(key)
            .arg(ttl.as_secs())
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = redis::cmd("TTL").arg(key).query_async(&mut conn).await.map_err(Self::map_err)?;
        Ok(if ttl < 0 { None } else { Some(ttl) })
    }

    async fn incr(&self, key: &str) -> Result<i64> {
        self.incrby(key, 1).await
    }

    async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("INCRBY").arg(key).arg(delta).query_async(&mut conn).await.map_err(Self::map_err)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("HGET").arg(key).arg(field).query_async(&mut conn).await.map_err(Self::map_err)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        redis::cmd("HGETALL").arg(key).query_async(&mut conn).await.map_err(Self::map_err)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("HDEL").arg(key).arg(field).query_async::<()>(&mut conn).await.map_err(Self::map_err)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SADD").arg(key).arg(member).query_async::<()>(&mut conn).await.map_err(Self::map_err)
    }

    async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let result: i64 = redis::cmd("SISMEMBER")
            .arg(key)
            .arg(member)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)?;
        Ok(result == 1)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("SMEMBERS").arg(key).query_async(&mut conn).await.map_err(Self::map_err)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("ZADD")
            .arg(key)
            .arg(score)
            .arg(member)
            .query_async::<()>(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn zcard(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        redis::cmd("ZCARD").arg(key).query_async(&mut conn).await.map_err(Self::map_err)
    }

    async fn zrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("ZRANGE")
            .arg(key)
            .arg(start)
            .arg(stop)
            .query_async(&mut conn)
            .await
            .map_err(Self::map_err)
    }

    async fn scan_delete(&self, pattern: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0u64;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(Self::map_err)?;

            if !keys.is_empty() {
                let mut del_cmd = redis::cmd("DEL");
                for key in &keys {
                    del_cmd.arg(key);
                }
                del_cmd.query_async::<()>(&mut conn).await.map_err(Self::map_err)?;
                deleted += keys.len() as u64;
            }

            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(deleted)
    }
}
