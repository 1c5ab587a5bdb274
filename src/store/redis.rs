// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis implementation of [`SharedStore`].
//!
//! Compare-and-act sequences run as Lua scripts so that "read, decide,
//! write" is indivisible from every other client's point of view:
//!
//! ```text
//! token bucket   HMGET tokens,last_refill → refill → HSET + EXPIRE
//! lock release   GET == token → DEL
//! lock renew     GET == token → EXPIRE
//! ```
//!
//! `redis::Script` loads each script once and then calls it by SHA
//! (`EVALSHA`, falling back to `EVAL` after a server restart).

use super::traits::{bucket_expiry, BucketOutcome, BucketRequest, SharedStore, StoreError};
use crate::resilience::retry::RetryManager;
use crate::resilience::RetryPolicy;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, ErrorKind as RedisErrorKind, RedisError, Script};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

// Mirrors BucketState::take.
const TOKEN_BUCKET_LUA: &str = r"
local key = KEYS[1]
local rate = tonumber(ARGV[1])
local burst = tonumber(ARGV[2])
local wanted = tonumber(ARGV[3])
local now = tonumber(ARGV[4])
local expiry = tonumber(ARGV[5])

local bucket = redis.call('HMGET', key, 'tokens', 'last_refill')
local tokens = tonumber(bucket[1]) or burst
local last_refill = tonumber(bucket[2]) or now

local elapsed = math.max(0, now - last_refill)
local refill = math.floor(elapsed * rate)
local current = math.max(0, math.min(burst, tokens + refill))

if current >= wanted then
    local remaining = current - wanted
    if tokens + refill >= burst then
        last_refill = now
    else
        last_refill = last_refill + refill / rate
    end
    redis.call('HSET', key, 'tokens', tostring(remaining), 'last_refill', tostring(last_refill))
    redis.call('EXPIRE', key, expiry)
    return {1, tostring(remaining), '0'}
end

return {0, tostring(current), tostring((wanted - current) / rate)}
";

const COMPARE_AND_DELETE_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
";

const COMPARE_AND_EXPIRE_LUA: &str = r"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return 0
";

fn script(cell: &'static OnceLock<Script>, source: &str) -> &'static Script {
    cell.get_or_init(|| Script::new(source))
}

static TOKEN_BUCKET: OnceLock<Script> = OnceLock::new();
static COMPARE_AND_DELETE: OnceLock<Script> = OnceLock::new();
static COMPARE_AND_EXPIRE: OnceLock<Script> = OnceLock::new();

fn map_err(err: RedisError) -> StoreError {
    let unreachable = err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout()
        || err.kind() == RedisErrorKind::IoError;
    if unreachable {
        StoreError::Unavailable(err.to_string())
    } else {
        StoreError::Backend(err.to_string())
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    // Redis rejects a zero expiry
    (ttl.as_millis() as u64).max(1)
}

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "shop1:" → "shop1:product:42")
    prefix: String,
}

impl RedisStore {
    pub async fn new(connection_string: &str) -> Result<Self, StoreError> {
        Self::with_prefix(connection_string, None).await
    }

    /// Connect, retrying with the startup policy so a wrong URL fails in
    /// seconds rather than hanging.
    ///
    /// ```rust,no_run
    /// # use marketplace_sync::store::RedisStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = RedisStore::with_prefix("redis://localhost", Some("shop1:")).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(connection_string: &str, prefix: Option<&str>) -> Result<Self, StoreError> {
        let client = Client::open(connection_string).map_err(map_err)?;

        let connection = RetryManager::new(RetryPolicy::startup())
            .execute_with_retry("redis_connect", || async {
                ConnectionManager::new(client.clone()).await.map_err(map_err)
            })
            .await
            .map_err(|e| e.into_inner())?;

        info!(prefix = prefix.unwrap_or(""), "Connected to Redis shared store");

        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
        })
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn conn(&self) -> ConnectionManager {
        self.connection.clone()
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(self.prefixed_key(key))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(value)
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let _: () = redis::cmd("SET")
            .arg(self.prefixed_key(key))
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn set_nx_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.prefixed_key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let removed: u64 = redis::cmd("DEL")
            .arg(self.prefixed_key(key))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(removed > 0)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, StoreError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let prefixed: Vec<String> = keys.iter().map(|k| self.prefixed_key(k)).collect();
        let removed: u64 = redis::cmd("DEL")
            .arg(prefixed)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(removed)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let set: u64 = redis::cmd("PEXPIRE")
            .arg(self.prefixed_key(key))
            .arg(ttl_millis(ttl))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(set == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        // -2 = missing, -1 = no expiry
        let millis: i64 = redis::cmd("PTTL")
            .arg(self.prefixed_key(key))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok((millis >= 0).then(|| Duration::from_millis(millis as u64)))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let keys: Vec<String> = redis::cmd("KEYS")
            .arg(self.prefixed_key(pattern))
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(keys.iter().map(|k| self.strip_prefix(k).to_string()).collect())
    }

    async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64, StoreError> {
        let value: i64 = redis::cmd("HINCRBY")
            .arg(self.prefixed_key(key))
            .arg(field)
            .arg(delta)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(value)
    }

    async fn hmget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let values: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.prefixed_key(key))
            .arg(fields)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(values)
    }

    async fn lpush_trim(&self, key: &str, value: &[u8], max_len: usize) -> Result<(), StoreError> {
        let key = self.prefixed_key(key);
        let _: () = redis::pipe()
            .atomic()
            .cmd("LPUSH")
            .arg(&key)
            .arg(value)
            .ignore()
            .cmd("LTRIM")
            .arg(&key)
            .arg(0)
            .arg(max_len.saturating_sub(1) as i64)
            .ignore()
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<Vec<u8>>, StoreError> {
        let values: Vec<Vec<u8>> = redis::cmd("LRANGE")
            .arg(self.prefixed_key(key))
            .arg(start as i64)
            .arg(stop as i64)
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(values)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = redis::cmd("PING")
            .query_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(())
    }

    async fn token_bucket_take(
        &self,
        key: &str,
        req: BucketRequest,
        now: f64,
    ) -> Result<BucketOutcome, StoreError> {
        let full_key = self.prefixed_key(key);
        let (granted, remaining, wait): (i64, String, String) =
            script(&TOKEN_BUCKET, TOKEN_BUCKET_LUA)
                .key(&full_key)
                .arg(req.rate)
                .arg(req.burst)
                .arg(req.tokens)
                .arg(now)
                .arg(bucket_expiry(&req).as_secs())
                .invoke_async(&mut self.conn())
                .await
                .map_err(map_err)?;

        let parse = |raw: &str| {
            raw.parse::<f64>().map_err(|_| StoreError::Malformed {
                key: key.to_string(),
                reason: format!("token bucket script returned '{raw}'"),
            })
        };

        Ok(BucketOutcome {
            granted: granted == 1,
            remaining: parse(&remaining)?,
            wait: Duration::from_secs_f64(parse(&wait)?.max(0.0)),
        })
    }

    async fn compare_and_delete(&self, key: &str, expected: &[u8]) -> Result<bool, StoreError> {
        let removed: i64 = script(&COMPARE_AND_DELETE, COMPARE_AND_DELETE_LUA)
            .key(self.prefixed_key(key))
            .arg(expected)
            .invoke_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(removed == 1)
    }

    async fn compare_and_expire(&self, key: &str, expected: &[u8], ttl: Duration) -> Result<bool, StoreError> {
        let extended: i64 = script(&COMPARE_AND_EXPIRE, COMPARE_AND_EXPIRE_LUA)
            .key(self.prefixed_key(key))
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut self.conn())
            .await
            .map_err(map_err)?;
        Ok(extended == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_millis_never_zero() {
        assert_eq!(ttl_millis(Duration::ZERO), 1);
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_io_errors_map_to_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = map_err(RedisError::from(io));
        assert!(matches!(err, StoreError::Unavailable(_)));

        let err = map_err(RedisError::from((RedisErrorKind::TypeError, "bad type")));
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
