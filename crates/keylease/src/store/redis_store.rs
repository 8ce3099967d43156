// Redis lock store
// SET NX PX for acquisition, Lua scripts for every compare-then-act primitive

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Script, Value};
use tracing::debug;

use super::{Acquisition, LockStore};
use crate::error::StoreError;

/// Returns `{1, value}` when the key was set, `{0, current}` otherwise
const SET_NX_WITH_GET_SCRIPT: &str = r#"
if redis.call("SET", KEYS[1], ARGV[1], "NX", "PX", ARGV[2]) then
    return {1, ARGV[1]}
end
return {0, redis.call("GET", KEYS[1])}
"#;

const DELETE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

const EXPIRE_IF_EQUALS_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

/// [`LockStore`] backed by Redis.
///
/// Scripts run through EVALSHA with a transparent EVAL fallback, so they are
/// loaded on first use and after a server restart.
#[derive(Clone)]
pub struct RedisLockStore {
    conn: ConnectionManager,
    set_nx_with_get: Script,
    delete_if_equals: Script,
    expire_if_equals: Script,
}

impl RedisLockStore {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url = %url, "Connected to redis lock store");
        Ok(Self::from_manager(conn))
    }

    /// Wrap an existing connection manager
    pub fn from_manager(conn: ConnectionManager) -> Self {
        Self {
            conn,
            set_nx_with_get: Script::new(SET_NX_WITH_GET_SCRIPT),
            delete_if_equals: Script::new(DELETE_IF_EQUALS_SCRIPT),
            expire_if_equals: Script::new(EXPIRE_IF_EQUALS_SCRIPT),
        }
    }
}

/// TTL in whole milliseconds; never zero, since `PX 0` is rejected and
/// `PEXPIRE 0` deletes the key
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn parse_acquire_reply(reply: Value) -> Result<Acquisition, StoreError> {
    let items = match reply {
        Value::Array(items) => items,
        other => {
            return Err(StoreError::UnexpectedReply(format!(
                "expected a two-element array, got {other:?}"
            )));
        }
    };

    let [flag, holder]: [Value; 2] = items.try_into().map_err(|items: Vec<Value>| {
        StoreError::UnexpectedReply(format!(
            "expected a two-element array, got {} elements",
            items.len()
        ))
    })?;

    let acquired = match flag {
        Value::Int(1) => true,
        Value::Int(0) => false,
        other => {
            return Err(StoreError::UnexpectedReply(format!(
                "expected 0 or 1 as acquire flag, got {other:?}"
            )));
        }
    };

    let holder = match holder {
        Value::Nil => None,
        Value::BulkString(bytes) => Some(String::from_utf8(bytes).map_err(|e| {
            StoreError::UnexpectedReply(format!("holder is not valid UTF-8: {e}"))
        })?),
        Value::SimpleString(s) => Some(s),
        other => {
            return Err(StoreError::UnexpectedReply(format!(
                "expected a string holder, got {other:?}"
            )));
        }
    };

    Ok(Acquisition { acquired, holder })
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(!matches!(reply, Value::Nil))
    }

    async fn set_if_absent_or_get(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<Acquisition, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Value = self
            .set_nx_with_get
            .key(key)
            .arg(value)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        parse_acquire_reply(reply)
    }

    async fn delete_if_equals(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .delete_if_equals
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn expire_if_equals(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .expire_if_equals
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }
}
