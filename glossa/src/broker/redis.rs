use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};

use super::Broker;

/// Redis-backed broker client.
///
/// Holds a [`ConnectionManager`], which multiplexes and reconnects
/// transparently; cloning the broker is cheap.
#[derive(Clone)]
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect to the broker at `url` (e.g. `redis://localhost:6379/0`).
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn set_members(&self, key: &str) -> anyhow::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.srem(key, member).await?;
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> anyhow::Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        Ok(conn.hgetall(key).await?)
    }

    async fn sorted_set_range(&self, key: &str) -> anyhow::Result<Vec<(String, f64)>> {
        let mut conn = self.conn.clone();
        Ok(conn.zrange_withscores(key, 0, -1).await?)
    }

    async fn sorted_set_remove(&self, key: &str, member: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zrem(key, member).await?;
        Ok(())
    }

    async fn list_push_head(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.lpush(key, value).await?;
        Ok(())
    }

    async fn list_pop_tail(&self, key: &str) -> anyhow::Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.rpop(key, None).await?)
    }

    async fn list_len(&self, key: &str) -> anyhow::Result<u64> {
        let mut conn = self.conn.clone();
        let len: i64 = conn.llen(key).await?;
        Ok(len.max(0) as u64)
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.del(key).await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> anyhow::Result<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }
}
