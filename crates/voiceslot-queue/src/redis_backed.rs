//! Redis-backed `SlotQueuePort` / `LockPort` implementation for
//! multi-worker deployments. The queue is a sorted set scored by
//! eligibility timestamp, keyed by `voice_id`; popping ready entries runs
//! as a single Lua script so no two workers can win the same entry.

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use voiceslot_core::domain::{QueueEntry, ScoredQueueEntry};
use voiceslot_core::errors::{QueueError, QueueResult};
use voiceslot_core::ports::{LockPort, SlotQueuePort};

const POP_READY_SCRIPT: &str = r"
local ready = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, tonumber(ARGV[2]))
local out = {}
for _, member in ipairs(ready) do
    redis.call('ZREM', KEYS[1], member)
    local payload_key = KEYS[2] .. member
    local payload = redis.call('GET', payload_key)
    if payload then
        redis.call('DEL', payload_key)
        table.insert(out, payload)
    end
end
return out
";

fn store_err(err: redis::RedisError) -> QueueError {
    QueueError::StoreUnavailable {
        message: err.to_string(),
    }
}

fn corrupt_err(voice_id: i64, err: serde_json::Error) -> QueueError {
    QueueError::CorruptPayload {
        key: voice_id.to_string(),
        message: err.to_string(),
    }
}

pub struct RedisSlotQueue {
    conn: ConnectionManager,
    zset_key: String,
    payload_prefix: String,
}

impl RedisSlotQueue {
    /// `namespace` lets multiple environments share one Redis instance
    /// without key collisions.
    pub async fn connect(redis_url: &str, namespace: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            zset_key: format!("{namespace}:slot_queue:zset"),
            payload_prefix: format!("{namespace}:slot_queue:payload:"),
        })
    }

    fn payload_key(&self, voice_id: i64) -> String {
        format!("{}{}", self.payload_prefix, voice_id)
    }
}

#[async_trait]
impl SlotQueuePort for RedisSlotQueue {
    async fn enqueue(&self, entry: QueueEntry, delay_seconds: i64) -> QueueResult<()> {
        let score = Utc::now().timestamp() as f64 + delay_seconds as f64;
        let payload = serde_json::to_string(&entry).map_err(|e| corrupt_err(entry.voice_id, e))?;
        let mut conn = self.conn.clone();
        conn.zadd::<_, _, _, ()>(&self.zset_key, entry.voice_id.to_string(), score)
            .await
            .map_err(store_err)?;
        conn.set::<_, _, ()>(self.payload_key(entry.voice_id), payload)
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<QueueEntry>> {
        Ok(self.dequeue_ready_batch(1).await?.into_iter().next())
    }

    async fn dequeue_ready_batch(&self, limit: u32) -> QueueResult<Vec<QueueEntry>> {
        let now = Utc::now().timestamp();
        let mut conn = self.conn.clone();
        let payloads: Vec<String> = redis::Script::new(POP_READY_SCRIPT)
            .key(&self.zset_key)
            .key(&self.payload_prefix)
            .arg(now)
            .arg(limit)
            .invoke_async(&mut conn)
            .await
            .map_err(store_err)?;

        payloads
            .into_iter()
            .map(|payload| {
                serde_json::from_str::<QueueEntry>(&payload)
                    .map_err(|e| QueueError::CorruptPayload {
                        key: "unknown".into(),
                        message: e.to_string(),
                    })
            })
            .collect()
    }

    async fn remove(&self, voice_id: i64) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.zrem::<_, _, ()>(&self.zset_key, voice_id.to_string())
            .await
            .map_err(store_err)?;
        conn.del::<_, ()>(self.payload_key(voice_id)).await.map_err(store_err)?;
        Ok(())
    }

    async fn length(&self) -> QueueResult<u64> {
        let mut conn = self.conn.clone();
        conn.zcard(&self.zset_key).await.map_err(store_err)
    }

    async fn is_enqueued(&self, voice_id: i64) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let score: Option<f64> = conn
            .zscore(&self.zset_key, voice_id.to_string())
            .await
            .map_err(store_err)?;
        Ok(score.is_some())
    }

    async fn position(&self, voice_id: i64) -> QueueResult<Option<u64>> {
        let mut conn = self.conn.clone();
        let rank: Option<u64> = conn
            .zrank(&self.zset_key, voice_id.to_string())
            .await
            .map_err(store_err)?;
        Ok(rank)
    }

    async fn snapshot(&self, limit: u32) -> QueueResult<Vec<ScoredQueueEntry>> {
        let mut conn = self.conn.clone();
        let members: Vec<(String, f64)> = conn
            .zrange_withscores(&self.zset_key, 0, i64::from(limit.saturating_sub(1)).max(0))
            .await
            .map_err(store_err)?;

        let mut out = Vec::with_capacity(members.len());
        for (member, score) in members {
            let voice_id: i64 = member
                .parse()
                .map_err(|_| QueueError::CorruptPayload {
                    key: member.clone(),
                    message: "non-numeric queue member".into(),
                })?;
            let payload: Option<String> = conn.get(self.payload_key(voice_id)).await.map_err(store_err)?;
            let Some(payload) = payload else { continue };
            let entry: QueueEntry = serde_json::from_str(&payload).map_err(|e| corrupt_err(voice_id, e))?;
            out.push(ScoredQueueEntry { entry, score });
        }
        Ok(out)
    }
}

pub struct RedisLock {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisLock {
    pub async fn connect(redis_url: &str, namespace: &str) -> anyhow::Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }

    fn key(&self, name: &str) -> String {
        format!("{}:lock:{name}", self.namespace)
    }
}

#[async_trait]
impl LockPort for RedisLock {
    async fn try_acquire(&self, name: &str, ttl_seconds: u64) -> QueueResult<bool> {
        let mut conn = self.conn.clone();
        let result: Option<String> = redis::cmd("SET")
            .arg(self.key(name))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(result.is_some())
    }

    async fn release(&self, name: &str) -> QueueResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(name)).await.map_err(store_err)?;
        Ok(())
    }
}
