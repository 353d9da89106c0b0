//! Redis-backed store.
//!
//! Layout:
//! - `{prefix}:steps:{job}`: list of step records as JSON, in append order
//! - `{prefix}:running:{job}`: set of step keys with an open attempt
//! - `{prefix}:step_seq`: record id sequence
//! - `{prefix}:checkpoint:{job}`: checkpoint JSON
//! - `{prefix}:job:{job}`: job JSON

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::debug;

use vnarr_models::{CheckpointPatch, Job, JobCheckpoint, JobId, StepRecord};

use crate::error::{StoreError, StoreResult};
use crate::traits::{JobStateStore, JobStore, StepHistoryStore};

/// Pushes a record and maintains the open-attempt set atomically.
/// Returns 0 when the key already has a running attempt.
const APPEND_SCRIPT: &str = r#"
if ARGV[2] == 'running' then
  if redis.call('SADD', KEYS[2], ARGV[3]) == 0 then
    return 0
  end
else
  redis.call('SREM', KEYS[2], ARGV[3])
end
redis.call('RPUSH', KEYS[1], ARGV[1])
return 1
"#;

/// Redis store configuration.
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Key prefix
    pub prefix: String,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            prefix: "vnarr".to_string(),
        }
    }
}

impl RedisStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or_else(|_| "vnarr".to_string()),
        }
    }
}

/// Durable implementation of every store trait.
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
    append_script: redis::Script,
}

impl RedisStore {
    pub fn new(config: RedisStoreConfig) -> StoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            prefix: config.prefix,
            append_script: redis::Script::new(APPEND_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> StoreResult<Self> {
        Self::new(RedisStoreConfig::from_env())
    }

    fn steps_key(&self, job_id: &JobId) -> String {
        format!("{}:steps:{}", self.prefix, job_id)
    }

    fn running_key(&self, job_id: &JobId) -> String {
        format!("{}:running:{}", self.prefix, job_id)
    }

    fn seq_key(&self) -> String {
        format!("{}:step_seq", self.prefix)
    }

    fn checkpoint_key(&self, job_id: &JobId) -> String {
        format!("{}:checkpoint:{}", self.prefix, job_id)
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}:job:{}", self.prefix, job_id)
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Check connectivity.
    pub async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl StepHistoryStore for RedisStore {
    async fn append(&self, mut record: StepRecord) -> StoreResult<u64> {
        let mut conn = self.connection().await?;

        let id: u64 = conn.incr(self.seq_key(), 1).await?;
        record.id = id;
        let key = record.key().to_string();
        let payload = serde_json::to_string(&record)?;

        let appended: i64 = self
            .append_script
            .key(self.steps_key(&record.job_id))
            .key(self.running_key(&record.job_id))
            .arg(payload)
            .arg(record.status.as_str())
            .arg(&key)
            .invoke_async(&mut conn)
            .await?;

        if appended == 0 {
            return Err(StoreError::AttemptAlreadyRunning {
                key,
                attempt: record.attempt,
            });
        }

        debug!(
            job_id = %record.job_id,
            step = %key,
            status = %record.status,
            "Appended step record {}",
            id
        );
        Ok(id)
    }

    async fn query_by_job(&self, job_id: &JobId) -> StoreResult<Vec<StepRecord>> {
        let mut conn = self.connection().await?;
        let raw: Vec<String> = conn.lrange(self.steps_key(job_id), 0, -1).await?;
        raw.iter()
            .map(|json| serde_json::from_str(json).map_err(StoreError::from))
            .collect()
    }
}

#[async_trait]
impl JobStateStore for RedisStore {
    async fn get(&self, job_id: &JobId) -> StoreResult<Option<JobCheckpoint>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(self.checkpoint_key(job_id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    // Read-modify-write: the executor is the checkpoint's only writer.
    async fn upsert(&self, job_id: &JobId, patch: CheckpointPatch) -> StoreResult<JobCheckpoint> {
        let mut checkpoint = self
            .get(job_id)
            .await?
            .unwrap_or_else(|| JobCheckpoint::new(job_id.clone()));
        checkpoint.apply(patch);

        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(&checkpoint)?;
        conn.set::<_, _, ()>(self.checkpoint_key(job_id), payload)
            .await?;
        Ok(checkpoint)
    }
}

#[async_trait]
impl JobStore for RedisStore {
    async fn get_job(&self, job_id: &JobId) -> StoreResult<Option<Job>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(self.job_key(job_id)).await?;
        raw.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    async fn save_job(&self, job: &Job) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        conn.set::<_, _, ()>(self.job_key(&job.id), payload).await?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &JobId) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(vec![
            self.job_key(job_id),
            self.checkpoint_key(job_id),
            self.steps_key(job_id),
            self.running_key(job_id),
        ])
        .await?;
        Ok(())
    }
}
