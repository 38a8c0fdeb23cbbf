use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::Script;
use tracing::{debug, info, warn};
use uuid::Uuid;

use appointment_cell::CheckInTokenStore;

use crate::RuntimeError;

const DEFAULT_PREFIX: &str = "checkin";

// KEYS[1] appointment key, KEYS[2] new token key.
// ARGV[1] token, ARGV[2] ttl seconds, ARGV[3] token key prefix, ARGV[4] appointment id.
const BIND_SCRIPT: &str = r#"
local previous = redis.call('GET', KEYS[1])
if previous and previous ~= ARGV[1] then
    redis.call('DEL', ARGV[3] .. previous)
end
redis.call('SET', KEYS[1], ARGV[1], 'EX', ARGV[2])
redis.call('SET', KEYS[2], ARGV[4], 'EX', ARGV[2])
if previous then
    return 1
end
return 0
"#;

/// Check-in tokens shared between API nodes. Each token key holds the
/// appointment id with a TTL; a second key per appointment points at the
/// current token so re-issuing can delete the superseded one.
pub struct RedisTokenStore {
    pool: Pool,
    prefix: String,
    bind_script: Script,
}

impl RedisTokenStore {
    pub async fn connect(redis_url: &str) -> Result<Self, RuntimeError> {
        Self::connect_with_prefix(redis_url, DEFAULT_PREFIX).await
    }

    /// Same as `connect`, with every key under `prefix`. Lets test runs share a server.
    pub async fn connect_with_prefix(redis_url: &str, prefix: &str) -> Result<Self, RuntimeError> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| RuntimeError::PoolError(format!("Failed to create Redis pool: {}", e)))?;

        let store = Self {
            pool,
            prefix: prefix.to_string(),
            bind_script: Script::new(BIND_SCRIPT),
        };

        let mut conn = store.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Redis check-in token store initialized (prefix {})", store.prefix);

        Ok(store)
    }

    pub fn token_key(&self, token: &str) -> String {
        format!("{}{}", self.token_key_prefix(), token)
    }

    fn token_key_prefix(&self) -> String {
        format!("{}:token:", self.prefix)
    }

    pub fn appointment_key(&self, appointment_id: Uuid) -> String {
        format!("{}:appt:{}", self.prefix, appointment_id)
    }

    async fn get_connection(&self) -> Result<Connection, RuntimeError> {
        self.pool
            .get()
            .await
            .map_err(|e| RuntimeError::PoolError(format!("Failed to get Redis connection: {}", e)))
    }

    /// Point the appointment at `token` and retire its previous token in one
    /// server-side script, so interleaved re-issues leave exactly one live token.
    pub async fn bind(&self, token: &str, appointment_id: Uuid, ttl_seconds: i64) -> Result<(), RuntimeError> {
        let ttl = ttl_seconds.max(1);
        let mut conn = self.get_connection().await?;

        let superseded: i64 = self
            .bind_script
            .key(self.appointment_key(appointment_id))
            .key(self.token_key(token))
            .arg(token)
            .arg(ttl)
            .arg(self.token_key_prefix())
            .arg(appointment_id.to_string())
            .invoke_async(&mut conn)
            .await?;

        debug!(
            "Bound check-in token for appointment {} (ttl {}s, superseded: {})",
            appointment_id,
            ttl,
            superseded == 1
        );
        Ok(())
    }

    /// GETDEL makes resolve-and-consume a single server-side step.
    pub async fn consume(&self, token: &str) -> Result<Option<Uuid>, RuntimeError> {
        let mut conn = self.get_connection().await?;
        let stored: Option<String> = redis::cmd("GETDEL")
            .arg(self.token_key(token))
            .query_async(&mut conn)
            .await?;

        let Some(raw) = stored else {
            return Ok(None);
        };
        match Uuid::parse_str(&raw) {
            Ok(appointment_id) => Ok(Some(appointment_id)),
            Err(_) => {
                warn!("Discarding malformed check-in token value {:?}", raw);
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl CheckInTokenStore for RedisTokenStore {
    async fn put(&self, token: &str, appointment_id: Uuid, ttl_seconds: i64) -> anyhow::Result<()> {
        Ok(self.bind(token, appointment_id, ttl_seconds).await?)
    }

    async fn take(&self, token: &str) -> anyhow::Result<Option<Uuid>> {
        Ok(self.consume(token).await?)
    }
}
