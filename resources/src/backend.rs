use deadpool_redis::redis::AsyncCommands;
use deadpool_redis::Pool;
use errors::CacheError;

/// Minimal key-value surface the resource cache needs. The worker only ever
/// reads this keyspace; writes belong to the cookie and proxy services.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    async fn ping(&self) -> Result<(), CacheError>;
}

pub struct RedisBackend {
    pool: Pool,
}

impl RedisBackend {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;
        let result: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| CacheError::Redis(e.into()))?;
        Ok(result)
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| CacheError::Pool(e.to_string()))?;
        let _: String = deadpool_redis::redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::Redis(e.into()))?;
        Ok(())
    }
}
