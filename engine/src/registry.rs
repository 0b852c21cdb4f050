use common::WorkerDescriptor;
use deadpool_redis::redis::AsyncCommands;
use errors::{QueueError, Result};
use log::debug;

/// Registration TTL: a worker that stops heartbeating disappears from the
/// registry within two minutes.
const REGISTRY_TTL_SECS: u64 = 120;

/// Publishes this process's descriptor into the broker keyspace so the
/// scheduler can see live workers and their load.
pub struct WorkerRegistry {
    pool: deadpool_redis::Pool,
    worker_id: String,
}

impl WorkerRegistry {
    pub fn new(pool: deadpool_redis::Pool, worker_id: impl Into<String>) -> Self {
        Self {
            pool,
            worker_id: worker_id.into(),
        }
    }

    pub async fn register(&self, descriptor: &WorkerDescriptor) -> Result<()> {
        self.put(&format!("worker:{}", self.worker_id), descriptor)
            .await
    }

    pub async fn heartbeat(&self, descriptor: &WorkerDescriptor) -> Result<()> {
        debug!(
            "Heartbeat for {}: {} in flight, {} processed",
            self.worker_id, descriptor.in_flight_count, descriptor.processed_total
        );
        self.put(&format!("worker_status:{}", self.worker_id), descriptor)
            .await
    }

    pub async fn unregister(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;
        let _: () = conn
            .del(&[
                format!("worker:{}", self.worker_id),
                format!("worker_status:{}", self.worker_id),
            ])
            .await
            .map_err(|e| QueueError::PushFailed(e.into()))?;
        Ok(())
    }

    async fn put(&self, key: &str, descriptor: &WorkerDescriptor) -> Result<()> {
        let body = serde_json::to_vec(descriptor)?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;
        let _: () = conn
            .set_ex(key, body, REGISTRY_TTL_SECS)
            .await
            .map_err(|e| QueueError::PushFailed(e.into()))?;
        Ok(())
    }
}
