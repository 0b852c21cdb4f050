use common::TaskResult;
use deadpool_redis::redis::AsyncCommands;
use errors::{QueueError, Result};
use log::debug;
use metrics::counter;

pub const RESULT_STREAM: &str = "crawler_results";

/// Writes task outcomes to the results stream for downstream consumers.
/// Delivery beyond that point is the broker's responsibility.
pub struct ResultPublisher {
    pool: deadpool_redis::Pool,
    stream: String,
}

impl ResultPublisher {
    pub fn new(pool: deadpool_redis::Pool) -> Self {
        Self {
            pool,
            stream: RESULT_STREAM.to_string(),
        }
    }

    pub async fn publish(&self, result: &TaskResult) -> Result<()> {
        let body = serde_json::to_vec(result)?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        let _: String = conn
            .xadd(
                &self.stream,
                "*",
                &[
                    ("task_id", result.task_id.as_bytes()),
                    ("body", body.as_slice()),
                ],
            )
            .await
            .map_err(|e| QueueError::PushFailed(e.into()))?;

        debug!("Published result for task {}", result.task_id);
        counter!(
            "queue_result_publish_total",
            "success" => if result.success { "true" } else { "false" }
        )
        .increment(1);
        Ok(())
    }
}
