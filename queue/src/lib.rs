pub mod consumer;
pub mod publisher;

pub use consumer::StreamConsumer;
pub use publisher::ResultPublisher;

use log::error;
use metrics::counter;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A message delivered from a broker stream. Terminal outcomes MUST `ack()`;
/// transient outcomes call `release()`, which leaves the entry pending so the
/// broker redelivers it to another consumer.
#[derive(Clone)]
pub struct Message {
    pub stream: String,
    pub id: String,
    pub task_id: Option<String>,
    pub payload: Arc<Vec<u8>>,
    ack_tx: mpsc::Sender<(String, String)>,
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Message")
            .field("stream", &self.stream)
            .field("id", &self.id)
            .field("task_id", &self.task_id)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl Message {
    pub(crate) fn new(
        stream: String,
        id: String,
        task_id: Option<String>,
        payload: Vec<u8>,
        ack_tx: mpsc::Sender<(String, String)>,
    ) -> Self {
        Self {
            stream,
            id,
            task_id,
            payload: Arc::new(payload),
            ack_tx,
        }
    }

    pub async fn ack(&self) {
        if self
            .ack_tx
            .send((self.stream.clone(), self.id.clone()))
            .await
            .is_err()
        {
            error!("Ack channel closed, message {} stays pending", self.id);
        }
    }

    /// No broker operation: the entry stays in the pending list until the
    /// broker's visibility timeout hands it to another consumer.
    pub fn release(&self) {
        counter!("queue_release_total", "stream" => self.stream.clone()).increment(1);
    }
}
