use crate::Message;
use common::Tier;
use deadpool_redis::redis;
use deadpool_redis::redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply,
};
use deadpool_redis::redis::{AsyncCommands, FromRedisValue};
use errors::{QueueError, Result};
use log::{debug, error, info, warn};
use metrics::counter;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

const ACK_FLUSH_THRESHOLD: usize = 50;
const ACK_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Per-tier stream consumer. Reads the tier's queues in priority order over
/// one consumer group and feeds messages to the supervisor through a bounded
/// channel; acknowledgements flow back over a batched ack channel.
pub struct StreamConsumer {
    pool: deadpool_redis::Pool,
    group: String,
    consumer: String,
    queues: Vec<String>,
    batch_size: usize,
    block_ms: usize,
    ack_tx: mpsc::Sender<(String, String)>,
}

impl StreamConsumer {
    pub async fn new(
        pool: deadpool_redis::Pool,
        tier: Tier,
        worker_id: &str,
        batch_size: usize,
    ) -> Result<Self> {
        let (ack_tx, ack_rx) = mpsc::channel::<(String, String)>(10_000);
        let group = tier.consumer_group();

        let consumer = Self {
            pool: pool.clone(),
            group: group.clone(),
            consumer: worker_id.to_string(),
            queues: tier.queues().iter().map(|q| q.to_string()).collect(),
            batch_size,
            block_ms: 2000,
            ack_tx,
        };

        consumer.ensure_groups().await?;
        Self::spawn_ack_processor(pool, group, ack_rx);
        Ok(consumer)
    }

    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    async fn ensure_groups(&self) -> Result<()> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        for queue in &self.queues {
            match conn
                .xgroup_create_mkstream::<&str, &str, &str, ()>(queue, &self.group, "$")
                .await
            {
                Ok(_) => info!("Created consumer group {} on {}", self.group, queue),
                Err(e) => {
                    if e.code() == Some("BUSYGROUP") {
                        // Group already exists, which is fine.
                    } else {
                        return Err(QueueError::GroupCreateFailed(e.into()).into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Crash recovery: re-deliver every entry this consumer was handed before
    /// a previous crash and never acknowledged. Must run before the normal
    /// read loop so old work keeps its priority position.
    pub async fn replay_own_pending(&self, sender: &mpsc::Sender<Message>) -> Result<usize> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|_| QueueError::ConnectionFailed)?;

        let mut replayed = 0usize;
        for queue in &self.queues {
            let mut cursor = "0".to_string();
            loop {
                let opts = StreamReadOptions::default()
                    .group(&self.group, &self.consumer)
                    .count(self.batch_size);
                let reply: StreamReadReply = conn
                    .xread_options(&[queue.as_str()], &[cursor.as_str()], &opts)
                    .await
                    .map_err(|e| QueueError::ReadFailed(e.into()))?;

                let Some(key) = reply.keys.into_iter().find(|k| &k.key == queue) else {
                    break;
                };
                if key.ids.is_empty() {
                    break;
                }
                let got = key.ids.len();
                for entry in key.ids {
                    cursor = entry.id.clone();
                    if let Some(msg) = self.message_from_entry(queue, entry) {
                        replayed += 1;
                        counter!("queue_replay_total", "stream" => queue.clone()).increment(1);
                        if sender.send(msg).await.is_err() {
                            warn!("Subscriber dropped during pending replay");
                            return Ok(replayed);
                        }
                    }
                }
                if got < self.batch_size {
                    break;
                }
            }
        }

        if replayed > 0 {
            info!(
                "Replayed {} pending entries for consumer {}",
                replayed, self.consumer
            );
        }
        Ok(replayed)
    }

    /// Main read loop. A single blocking read covers all subscribed streams;
    /// delivery to the channel walks the reply in subscription order so a
    /// higher-priority stream's entries are always dispatched first.
    pub async fn run(&self, sender: mpsc::Sender<Message>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Consumer {} reading {:?} as group {}",
            self.consumer, self.queues, self.group
        );
        let keys: Vec<&str> = self.queues.iter().map(String::as_str).collect();
        let ids: Vec<&str> = vec![">"; keys.len()];
        let mut conn: Option<deadpool_redis::Connection> = None;

        loop {
            match shutdown.try_recv() {
                Err(broadcast::error::TryRecvError::Empty) => {}
                _ => {
                    info!("Consumer {} stopping reads", self.consumer);
                    break;
                }
            }

            if conn.is_none() {
                match self.pool.get().await {
                    Ok(c) => conn = Some(c),
                    Err(e) => {
                        error!("Consumer failed to get connection: {e}. Retrying...");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                }
            }
            let active_conn = match conn.as_mut() {
                Some(c) => c,
                None => continue,
            };

            let opts = StreamReadOptions::default()
                .group(&self.group, &self.consumer)
                .block(self.block_ms)
                .count(self.batch_size);
            let result: redis::RedisResult<StreamReadReply> =
                active_conn.xread_options(&keys, &ids, &opts).await;

            match result {
                Ok(reply) => {
                    let mut by_stream: HashMap<String, Vec<StreamId>> = reply
                        .keys
                        .into_iter()
                        .map(|k| (k.key, k.ids))
                        .collect();

                    for queue in &self.queues {
                        let Some(entries) = by_stream.remove(queue) else {
                            continue;
                        };
                        for entry in entries {
                            let Some(msg) = self.message_from_entry(queue, entry) else {
                                continue;
                            };
                            counter!("queue_consume_total", "stream" => queue.clone())
                                .increment(1);
                            if sender.send(msg).await.is_err() {
                                warn!("Subscriber dropped, consumer exiting");
                                return;
                            }
                        }
                    }
                }
                Err(e) => {
                    error!("Consumer read error: {e}. Reconnecting...");
                    conn = None;
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Adopts entries stuck with consumers that died without acking, so a
    /// crashed peer's work is redelivered here after `min_idle`.
    pub fn spawn_claimer(
        &self,
        sender: mpsc::Sender<Message>,
        min_idle: Duration,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let pool = self.pool.clone();
        let group = self.group.clone();
        let consumer = self.consumer.clone();
        let queues = self.queues.clone();
        let ack_tx = self.ack_tx.clone();
        let claim_count = self.batch_size;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {}
                }

                let mut conn = match pool.get().await {
                    Ok(c) => c,
                    Err(e) => {
                        error!("Claimer connection failed: {e}");
                        continue;
                    }
                };

                for queue in &queues {
                    let mut cursor = "0-0".to_string();
                    loop {
                        let opts = StreamAutoClaimOptions::default().count(claim_count);
                        let result: redis::RedisResult<StreamAutoClaimReply> = conn
                            .xautoclaim_options(
                                queue,
                                &group,
                                &consumer,
                                min_idle.as_millis() as u64,
                                &cursor,
                                opts,
                            )
                            .await;

                        match result {
                            Ok(reply) => {
                                let claimed = reply.claimed;
                                let is_empty = claimed.is_empty();
                                if !is_empty {
                                    info!(
                                        "Claimed {} stuck entries from {}",
                                        claimed.len(),
                                        queue
                                    );
                                    counter!("queue_claim_total", "stream" => queue.clone())
                                        .increment(claimed.len() as u64);
                                    for entry in claimed {
                                        if let Some(msg) = entry_to_message(
                                            queue,
                                            entry,
                                            ack_tx.clone(),
                                        ) {
                                            if sender.send(msg).await.is_err() {
                                                warn!("Subscriber dropped, claimer exiting");
                                                return;
                                            }
                                        }
                                    }
                                }

                                cursor = reply.next_stream_id;
                                if cursor == "0-0" || is_empty {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("XAUTOCLAIM failed for {queue}: {e}");
                                break;
                            }
                        }
                    }
                }
            }
        })
    }

    fn message_from_entry(&self, stream: &str, entry: StreamId) -> Option<Message> {
        entry_to_message(stream, entry, self.ack_tx.clone())
    }

    fn spawn_ack_processor(
        pool: deadpool_redis::Pool,
        group: String,
        mut ack_rx: mpsc::Receiver<(String, String)>,
    ) {
        tokio::spawn(async move {
            let mut batches: HashMap<String, Vec<String>> = HashMap::new();
            let mut pending: usize = 0;
            let mut ticker = tokio::time::interval(ACK_FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    received = ack_rx.recv() => {
                        let Some((stream, id)) = received else {
                            // Channel closed: flush whatever is left and stop.
                            let _ = flush_acks(&pool, &group, &mut batches).await;
                            break;
                        };
                        batches.entry(stream).or_default().push(id);
                        pending += 1;
                        if pending >= ACK_FLUSH_THRESHOLD
                            && flush_acks(&pool, &group, &mut batches).await {
                                pending = 0;
                            }
                    }
                    _ = ticker.tick() => {
                        if !batches.is_empty()
                            && flush_acks(&pool, &group, &mut batches).await {
                                pending = 0;
                            }
                    }
                }
            }
        });
    }
}

fn entry_to_message(
    stream: &str,
    entry: StreamId,
    ack_tx: mpsc::Sender<(String, String)>,
) -> Option<Message> {
    let payload = match entry.map.get("body") {
        Some(val) => match Vec::<u8>::from_redis_value(val) {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!("Entry {} on {} has a non-bytes body, skipping", entry.id, stream);
                return None;
            }
        },
        None => {
            warn!("Entry {} on {} has no body field, skipping", entry.id, stream);
            return None;
        }
    };
    let task_id = entry
        .map
        .get("task_id")
        .and_then(|v| String::from_redis_value(v).ok());

    Some(Message::new(
        stream.to_string(),
        entry.id,
        task_id,
        payload,
        ack_tx,
    ))
}

async fn flush_acks(
    pool: &deadpool_redis::Pool,
    group: &str,
    batches: &mut HashMap<String, Vec<String>>,
) -> bool {
    if batches.is_empty() {
        return true;
    }

    match pool.get().await {
        Ok(mut conn) => {
            let mut pipeline = redis::pipe();
            let mut counts = HashMap::new();
            for (stream, ids) in batches.iter() {
                if ids.is_empty() {
                    continue;
                }
                pipeline.xack(stream, group, ids).ignore();
                counts.insert(stream.clone(), ids.len());
            }

            let result: redis::RedisResult<()> = pipeline.query_async(&mut conn).await;
            match result {
                Ok(_) => {
                    for (stream, count) in counts {
                        debug!("Acked {count} entries on {stream}");
                        counter!("queue_ack_total", "stream" => stream).increment(count as u64);
                    }
                    batches.clear();
                    true
                }
                Err(e) => {
                    // Keep the batch, retry on the next tick.
                    error!("Failed to flush acks: {e}");
                    false
                }
            }
        }
        Err(e) => {
            error!("Failed to get connection for ack flush: {e}. Retrying next tick.");
            false
        }
    }
}
