use crate::executor::TaskExecutor;
use crate::registry::WorkerRegistry;
use chrono::Utc;
use common::{Disposition, FailureKind, Settings, Task, TaskResult, WorkerDescriptor, WorkerStatus};
use errors::{Result, ServiceError};
use log::{error, info, warn};
use metrics::gauge;
use queue::{Message, ResultPublisher, StreamConsumer};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLAIM_MIN_IDLE: Duration = Duration::from_secs(60);
const CLAIM_INTERVAL: Duration = Duration::from_secs(60);
const BACKGROUND_STOP_GRACE: Duration = Duration::from_secs(5);

/// Process-level lifecycle owner: feeds dequeued messages into bounded task
/// units, and on SIGINT/SIGTERM stops consuming, drains in-flight work up to
/// the configured deadline, then cancels whatever is left.
pub struct WorkerSupervisor {
    settings: Arc<Settings>,
    executor: Arc<TaskExecutor>,
    consumer: Arc<StreamConsumer>,
    publisher: Arc<ResultPublisher>,
    registry: Arc<WorkerRegistry>,
    state: Arc<WorkerState>,
}

struct WorkerState {
    status: Mutex<WorkerStatus>,
    in_flight: AtomicUsize,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl WorkerState {
    fn new() -> Self {
        Self {
            status: Mutex::new(WorkerStatus::Starting),
            in_flight: AtomicUsize::new(0),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    fn set_status(&self, status: WorkerStatus) {
        if let Ok(mut guard) = self.status.lock() {
            *guard = status;
        }
    }

    fn status(&self) -> WorkerStatus {
        self.status
            .lock()
            .map(|guard| *guard)
            .unwrap_or(WorkerStatus::Stopped)
    }

    fn descriptor(&self, settings: &Settings) -> WorkerDescriptor {
        let mut descriptor = WorkerDescriptor::new(
            settings.worker_id.clone(),
            settings.tier,
            settings.max_concurrent_tasks,
        );
        descriptor.status = self.status();
        descriptor.in_flight_count = self.in_flight.load(Ordering::SeqCst);
        descriptor.processed_total = self.processed.load(Ordering::SeqCst);
        descriptor.failed_total = self.failed.load(Ordering::SeqCst);
        descriptor
    }
}

impl WorkerSupervisor {
    pub fn new(
        settings: Arc<Settings>,
        executor: Arc<TaskExecutor>,
        consumer: Arc<StreamConsumer>,
        publisher: Arc<ResultPublisher>,
        registry: Arc<WorkerRegistry>,
    ) -> Self {
        Self {
            settings,
            executor,
            consumer,
            publisher,
            registry,
            state: Arc::new(WorkerState::new()),
        }
    }

    pub fn descriptor(&self) -> WorkerDescriptor {
        self.state.descriptor(&self.settings)
    }

    /// Runs until a shutdown signal, then drains. Returns the process exit
    /// code: 0 for a clean drain, 1 when the deadline expired and in-flight
    /// tasks were cancelled.
    pub async fn run(&self) -> Result<i32> {
        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| ServiceError::Internal(e.into()))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| ServiceError::Internal(e.into()))?;

        let (shutdown_tx, _) = broadcast::channel::<()>(8);
        let (msg_tx, mut msg_rx) =
            mpsc::channel::<Message>(self.settings.max_concurrent_tasks.max(1));

        self.state.set_status(WorkerStatus::Running);
        if let Err(e) = self.registry.register(&self.descriptor()).await {
            warn!("Worker registration failed: {e}");
        }
        info!(
            "Worker {} running: tier {}, {} slots, queues {:?}",
            self.settings.worker_id,
            self.settings.tier,
            self.settings.max_concurrent_tasks,
            self.consumer.queues()
        );

        // Crash recovery before the normal loop: everything this consumer
        // left pending gets processed first.
        match self.consumer.replay_own_pending(&msg_tx).await {
            Ok(0) => {}
            Ok(n) => info!("Recovered {n} pending entries from a previous run"),
            Err(e) => warn!("Pending replay failed: {e}"),
        }

        let consumer_handle = {
            let consumer = self.consumer.clone();
            let sender = msg_tx.clone();
            let shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move { consumer.run(sender, shutdown).await })
        };
        let claimer_handle = self.consumer.spawn_claimer(
            msg_tx.clone(),
            CLAIM_MIN_IDLE,
            CLAIM_INTERVAL,
            shutdown_tx.subscribe(),
        );
        let heartbeat_handle = self.spawn_heartbeat(shutdown_tx.subscribe());
        drop(msg_tx);

        let slots = Arc::new(Semaphore::new(self.settings.max_concurrent_tasks));
        let mut units: JoinSet<()> = JoinSet::new();

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, entering drain");
                    break;
                }
                _ = sigint.recv() => {
                    info!("SIGINT received, entering drain");
                    break;
                }
                Some(_) = units.join_next(), if !units.is_empty() => {}
                received = msg_rx.recv() => {
                    let Some(msg) = received else {
                        error!("Message channel closed unexpectedly, entering drain");
                        break;
                    };
                    let permit = tokio::select! {
                        _ = sigterm.recv() => {
                            // Unstarted message stays pending and will be
                            // redelivered elsewhere.
                            info!("SIGTERM received while waiting for a slot");
                            break;
                        }
                        _ = sigint.recv() => {
                            info!("SIGINT received while waiting for a slot");
                            break;
                        }
                        acquired = slots.clone().acquire_owned() => {
                            match acquired {
                                Ok(permit) => permit,
                                Err(_) => break,
                            }
                        }
                    };
                    self.spawn_unit(&mut units, permit, msg);
                }
            }
        }

        self.drain(shutdown_tx, units, consumer_handle, claimer_handle, heartbeat_handle)
            .await
    }

    fn spawn_unit(&self, units: &mut JoinSet<()>, permit: OwnedSemaphorePermit, msg: Message) {
        let executor = self.executor.clone();
        let publisher = self.publisher.clone();
        let state = self.state.clone();
        let worker_id = self.settings.worker_id.clone();

        state.in_flight.fetch_add(1, Ordering::SeqCst);
        gauge!("worker_in_flight").increment(1.0);

        units.spawn(async move {
            let _permit = permit;

            let result = match Task::from_bytes(&msg.payload) {
                Ok(task) => executor.process(&task).await,
                Err(err) => {
                    warn!("Undecodable task body on {} ({}): {err}", msg.stream, msg.id);
                    undecodable_result(msg.task_id.as_deref(), &err, &worker_id)
                }
            };

            if let Err(e) = publisher.publish(&result).await {
                warn!("Failed to publish result for {}: {e}", result.task_id);
            }

            match result.disposition() {
                Disposition::Ack => msg.ack().await,
                Disposition::Redeliver => msg.release(),
            }

            if result.success {
                state.processed.fetch_add(1, Ordering::SeqCst);
            } else {
                state.failed.fetch_add(1, Ordering::SeqCst);
            }
            state.in_flight.fetch_sub(1, Ordering::SeqCst);
            gauge!("worker_in_flight").decrement(1.0);
        });
    }

    async fn drain(
        &self,
        shutdown_tx: broadcast::Sender<()>,
        mut units: JoinSet<()>,
        consumer_handle: JoinHandle<()>,
        claimer_handle: JoinHandle<()>,
        heartbeat_handle: JoinHandle<()>,
    ) -> Result<i32> {
        self.state.set_status(WorkerStatus::Draining);
        let _ = shutdown_tx.send(());

        let deadline = Duration::from_secs(self.settings.graceful_shutdown_timeout);
        info!(
            "Draining {} in-flight tasks, deadline {}s",
            units.len(),
            deadline.as_secs()
        );

        let drained = timeout(deadline, async {
            while units.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        let exit_code = if drained {
            info!("Drain complete, all in-flight tasks finished");
            0
        } else {
            warn!(
                "Drain deadline expired with {} tasks running, cancelling them",
                units.len()
            );
            units.abort_all();
            while units.join_next().await.is_some() {}
            1
        };

        let _ = timeout(BACKGROUND_STOP_GRACE, consumer_handle).await;
        let _ = timeout(BACKGROUND_STOP_GRACE, claimer_handle).await;
        let _ = timeout(BACKGROUND_STOP_GRACE, heartbeat_handle).await;

        if let Err(e) = self.registry.unregister().await {
            warn!("Worker unregistration failed: {e}");
        }
        self.state.set_status(WorkerStatus::Stopped);
        info!("Worker {} stopped, exit {exit_code}", self.settings.worker_id);
        Ok(exit_code)
    }

    fn spawn_heartbeat(&self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let registry = self.registry.clone();
        let state = self.state.clone();
        let settings = self.settings.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        let descriptor = state.descriptor(&settings);
                        if let Err(e) = registry.heartbeat(&descriptor).await {
                            warn!("Heartbeat failed: {e}");
                        }
                    }
                }
            }
        })
    }
}

/// Terminal envelope for a message whose body never parsed into a task.
/// Acked so the broker does not redeliver garbage forever.
fn undecodable_result(
    task_id: Option<&str>,
    err: &errors::Error,
    worker_id: &str,
) -> TaskResult {
    let now = Utc::now();
    TaskResult {
        task_id: task_id.unwrap_or("unknown").to_string(),
        success: false,
        data: None,
        records_count: 0,
        error_kind: Some(FailureKind::InvalidTask),
        error_detail: Some(err.to_string()),
        status_code: None,
        started_at: now,
        finished_at: now,
        worker_id: worker_id.to_string(),
        used_proxy: false,
        used_cookie_id: None,
    }
}
