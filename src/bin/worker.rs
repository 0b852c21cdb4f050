use common::Settings;
use downloader::UpstreamClient;
use engine::{TaskExecutor, WorkerRegistry, WorkerSupervisor};
use log::{error, info};
use queue::{ResultPublisher, StreamConsumer};
use resources::{RedisBackend, ResourceCache};
use std::sync::Arc;

const REDIS_POOL_SIZE: usize = 32;
const UPSTREAM_POOL_SIZE: usize = 64;
const CONSUMER_BATCH_SIZE: usize = 16;

/// Exit codes: 0 clean drain, 1 forced cancel at the drain deadline,
/// 2 startup failure (bad config or unreachable broker).
#[tokio::main]
async fn main() {
    let code = run().await;
    std::process::exit(code);
}

async fn run() -> i32 {
    let settings = match Settings::from_env() {
        Ok(settings) => Arc::new(settings),
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return 2;
        }
    };

    if let Err(e) = utils::logger::LoggerConfig::new(&settings.log_level).init() {
        eprintln!("Logger init failed: {e}");
    }
    info!(
        "Starting crawl worker: {}",
        serde_json::to_string(settings.as_ref()).unwrap_or_default()
    );

    let Some(pool) = utils::connector::create_redis_pool(
        &settings.dragonfly_host,
        settings.dragonfly_port,
        settings.dragonfly_db,
        &None,
        &settings.dragonfly_password,
        REDIS_POOL_SIZE,
    ) else {
        error!(
            "Failed to build broker pool for {}:{}",
            settings.dragonfly_host, settings.dragonfly_port
        );
        return 2;
    };

    let resources = Arc::new(ResourceCache::new(Arc::new(RedisBackend::new(pool.clone()))));
    if let Err(e) = resources.ping().await {
        error!(
            "Broker unreachable at {}:{}: {e}",
            settings.dragonfly_host, settings.dragonfly_port
        );
        return 2;
    }

    let upstream = match UpstreamClient::new(UPSTREAM_POOL_SIZE) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build HTTP client: {e}");
            return 2;
        }
    };

    let consumer = match StreamConsumer::new(
        pool.clone(),
        settings.tier,
        &settings.worker_id,
        CONSUMER_BATCH_SIZE,
    )
    .await
    {
        Ok(consumer) => Arc::new(consumer),
        Err(e) => {
            error!("Failed to set up stream consumer: {e}");
            return 2;
        }
    };

    let executor = Arc::new(TaskExecutor::new(
        settings.clone(),
        resources,
        upstream,
    ));
    let publisher = Arc::new(ResultPublisher::new(pool.clone()));
    let registry = Arc::new(WorkerRegistry::new(pool, settings.worker_id.clone()));

    let supervisor = WorkerSupervisor::new(settings, executor, consumer, publisher, registry);
    match supervisor.run().await {
        Ok(code) => code,
        Err(e) => {
            error!("Supervisor failed to start: {e}");
            2
        }
    }
}
