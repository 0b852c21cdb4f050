use crate::gate::ConcurrencyGate;
use crate::providers;
use crate::router::ProviderRouter;
use chrono::{NaiveDate, Utc};
use common::{FailureKind, Market, Settings, Task, TaskResult};
use downloader::{FetchRequest, Fetched, UpstreamClient};
use errors::ErrorKind;
use log::{info, warn};
use metrics::counter;
use resources::ResourceCache;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use utils::date_utils;

/// Request-scoped pipeline for one task: resource injection, gate admission,
/// routed fetch, backfill trimming, result envelope. Holds no per-task state,
/// so concurrent invocations are safe by construction.
pub struct TaskExecutor {
    settings: Arc<Settings>,
    resources: Arc<ResourceCache>,
    upstream: Arc<UpstreamClient>,
    gate: ConcurrencyGate,
    worker_id: String,
}

impl TaskExecutor {
    pub fn new(
        settings: Arc<Settings>,
        resources: Arc<ResourceCache>,
        upstream: Arc<UpstreamClient>,
    ) -> Self {
        let gate = ConcurrencyGate::new(settings.no_proxy_permits, settings.proxy_permits);
        let worker_id = settings.worker_id.clone();
        Self {
            settings,
            resources,
            upstream,
            gate,
            worker_id,
        }
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.gate
    }

    pub async fn process(&self, task: &Task) -> TaskResult {
        let started_at = Utc::now();
        let mut used_proxy = false;
        let mut used_cookie_id = None;

        let outcome = self
            .run(task, &mut used_proxy, &mut used_cookie_id)
            .await;
        let finished_at = Utc::now();

        match outcome {
            Ok(fetched) => {
                info!(
                    "Task {} done: {} records from {} in {}ms",
                    task.task_id,
                    fetched.records_count,
                    task.symbol,
                    (finished_at - started_at).num_milliseconds()
                );
                counter!("crawler_tasks_total", "outcome" => "success").increment(1);
                TaskResult {
                    task_id: task.task_id.clone(),
                    success: true,
                    records_count: fetched.records_count,
                    status_code: Some(fetched.status_code),
                    data: Some(fetched.data),
                    error_kind: None,
                    error_detail: None,
                    started_at,
                    finished_at,
                    worker_id: self.worker_id.clone(),
                    used_proxy,
                    used_cookie_id,
                }
            }
            Err(err) => {
                let kind = classify_failure(&err);
                self.record_failure(task, kind, &err);
                TaskResult {
                    task_id: task.task_id.clone(),
                    success: false,
                    records_count: 0,
                    status_code: err.status(),
                    data: None,
                    error_kind: Some(kind),
                    error_detail: Some(err.to_string()),
                    started_at,
                    finished_at,
                    worker_id: self.worker_id.clone(),
                    used_proxy,
                    used_cookie_id,
                }
            }
        }
    }

    async fn run(
        &self,
        task: &Task,
        used_proxy: &mut bool,
        used_cookie_id: &mut Option<String>,
    ) -> errors::Result<Fetched> {
        validate_task(task)?;

        // Cookie first: a CN task that cannot resolve one must fail before
        // any outbound request is attempted.
        let cookie = if cookie_required(task) && self.settings.enable_cookie_injection {
            let cookie_id = task
                .payload
                .cookie_id
                .clone()
                .ok_or_else(|| errors::Error::missing_cookie("<unset>"))?;
            let text = self
                .resources
                .get_cookie(task.market, &cookie_id)
                .await
                .ok_or_else(|| errors::Error::missing_cookie(&cookie_id))?;
            *used_cookie_id = Some(cookie_id);
            Some(text)
        } else {
            None
        };

        // Proxy is optional; an explicit one in the payload wins over the
        // rotating pool. Absence just routes the task to the direct gate.
        let proxy = match &task.payload.proxy {
            Some(explicit) => Some(explicit.clone()),
            None if self.settings.enable_proxy_injection => {
                self.resources.get_random_proxy(task.market).await
            }
            None => None,
        };
        *used_proxy = proxy.is_some();

        // Gate selection is fixed to happen after proxy resolution.
        let _permit = self.gate.acquire(proxy.is_some()).await?;

        let route = ProviderRouter::resolve(task)?;
        let adapter = providers::adapter_for(route.provider);
        let deadline = Duration::from_secs(self.settings.effective_timeout(task.timeout_s));

        let request = FetchRequest {
            url: route.url,
            method: route.method,
            params: route.params,
            headers: task.payload.headers.clone().unwrap_or_default(),
            body: task.payload.body.clone(),
            cookie,
            proxy,
            symbol: task.symbol.clone(),
            origin: route.origin,
            deadline,
        };

        let mut fetched = self.upstream.execute(request, adapter).await?;

        if let Some((start, end)) = route.date_window {
            if let Some(trimmed) = filter_kline_window(&mut fetched.data, start, end) {
                fetched.records_count = trimmed;
            }
        }

        Ok(fetched)
    }

    fn record_failure(&self, task: &Task, kind: FailureKind, err: &errors::Error) {
        warn!("Task {} failed ({kind}): {err}", task.task_id);
        counter!("crawler_tasks_total", "outcome" => kind.as_str()).increment(1);
        match kind {
            FailureKind::MissingCookie => {
                counter!("crawler_missing_cookie_total", "market" => task.market.to_string())
                    .increment(1);
            }
            FailureKind::InternalError => {
                counter!("crawler_internal_errors_total").increment(1);
            }
            FailureKind::ProxyError => {
                // The pool has likely rotated a dead proxy out; force the
                // next task to re-read the list.
                self.resources.invalidate_proxies(task.market);
            }
            _ => {}
        }
    }
}

fn validate_task(task: &Task) -> errors::Result<()> {
    if task.task_id.trim().is_empty() {
        return Err(errors::Error::invalid_task("empty task_id"));
    }
    if task.symbol.trim().is_empty() {
        return Err(errors::Error::invalid_task("empty symbol"));
    }
    Ok(())
}

/// The primary CN endpoints are authenticated; US/HK providers are not.
fn cookie_required(task: &Task) -> bool {
    task.market == Market::CN
}

/// Maps an internal error onto the wire-facing failure taxonomy.
pub fn classify_failure(err: &errors::Error) -> FailureKind {
    if err.is_invalid_task() {
        return FailureKind::InvalidTask;
    }
    if err.is_unsupported_task() {
        return FailureKind::UnsupportedTask;
    }
    if err.is_timeout() {
        return FailureKind::Timeout;
    }
    if err.is_cancelled() {
        return FailureKind::Cancelled;
    }
    match err.kind() {
        // Malformed task body is terminal either way.
        ErrorKind::Task => FailureKind::InvalidTask,
        ErrorKind::Cookie => FailureKind::MissingCookie,
        ErrorKind::Provider => FailureKind::ProviderError,
        ErrorKind::Proxy => FailureKind::ProxyError,
        ErrorKind::Fetch => match err.status() {
            Some(code) if (400..500).contains(&code) => FailureKind::HttpError4xx,
            Some(_) => FailureKind::HttpError5xx,
            None => FailureKind::NetworkError,
        },
        ErrorKind::Cache | ErrorKind::Queue | ErrorKind::Service => FailureKind::InternalError,
    }
}

/// Trims `data.item` to bars whose timestamp (first column, epoch millis)
/// falls inside the inclusive `[start, end]` day window. Returns the new bar
/// count, or `None` when the payload has no bar array to trim.
pub fn filter_kline_window(data: &mut Value, start: NaiveDate, end: NaiveDate) -> Option<u64> {
    let (lo, hi) = date_utils::day_range_millis(start, end);
    let items = data.get_mut("item")?.as_array_mut()?;
    items.retain(|bar| bar_timestamp(bar).is_some_and(|ts| ts >= lo && ts < hi));
    Some(items.len() as u64)
}

fn bar_timestamp(bar: &Value) -> Option<i64> {
    match bar {
        Value::Array(row) => row.first()?.as_i64(),
        Value::Object(map) => map.get("timestamp").and_then(Value::as_i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{TaskPayload, TaskType, Tier};
    use errors::{CacheError, FetchError, ProviderError, ServiceError};
    use resources::CacheBackend;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MapBackend {
        data: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MapBackend {
        fn new() -> Self {
            Self {
                data: Mutex::new(HashMap::new()),
            }
        }

        fn put(&self, key: &str, value: serde_json::Value) {
            self.data
                .lock()
                .unwrap()
                .insert(key.to_string(), serde_json::to_vec(&value).unwrap());
        }
    }

    #[async_trait::async_trait]
    impl CacheBackend for MapBackend {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Ok(self.data.lock().unwrap().get(key).cloned())
        }

        async fn ping(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    fn settings() -> Arc<Settings> {
        Arc::new(Settings {
            worker_id: "w-test".into(),
            tier: Tier::Normal,
            max_concurrent_tasks: 5,
            task_timeout_seconds: 30,
            graceful_shutdown_timeout: 120,
            dragonfly_host: "127.0.0.1".into(),
            dragonfly_port: 6379,
            dragonfly_password: None,
            dragonfly_db: 0,
            enable_proxy_injection: true,
            enable_cookie_injection: true,
            no_proxy_permits: 5,
            proxy_permits: 20,
            log_level: "info".into(),
        })
    }

    fn executor_with(backend: Arc<MapBackend>) -> TaskExecutor {
        TaskExecutor::new(
            settings(),
            Arc::new(ResourceCache::new(backend)),
            Arc::new(UpstreamClient::new(32).unwrap()),
        )
    }

    fn cn_task() -> Task {
        Task {
            task_id: "t1".to_string(),
            task_type: TaskType::Realtime1m,
            market: Market::CN,
            symbol: "SH600000".to_string(),
            endpoint: None,
            payload: TaskPayload {
                cookie_id: Some("c1".to_string()),
                ..TaskPayload::default()
            },
            enqueued_at: None,
            attempt: 1,
            timeout_s: None,
        }
    }

    #[tokio::test]
    async fn test_missing_cookie_is_terminal_without_http() {
        let backend = Arc::new(MapBackend::new());
        let executor = executor_with(backend);

        let mut task = cn_task();
        task.payload.cookie_id = Some("nope".to_string());
        let result = executor.process(&task).await;

        assert!(!result.success);
        assert_eq!(result.error_kind, Some(FailureKind::MissingCookie));
        assert_eq!(result.disposition(), common::Disposition::Ack);
        // The gate was never touched, so no request can have gone out.
        assert_eq!(executor.gate().outstanding(), (0, 0));
        assert!(!result.used_proxy);
        assert!(result.used_cookie_id.is_none());
    }

    #[tokio::test]
    async fn test_absent_cookie_id_is_missing_cookie() {
        let executor = executor_with(Arc::new(MapBackend::new()));
        let mut task = cn_task();
        task.payload.cookie_id = None;
        let result = executor.process(&task).await;
        assert_eq!(result.error_kind, Some(FailureKind::MissingCookie));
    }

    #[tokio::test]
    async fn test_empty_symbol_is_invalid_task() {
        let executor = executor_with(Arc::new(MapBackend::new()));
        let mut task = cn_task();
        task.symbol = " ".to_string();
        let result = executor.process(&task).await;
        assert_eq!(result.error_kind, Some(FailureKind::InvalidTask));
        assert_eq!(result.disposition(), common::Disposition::Ack);
    }

    #[tokio::test]
    async fn test_unsupported_pair_after_cookie_resolution() {
        let backend = Arc::new(MapBackend::new());
        backend.put("cookie:CN:c1", json!({"cookie_text": "tok"}));
        let executor = executor_with(backend);

        let mut task = cn_task();
        task.task_type = TaskType::UsRealtime1m;
        task.payload.proxy = Some("http://10.0.0.1:8080".to_string());
        let result = executor.process(&task).await;

        assert_eq!(result.error_kind, Some(FailureKind::UnsupportedTask));
        assert_eq!(result.used_cookie_id.as_deref(), Some("c1"));
        // Permit released on the error path.
        assert_eq!(executor.gate().outstanding(), (0, 0));
    }

    #[test]
    fn test_classify_failure_table() {
        assert_eq!(
            classify_failure(&errors::Error::invalid_task("x")),
            FailureKind::InvalidTask
        );
        assert_eq!(
            classify_failure(&errors::Error::unsupported_task("x")),
            FailureKind::UnsupportedTask
        );
        assert_eq!(
            classify_failure(&errors::Error::missing_cookie("c1")),
            FailureKind::MissingCookie
        );
        assert_eq!(
            classify_failure(&ProviderError::Api { code: 1, description: "x".into() }.into()),
            FailureKind::ProviderError
        );
        assert_eq!(
            classify_failure(&FetchError::Status(404).into()),
            FailureKind::HttpError4xx
        );
        assert_eq!(
            classify_failure(&FetchError::Status(502).into()),
            FailureKind::HttpError5xx
        );
        assert_eq!(
            classify_failure(&FetchError::Timeout.into()),
            FailureKind::Timeout
        );
        assert_eq!(
            classify_failure(&FetchError::Network("reset".into()).into()),
            FailureKind::NetworkError
        );
        assert_eq!(
            classify_failure(&errors::ProxyError::ConnectFailed("refused".into()).into()),
            FailureKind::ProxyError
        );
        assert_eq!(
            classify_failure(&errors::Error::cancelled()),
            FailureKind::Cancelled
        );
        assert_eq!(
            classify_failure(&ServiceError::Internal("boom".into()).into()),
            FailureKind::InternalError
        );
    }

    #[test]
    fn test_filter_kline_window() {
        // Ten daily bars spanning 2024-01-05..2024-01-14.
        let bars: Vec<Value> = (5..15)
            .map(|day| {
                let date = NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
                let ts = date.and_hms_opt(9, 30, 0).unwrap().and_utc().timestamp_millis();
                json!([ts, 10.0 + day as f64])
            })
            .collect();
        let mut data = json!({"item": bars, "column": ["timestamp", "close"]});

        let start = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 12).unwrap();
        let count = filter_kline_window(&mut data, start, end).unwrap();

        assert_eq!(count, 3);
        let (lo, hi) = date_utils::day_range_millis(start, end);
        for bar in data["item"].as_array().unwrap() {
            let ts = bar[0].as_i64().unwrap();
            assert!(ts >= lo && ts < hi);
        }
    }

    #[test]
    fn test_filter_kline_window_without_items() {
        let mut data = json!({"list": [1, 2, 3]});
        let start = NaiveDate::from_ymd_opt(2024, 1, 10).unwrap();
        assert_eq!(filter_kline_window(&mut data, start, start), None);
    }

    #[test]
    fn test_bar_timestamp_shapes() {
        assert_eq!(bar_timestamp(&json!([1704844800000i64, 10.0])), Some(1704844800000));
        assert_eq!(
            bar_timestamp(&json!({"timestamp": 1704844800000i64})),
            Some(1704844800000)
        );
        assert_eq!(bar_timestamp(&json!("2024-01-10")), None);
    }
}
