use crate::{FetchRequest, Fetched, ProviderAdapter, USER_AGENTS};
use dashmap::DashMap;
use errors::{FetchError, ProxyError, Result};
use log::warn;
use metrics::{counter, histogram};
use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Proxy};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Issues single upstream requests with injected headers, cookie and proxy.
/// Clients are pooled per proxy URL; the direct client is shared.
pub struct UpstreamClient {
    default_client: Client,
    proxy_clients: Arc<DashMap<String, (Client, Instant)>>,
    pool_size: usize,
}

impl UpstreamClient {
    pub fn new(pool_size: usize) -> Result<Self> {
        let default_client = base_builder(pool_size)
            .build()
            .map_err(|e| FetchError::BuildFailed(e.into()))?;

        let proxy_clients: Arc<DashMap<String, (Client, Instant)>> = Arc::new(DashMap::new());
        let cleanup_clients = proxy_clients.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                let now = Instant::now();
                cleanup_clients.retain(|_, (_, last_access)| {
                    now.duration_since(*last_access) < Duration::from_secs(3600)
                });
            }
        });

        Ok(UpstreamClient {
            default_client,
            proxy_clients,
            pool_size,
        })
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client> {
        let Some(proxy_url) = proxy else {
            return Ok(self.default_client.clone());
        };

        if let Some(mut entry) = self.proxy_clients.get_mut(proxy_url) {
            entry.1 = Instant::now();
            return Ok(entry.0.clone());
        }

        let reqwest_proxy =
            Proxy::all(proxy_url).map_err(|e| ProxyError::Invalid(e.into()))?;
        let client = base_builder(self.pool_size)
            .proxy(reqwest_proxy)
            .build()
            .map_err(|e| FetchError::BuildFailed(e.into()))?;

        // Bound the cache so a high-cardinality rotating pool cannot OOM us.
        if self.proxy_clients.len() < 1000 {
            self.proxy_clients
                .insert(proxy_url.to_string(), (client.clone(), Instant::now()));
        }
        Ok(client)
    }

    pub async fn execute(
        &self,
        mut request: FetchRequest,
        adapter: &dyn ProviderAdapter,
    ) -> Result<Fetched> {
        let client = self.client_for(request.proxy.as_deref())?;

        let method = Method::from_str(&request.method)
            .map_err(|e| FetchError::InvalidMethod(e.into()))?;
        let url = if request.params.is_empty() {
            Url::parse(&request.url).map_err(|e| FetchError::InvalidUrl(e.to_string()))?
        } else {
            Url::parse_with_params(&request.url, &request.params)
                .map_err(|e| FetchError::InvalidUrl(e.to_string()))?
        };

        let headers = assemble_headers(&request);
        let header_map = to_header_map(&headers)?;

        let mut builder = client
            .request(method, url)
            .headers(header_map)
            .timeout(request.deadline);
        if let Some(body) = request.body.take() {
            builder = builder.json(&body);
        }

        let proxied = request.proxy.is_some();
        let start = Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                errors::Error::from(FetchError::Timeout)
            } else if e.is_connect() && proxied {
                errors::Error::from(ProxyError::ConnectFailed(e.into()))
            } else {
                errors::Error::from(FetchError::Network(e.into()))
            }
        })?;

        let status = response.status();
        histogram!("downloader_request_duration_seconds", "provider" => adapter.name())
            .record(start.elapsed().as_secs_f64());
        counter!(
            "downloader_requests_total",
            "provider" => adapter.name(),
            "status_code" => status.as_u16().to_string()
        )
        .increment(1);

        if !status.is_success() {
            warn!(
                "Upstream {} returned {} for {}",
                adapter.name(),
                status.as_u16(),
                request.symbol
            );
            return Err(FetchError::Status(status.as_u16()).into());
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                errors::Error::from(FetchError::Timeout)
            } else {
                errors::Error::from(FetchError::Network(e.into()))
            }
        })?;
        let body: serde_json::Value =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Decode(e.into()))?;

        let data = adapter.validate(body)?;
        let records_count = adapter.records_count(&data);

        Ok(Fetched {
            status_code: status.as_u16(),
            data,
            records_count,
        })
    }
}

fn base_builder(pool_size: usize) -> reqwest::ClientBuilder {
    Client::builder()
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(pool_size)
        .tcp_keepalive(Duration::from_secs(60))
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(10))
}

/// Baseline header set with caller overrides applied on top. The cookie is
/// appended to any caller-supplied Cookie value rather than replacing it.
fn assemble_headers(request: &FetchRequest) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    headers.insert("User-Agent".to_string(), random_user_agent().to_string());
    headers.insert(
        "Accept".to_string(),
        "application/json, text/plain, */*".to_string(),
    );
    headers.insert(
        "Accept-Language".to_string(),
        "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
    );
    headers.insert(
        "Referer".to_string(),
        format!("{}/S/{}", request.origin, request.symbol),
    );
    headers.insert("Origin".to_string(), request.origin.clone());
    headers.insert(
        "X-Requested-With".to_string(),
        "XMLHttpRequest".to_string(),
    );

    for (key, value) in &request.headers {
        headers.insert(key.clone(), value.clone());
    }

    if let Some(cookie) = &request.cookie {
        match headers.get_mut("Cookie") {
            Some(existing) if !existing.contains(cookie.as_str()) => {
                *existing = format!("{existing}; {cookie}");
            }
            Some(_) => {}
            None => {
                headers.insert("Cookie".to_string(), cookie.clone());
            }
        }
    }

    headers
}

fn to_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| FetchError::BuildFailed(e.into()))?;
        let value =
            HeaderValue::from_str(value).map_err(|e| FetchError::BuildFailed(e.into()))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn random_user_agent() -> &'static str {
    let idx = rand::rng().random_range(0..USER_AGENTS.len());
    USER_AGENTS[idx]
}
