pub mod upstream;

pub use upstream::UpstreamClient;

use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Fixed pool the rotating User-Agent is drawn from.
pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/14.1.1 Safari/605.1.15",
];

/// Validates one provider's response envelope and counts its records.
/// The transport is provider-agnostic; this pair is the only per-provider
/// extensibility point.
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks the decoded body against the provider contract and extracts the
    /// payload that downstream consumers receive.
    fn validate(&self, body: Value) -> errors::Result<Value>;

    fn records_count(&self, data: &Value) -> u64;
}

/// One fully-resolved upstream request: endpoint, injected resources, and the
/// hard deadline. Built by the router/executor, consumed by `UpstreamClient`.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub url: String,
    pub method: String,
    pub params: Vec<(String, String)>,
    pub headers: HashMap<String, String>,
    pub body: Option<Value>,
    pub cookie: Option<String>,
    pub proxy: Option<String>,
    pub symbol: String,
    /// Scheme+host the Referer/Origin headers point at.
    pub origin: String,
    pub deadline: Duration,
}

#[derive(Debug, Clone)]
pub struct Fetched {
    pub status_code: u16,
    pub data: Value,
    pub records_count: u64,
}

/// Record-count precedence shared by the kline-style providers:
/// `item` bars, then `list` quote rows, then `items` minute ticks, then 1 for
/// a non-empty object, else 0.
pub fn count_records(data: &Value) -> u64 {
    if let Some(item) = data.get("item").and_then(Value::as_array) {
        return item.len() as u64;
    }
    if let Some(list) = data.get("list").and_then(Value::as_array) {
        return list.len() as u64;
    }
    if let Some(items) = data.get("items").and_then(Value::as_array) {
        return items.len() as u64;
    }
    match data.as_object() {
        Some(map) if !map.is_empty() => 1,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_count_records_precedence() {
        assert_eq!(count_records(&json!({"item": [1, 2, 3]})), 3);
        assert_eq!(count_records(&json!({"list": [1, 2]})), 2);
        assert_eq!(count_records(&json!({"items": [1]})), 1);
        // `item` wins over `list` when both are present.
        assert_eq!(count_records(&json!({"item": [1], "list": [1, 2]})), 1);
    }

    #[test]
    fn test_count_records_object_fallback() {
        assert_eq!(count_records(&json!({"symbol": "SH600000"})), 1);
        assert_eq!(count_records(&json!({})), 0);
        assert_eq!(count_records(&json!(null)), 0);
        assert_eq!(count_records(&json!([1, 2])), 0);
    }
}
