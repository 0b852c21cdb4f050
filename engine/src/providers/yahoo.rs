use downloader::ProviderAdapter;
use errors::{ProviderError, Result};
use serde_json::{json, Value};

/// US market adapter over the Yahoo Finance chart API. The envelope is
/// `{chart: {result: [...], error: ...}}`; the forwarded payload keeps the
/// first result's timestamps, quote block and meta.
pub struct YahooAdapter;

impl ProviderAdapter for YahooAdapter {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn validate(&self, body: Value) -> Result<Value> {
        let chart = body
            .get("chart")
            .ok_or_else(|| ProviderError::UnexpectedShape("missing chart".to_string()))?;

        if let Some(error) = chart.get("error").filter(|e| !e.is_null()) {
            let description = error
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("chart error")
                .to_string();
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .and_then(|c| c.parse().ok())
                .unwrap_or(-1);
            return Err(ProviderError::Api { code, description }.into());
        }

        let result = chart
            .get("result")
            .and_then(Value::as_array)
            .and_then(|r| r.first())
            .ok_or_else(|| ProviderError::UnexpectedShape("empty chart result".to_string()))?;

        let timestamps = result.get("timestamp").cloned().unwrap_or_else(|| json!([]));
        let quote = result
            .pointer("/indicators/quote/0")
            .cloned()
            .unwrap_or_else(|| json!({}));
        let meta = result.get("meta").cloned().unwrap_or_else(|| json!({}));

        Ok(json!({
            "timestamps": timestamps,
            "quote": quote,
            "meta": meta,
        }))
    }

    fn records_count(&self, data: &Value) -> u64 {
        data.get("timestamps")
            .and_then(Value::as_array)
            .map(|t| t.len() as u64)
            .unwrap_or(0)
    }
}
