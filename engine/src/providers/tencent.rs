use downloader::{count_records, ProviderAdapter};
use errors::{ProviderError, Result};
use serde_json::{Map, Value};

/// HK market adapter over the Tencent quote gateway. The envelope is
/// `{code: int, msg: string, data: {<symbol>: {...}}}` with `code == 0` as
/// success; bars live in per-symbol arrays keyed by period name.
pub struct TencentHkAdapter;

impl ProviderAdapter for TencentHkAdapter {
    fn name(&self) -> &'static str {
        "tencent_hk"
    }

    fn validate(&self, body: Value) -> Result<Value> {
        let mut body = body;
        let code = body
            .get("code")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProviderError::UnexpectedShape("missing code".to_string()))?;

        if code != 0 {
            let description = body
                .get("msg")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("upstream error code {code}"));
            return Err(ProviderError::Api { code, description }.into());
        }

        Ok(body
            .as_object_mut()
            .and_then(|map| map.remove("data"))
            .unwrap_or_else(|| Value::Object(Map::new())))
    }

    fn records_count(&self, data: &Value) -> u64 {
        // One symbol entry per request; bar arrays are keyed by period
        // ("qfqday", "day", "m1", ...).
        if let Some(symbols) = data.as_object() {
            for entry in symbols.values() {
                if let Some(fields) = entry.as_object() {
                    for value in fields.values() {
                        if let Some(rows) = value.as_array() {
                            return rows.len() as u64;
                        }
                    }
                }
            }
        }
        count_records(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope() {
        let body = json!({
            "code": 0,
            "msg": "",
            "data": {"hk00700": {"qfqday": [[1, 2], [3, 4], [5, 6]]}}
        });
        let data = TencentHkAdapter.validate(body).unwrap();
        assert_eq!(TencentHkAdapter.records_count(&data), 3);
    }

    #[test]
    fn test_error_envelope() {
        let err = TencentHkAdapter
            .validate(json!({"code": -1, "msg": "param error"}))
            .unwrap_err();
        assert!(err.is_provider());
        assert_eq!(err.provider_description(), Some("param error"));
    }

    #[test]
    fn test_records_fallback_for_flat_object() {
        assert_eq!(
            TencentHkAdapter.records_count(&json!({"qt": {"market": "open"}})),
            1
        );
    }
}
