use downloader::{count_records, ProviderAdapter};
use errors::{ProviderError, Result};
use serde_json::{Map, Value};

/// Primary CN provider. Every endpoint answers with the same envelope:
/// `{error_code: int, error_description?: string, data?: object}` where
/// `error_code == 0` means success. Envelope-level classification wins over
/// the HTTP status when both are present.
pub struct XueqiuAdapter;

impl ProviderAdapter for XueqiuAdapter {
    fn name(&self) -> &'static str {
        "xueqiu"
    }

    fn validate(&self, body: Value) -> Result<Value> {
        let mut body = body;
        let code = body
            .get("error_code")
            .and_then(Value::as_i64)
            .ok_or_else(|| ProviderError::UnexpectedShape("missing error_code".to_string()))?;

        if code != 0 {
            let description = body
                .get("error_description")
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
        count_records(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_envelope_yields_data() {
        let body = json!({
            "error_code": 0,
            "data": {"item": [[1704844800000i64, 10.0], [1704931200000i64, 10.5]]}
        });
        let data = XueqiuAdapter.validate(body).unwrap();
        assert_eq!(XueqiuAdapter.records_count(&data), 2);
    }

    #[test]
    fn test_success_without_data_is_empty_object() {
        let data = XueqiuAdapter.validate(json!({"error_code": 0})).unwrap();
        assert_eq!(data, json!({}));
        assert_eq!(XueqiuAdapter.records_count(&data), 0);
    }

    #[test]
    fn test_error_envelope_carries_description() {
        let err = XueqiuAdapter
            .validate(json!({"error_code": 400016, "error_description": "token expired"}))
            .unwrap_err();
        assert!(err.is_provider());
        assert_eq!(err.provider_description(), Some("token expired"));
    }

    #[test]
    fn test_error_envelope_without_description() {
        let err = XueqiuAdapter
            .validate(json!({"error_code": 400010}))
            .unwrap_err();
        assert_eq!(err.provider_description(), Some("upstream error code 400010"));
    }

    #[test]
    fn test_missing_error_code_is_shape_error() {
        let err = XueqiuAdapter.validate(json!({"data": {}})).unwrap_err();
        assert!(err.is_provider());
        assert_eq!(err.provider_description(), None);
    }
}
