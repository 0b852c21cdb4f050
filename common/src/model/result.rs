use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Outcome envelope for one processed task. `data` carries the raw provider
/// payload; nothing here is parsed into a domain schema.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub records_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub worker_id: String,
    pub used_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_cookie_id: Option<String>,
}

impl TaskResult {
    /// Whether the broker message should be acknowledged. Transient failures
    /// are left pending so the broker redelivers them.
    pub fn disposition(&self) -> Disposition {
        match &self.error_kind {
            None => Disposition::Ack,
            Some(kind) => kind.disposition(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Terminal outcome: acknowledge, the broker will not redeliver.
    Ack,
    /// Transient outcome: leave pending, the broker redelivers after its
    /// visibility timeout.
    Redeliver,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidTask,
    UnsupportedTask,
    MissingCookie,
    ProviderError,
    #[serde(rename = "http_error_4xx")]
    HttpError4xx,
    #[serde(rename = "http_error_5xx")]
    HttpError5xx,
    Timeout,
    NetworkError,
    ProxyError,
    Cancelled,
    InternalError,
}

impl FailureKind {
    pub fn disposition(&self) -> Disposition {
        match self {
            FailureKind::InvalidTask
            | FailureKind::UnsupportedTask
            | FailureKind::MissingCookie
            | FailureKind::ProviderError
            | FailureKind::HttpError4xx => Disposition::Ack,
            FailureKind::HttpError5xx
            | FailureKind::Timeout
            | FailureKind::NetworkError
            | FailureKind::ProxyError
            | FailureKind::Cancelled
            | FailureKind::InternalError => Disposition::Redeliver,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::InvalidTask => "invalid_task",
            FailureKind::UnsupportedTask => "unsupported_task",
            FailureKind::MissingCookie => "missing_cookie",
            FailureKind::ProviderError => "provider_error",
            FailureKind::HttpError4xx => "http_error_4xx",
            FailureKind::HttpError5xx => "http_error_5xx",
            FailureKind::Timeout => "timeout",
            FailureKind::NetworkError => "network_error",
            FailureKind::ProxyError => "proxy_error",
            FailureKind::Cancelled => "cancelled",
            FailureKind::InternalError => "internal_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposition_table() {
        use FailureKind::*;
        for kind in [InvalidTask, UnsupportedTask, MissingCookie, ProviderError, HttpError4xx] {
            assert_eq!(kind.disposition(), Disposition::Ack, "{kind} should ack");
        }
        for kind in [HttpError5xx, Timeout, NetworkError, ProxyError, Cancelled, InternalError] {
            assert_eq!(
                kind.disposition(),
                Disposition::Redeliver,
                "{kind} should redeliver"
            );
        }
    }

    #[test]
    fn test_failure_kind_serde_tags() {
        assert_eq!(
            serde_json::to_string(&FailureKind::MissingCookie).unwrap(),
            "\"missing_cookie\""
        );
        assert_eq!(
            serde_json::to_string(&FailureKind::HttpError5xx).unwrap(),
            "\"http_error_5xx\""
        );
        let kind: FailureKind = serde_json::from_str("\"http_error_4xx\"").unwrap();
        assert_eq!(kind, FailureKind::HttpError4xx);
    }

    #[test]
    fn test_success_result_acks() {
        let result = TaskResult {
            task_id: "t1".into(),
            success: true,
            data: Some(serde_json::json!({"item": []})),
            records_count: 0,
            error_kind: None,
            error_detail: None,
            status_code: Some(200),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            worker_id: "w1".into(),
            used_proxy: true,
            used_cookie_id: Some("c1".into()),
        };
        assert_eq!(result.disposition(), Disposition::Ack);
    }
}
