use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;

/// One unit of work pulled from the broker. The consumer hands the serialized
/// body over untouched; decoding and validation happen in the executor.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub task_type: TaskType,
    pub market: Market,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<Endpoint>,
    #[serde(default)]
    pub payload: TaskPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<DateTime<Utc>>,
    #[serde(default = "default_attempt")]
    pub attempt: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_s: Option<u64>,
}

fn default_attempt() -> u32 {
    1
}

impl Task {
    pub fn from_bytes(bytes: &[u8]) -> errors::Result<Task> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    #[serde(rename = "1m_realtime")]
    Realtime1m,
    #[serde(rename = "5m_realtime")]
    Realtime5m,
    #[serde(rename = "15m_realtime")]
    Realtime15m,
    #[serde(rename = "15m_backfill")]
    Backfill15m,
    #[serde(rename = "1d_backfill")]
    Backfill1d,
    #[serde(rename = "us_1m_realtime")]
    UsRealtime1m,
    #[serde(rename = "hk_1m_realtime")]
    HkRealtime1m,
}

impl TaskType {
    pub fn is_backfill(&self) -> bool {
        matches!(self, TaskType::Backfill15m | TaskType::Backfill1d)
    }

    /// Bar period implied by the task type, for kline routes.
    pub fn implied_period(&self) -> Option<&'static str> {
        match self {
            TaskType::Realtime1m | TaskType::UsRealtime1m | TaskType::HkRealtime1m => Some("1m"),
            TaskType::Realtime5m => Some("5m"),
            TaskType::Realtime15m | TaskType::Backfill15m => Some("15m"),
            TaskType::Backfill1d => Some("1d"),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskType::Realtime1m => "1m_realtime",
            TaskType::Realtime5m => "5m_realtime",
            TaskType::Realtime15m => "15m_realtime",
            TaskType::Backfill15m => "15m_backfill",
            TaskType::Backfill1d => "1d_backfill",
            TaskType::UsRealtime1m => "us_1m_realtime",
            TaskType::HkRealtime1m => "hk_1m_realtime",
        };
        write!(f, "{name}")
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Market {
    CN,
    US,
    HK,
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Market::CN => write!(f, "CN"),
            Market::US => write!(f, "US"),
            Market::HK => write!(f, "HK"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Endpoint {
    Kline,
    Quote,
    BatchQuote,
    Minute,
    Detail,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Endpoint::Kline => "kline",
            Endpoint::Quote => "quote",
            Endpoint::BatchQuote => "batch_quote",
            Endpoint::Minute => "minute",
            Endpoint::Detail => "detail",
        };
        write!(f, "{name}")
    }
}

/// Free-form task payload. Known fields are typed; anything else lands in
/// `extras` so newer schedulers can ship fields older workers ignore.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct TaskPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookie_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}
