use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Priority tier a worker process is pinned to. Selects the queue
/// subscription set and the consumer-group name.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Critical,
    High,
    Normal,
}

impl Tier {
    /// Subscribed streams in priority order. The consumer must serve an
    /// earlier stream with pending items before any later one.
    pub fn queues(&self) -> &'static [&'static str] {
        match self {
            Tier::Critical => &["crawler_backfill_critical", "crawler_realtime_critical"],
            Tier::High => &[
                "crawler_backfill_high",
                "crawler_realtime_high",
                "crawler_backfill_normal",
            ],
            Tier::Normal => &["crawler_backfill_normal", "crawler_realtime_normal"],
        }
    }

    pub fn consumer_group(&self) -> String {
        format!("crawler_{}", self.as_str().to_lowercase())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Critical => "CRITICAL",
            Tier::High => "HIGH",
            Tier::Normal => "NORMAL",
        }
    }
}

impl FromStr for Tier {
    type Err = errors::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "CRITICAL" => Ok(Tier::Critical),
            "HIGH" => Ok(Tier::High),
            // MEDIUM is the legacy name for the third tier.
            "NORMAL" | "MEDIUM" => Ok(Tier::Normal),
            other => Err(errors::Error::invalid_config(format!(
                "unknown priority level: {other}"
            ))),
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerStatus::Starting => "starting",
            WorkerStatus::Running => "running",
            WorkerStatus::Draining => "draining",
            WorkerStatus::Stopped => "stopped",
        };
        write!(f, "{name}")
    }
}

/// Snapshot of one worker process, published to the registry keyspace.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WorkerDescriptor {
    pub worker_id: String,
    pub tier: Tier,
    pub subscribed_queues: Vec<String>,
    pub max_concurrent: usize,
    pub status: WorkerStatus,
    pub in_flight_count: usize,
    pub processed_total: u64,
    pub failed_total: u64,
}

impl WorkerDescriptor {
    pub fn new(worker_id: impl Into<String>, tier: Tier, max_concurrent: usize) -> Self {
        Self {
            worker_id: worker_id.into(),
            tier,
            subscribed_queues: tier.queues().iter().map(|q| q.to_string()).collect(),
            max_concurrent,
            status: WorkerStatus::Starting,
            in_flight_count: 0,
            processed_total: 0,
            failed_total: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_queue_mapping() {
        assert_eq!(
            Tier::Critical.queues(),
            &["crawler_backfill_critical", "crawler_realtime_critical"]
        );
        assert_eq!(
            Tier::High.queues(),
            &[
                "crawler_backfill_high",
                "crawler_realtime_high",
                "crawler_backfill_normal"
            ]
        );
        assert_eq!(
            Tier::Normal.queues(),
            &["crawler_backfill_normal", "crawler_realtime_normal"]
        );
    }

    #[test]
    fn test_consumer_group_names() {
        assert_eq!(Tier::Critical.consumer_group(), "crawler_critical");
        assert_eq!(Tier::Normal.consumer_group(), "crawler_normal");
    }

    #[test]
    fn test_tier_parse_with_medium_alias() {
        assert_eq!("CRITICAL".parse::<Tier>().unwrap(), Tier::Critical);
        assert_eq!("high".parse::<Tier>().unwrap(), Tier::High);
        assert_eq!("NORMAL".parse::<Tier>().unwrap(), Tier::Normal);
        assert_eq!("MEDIUM".parse::<Tier>().unwrap(), Tier::Normal);
        assert!("URGENT".parse::<Tier>().is_err());
    }

    #[test]
    fn test_descriptor_defaults() {
        let desc = WorkerDescriptor::new("w1", Tier::High, 10);
        assert_eq!(desc.status, WorkerStatus::Starting);
        assert_eq!(desc.subscribed_queues.len(), 3);
        assert_eq!(desc.in_flight_count, 0);
    }
}
