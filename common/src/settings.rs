use crate::model::worker::Tier;
use errors::Result;
use serde::Serialize;
use std::env;

/// Hard cap on the per-request deadline, regardless of what the task asks for.
pub const MAX_REQUEST_TIMEOUT_SECS: u64 = 45;
/// Floor for the per-request deadline.
pub const MIN_REQUEST_TIMEOUT_SECS: u64 = 5;

/// Process configuration, read once at startup from the environment.
/// Secrets are not serialized so the snapshot can be logged.
#[derive(Serialize, Debug, Clone)]
pub struct Settings {
    pub worker_id: String,
    pub tier: Tier,
    pub max_concurrent_tasks: usize,
    pub task_timeout_seconds: u64,
    pub graceful_shutdown_timeout: u64,
    pub dragonfly_host: String,
    pub dragonfly_port: u16,
    #[serde(skip_serializing)]
    pub dragonfly_password: Option<String>,
    pub dragonfly_db: u16,
    pub enable_proxy_injection: bool,
    pub enable_cookie_injection: bool,
    pub no_proxy_permits: usize,
    pub proxy_permits: usize,
    pub log_level: String,
}

impl Settings {
    pub fn from_env() -> Result<Settings> {
        let settings = Settings {
            worker_id: env_string("WORKER_ID", "crawler-worker-01"),
            tier: env_string("PRIORITY_LEVEL", "NORMAL").parse()?,
            max_concurrent_tasks: env_parse("MAX_CONCURRENT_TASKS", 5usize)?,
            task_timeout_seconds: env_parse("TASK_TIMEOUT_SECONDS", 30u64)?,
            graceful_shutdown_timeout: env_parse("GRACEFUL_SHUTDOWN_TIMEOUT", 120u64)?,
            dragonfly_host: env_string("DRAGONFLY_HOST", "127.0.0.1"),
            dragonfly_port: env_parse("DRAGONFLY_PORT", 6379u16)?,
            dragonfly_password: env::var("DRAGONFLY_PASSWORD").ok().filter(|s| !s.is_empty()),
            dragonfly_db: env_parse("DRAGONFLY_DB", 0u16)?,
            enable_proxy_injection: env_bool("ENABLE_PROXY_INJECTION", true)?,
            enable_cookie_injection: env_bool("ENABLE_COOKIE_INJECTION", true)?,
            no_proxy_permits: env_parse("NO_PROXY_PERMITS", 5usize)?,
            proxy_permits: env_parse("PROXY_PERMITS", 20usize)?,
            log_level: env_string("LOG_LEVEL", "info"),
        };
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.worker_id.trim().is_empty() {
            return Err(errors::Error::invalid_config("WORKER_ID must not be empty"));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(errors::Error::invalid_config(
                "MAX_CONCURRENT_TASKS must be at least 1",
            ));
        }
        if self.no_proxy_permits == 0 || self.proxy_permits == 0 {
            return Err(errors::Error::invalid_config(
                "gate permit counts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Effective per-request deadline: the caller hint clamped to [5, 45] s.
    pub fn effective_timeout(&self, task_timeout_s: Option<u64>) -> u64 {
        task_timeout_s
            .unwrap_or(self.task_timeout_seconds)
            .clamp(MIN_REQUEST_TIMEOUT_SECS, MAX_REQUEST_TIMEOUT_SECS)
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw.trim().parse().map_err(|_| {
            errors::Error::invalid_config(format!("{name} has invalid value: {raw}"))
        }),
        _ => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => match raw.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(errors::Error::invalid_config(format!(
                "{name} has invalid boolean value: {other}"
            ))),
        },
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_settings() -> Settings {
        Settings {
            worker_id: "w1".into(),
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
        }
    }

    #[test]
    fn test_effective_timeout_clamp() {
        let settings = base_settings();
        assert_eq!(settings.effective_timeout(Some(10)), 10);
        assert_eq!(settings.effective_timeout(Some(120)), 45);
        assert_eq!(settings.effective_timeout(Some(1)), 5);
        assert_eq!(settings.effective_timeout(None), 30);
    }

    #[test]
    fn test_validate_rejects_zero_slots() {
        let mut settings = base_settings();
        settings.max_concurrent_tasks = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_worker_id() {
        let mut settings = base_settings();
        settings.worker_id = "  ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_password_not_serialized() {
        let mut settings = base_settings();
        settings.dragonfly_password = Some("secret".into());
        let snapshot = serde_json::to_string(&settings).unwrap();
        assert!(!snapshot.contains("secret"));
    }
}
