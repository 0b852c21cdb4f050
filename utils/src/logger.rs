use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);
// Appender guards must outlive the process or buffered lines are lost.
static FILE_GUARDS: Mutex<Vec<WorkerGuard>> = Mutex::new(Vec::new());

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub level: String,
    pub file: Option<PathBuf>,
    pub rotation: Option<String>,
}

impl LoggerConfig {
    pub fn new(level: impl AsRef<str>) -> Self {
        Self {
            level: level.as_ref().into(),
            file: None,
            rotation: None,
        }
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn init(self) -> Result<(), Box<dyn std::error::Error>> {
        init_logger(self)
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::new("info")
    }
}

pub fn init_logger(config: LoggerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(());
    }

    // Route `log` macro events (the bulk of this workspace) into tracing.
    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(normalize_level(&config.level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    let registry = tracing_subscriber::registry().with(filter).with(console_layer);

    if let Some(path) = &config.file {
        let rotation = match config.rotation.as_deref() {
            Some("hourly") => Rotation::HOURLY,
            Some("never") => Rotation::NEVER,
            Some("minutely") => Rotation::MINUTELY,
            _ => Rotation::DAILY,
        };
        let (writer, guard) = file_writer(path, rotation)?;
        if let Ok(mut guards) = FILE_GUARDS.lock() {
            guards.push(guard);
        }
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(writer)
            .with_ansi(false);
        let _ = registry.with(file_layer).try_init();
    } else {
        let _ = registry.try_init();
    }

    Ok(())
}

fn file_writer(
    path: &Path,
    rotation: Rotation,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), Box<dyn std::error::Error>>
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file_prefix = path.file_name().and_then(|n| n.to_str()).unwrap_or("worker");
    let appender = tracing_appender::rolling::Builder::new()
        .rotation(rotation)
        .filename_prefix(file_prefix)
        .filename_suffix("log")
        .build(path.parent().unwrap_or_else(|| Path::new(".")))?;
    Ok(tracing_appender::non_blocking(appender))
}

fn normalize_level(level: &str) -> String {
    let trimmed = level.trim();
    if trimmed.contains('=') || trimmed.contains(',') {
        return trimmed.to_string();
    }
    match trimmed.to_lowercase().as_str() {
        "all" => "trace".to_string(),
        "fatal" => "error".to_string(),
        "warning" => "warn".to_string(),
        other => other.to_string(),
    }
}
