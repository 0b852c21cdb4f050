use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Task,
    Cookie,
    Proxy,
    Fetch,
    Provider,
    Queue,
    Cache,
    Service,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Task => write!(f, "task"),
            ErrorKind::Cookie => write!(f, "cookie"),
            ErrorKind::Proxy => write!(f, "proxy"),
            ErrorKind::Fetch => write!(f, "fetch"),
            ErrorKind::Provider => write!(f, "provider"),
            ErrorKind::Queue => write!(f, "queue"),
            ErrorKind::Cache => write!(f, "cache"),
            ErrorKind::Service => write!(f, "service"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
    pub message: Option<String>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: None,
            }),
        }
    }

    pub fn with_message<E>(kind: ErrorKind, message: String, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
                message: Some(message),
            }),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.inner.kind
    }

    fn downcast_source<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner
            .source
            .as_ref()
            .and_then(|s| s.downcast_ref::<E>())
    }

    pub fn is_task(&self) -> bool {
        self.inner.kind == ErrorKind::Task
    }

    pub fn is_cookie(&self) -> bool {
        self.inner.kind == ErrorKind::Cookie
    }

    pub fn is_proxy(&self) -> bool {
        self.inner.kind == ErrorKind::Proxy
    }

    pub fn is_provider(&self) -> bool {
        self.inner.kind == ErrorKind::Provider
    }

    pub fn is_queue(&self) -> bool {
        self.inner.kind == ErrorKind::Queue
    }

    pub fn is_invalid_task(&self) -> bool {
        matches!(self.downcast_source::<TaskError>(), Some(TaskError::Invalid(_)))
    }

    pub fn is_unsupported_task(&self) -> bool {
        matches!(
            self.downcast_source::<TaskError>(),
            Some(TaskError::Unsupported(_))
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self.downcast_source::<FetchError>(), Some(FetchError::Timeout))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.downcast_source::<ServiceError>(),
            Some(ServiceError::Cancelled)
        )
    }

    /// HTTP status carried by a non-2xx upstream response, if any.
    pub fn status(&self) -> Option<u16> {
        match self.downcast_source::<FetchError>() {
            Some(FetchError::Status(code)) => Some(*code),
            _ => None,
        }
    }

    /// Upstream error description for provider-level failures.
    pub fn provider_description(&self) -> Option<&str> {
        match self.downcast_source::<ProviderError>() {
            Some(ProviderError::Api { description, .. }) => Some(description.as_str()),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("quarry::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref message) = self.inner.message {
            f.field("message", message);
        }
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref message) = self.inner.message {
            write!(f, "{} error: {}", self.inner.kind, message)?;
        } else {
            write!(f, "{} error", self.inner.kind)?;
        }

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<TaskError> for Error {
    fn from(err: TaskError) -> Self {
        Error::new(ErrorKind::Task, Some(err))
    }
}

impl From<CookieError> for Error {
    fn from(err: CookieError) -> Self {
        Error::new(ErrorKind::Cookie, Some(err))
    }
}

impl From<ProxyError> for Error {
    fn from(err: ProxyError) -> Self {
        Error::new(ErrorKind::Proxy, Some(err))
    }
}

impl From<FetchError> for Error {
    fn from(err: FetchError) -> Self {
        Error::new(ErrorKind::Fetch, Some(err))
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        Error::new(ErrorKind::Provider, Some(err))
    }
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        Error::new(ErrorKind::Queue, Some(err))
    }
}

impl From<CacheError> for Error {
    fn from(err: CacheError) -> Self {
        Error::new(ErrorKind::Cache, Some(err))
    }
}

impl From<ServiceError> for Error {
    fn from(err: ServiceError) -> Self {
        Error::new(ErrorKind::Service, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task: {0}")]
    Invalid(String),
    #[error("unsupported task: {0}")]
    Unsupported(String),
    #[error("decode failed: {0}")]
    DecodeFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum CookieError {
    #[error("cookie not found: {0}")]
    NotFound(String),
    #[error("cookie load failed: {0}")]
    LoadFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy list load failed: {0}")]
    LoadFailed(#[source] BoxError),
    #[error("invalid proxy: {0}")]
    Invalid(#[source] BoxError),
    #[error("proxy connection failed: {0}")]
    ConnectFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("timeout")]
    Timeout,
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid method: {0}")]
    InvalidMethod(#[source] BoxError),
    #[error("client build failed: {0}")]
    BuildFailed(#[source] BoxError),
    #[error("network error: {0}")]
    Network(#[source] BoxError),
    #[error("http status {0}")]
    Status(u16),
    #[error("body decode failed: {0}")]
    Decode(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("upstream error {code}: {description}")]
    Api { code: i64, description: String },
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("connection failed")]
    ConnectionFailed,
    #[error("group create failed: {0}")]
    GroupCreateFailed(#[source] BoxError),
    #[error("read failed: {0}")]
    ReadFailed(#[source] BoxError),
    #[error("push failed: {0}")]
    PushFailed(#[source] BoxError),
    #[error("ack failed: {0}")]
    AckFailed(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("pool error: {0}")]
    Pool(String),
    #[error("redis error: {0}")]
    Redis(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("connection failed")]
    ConnectionFailed,
    #[error("cancelled")]
    Cancelled,
    #[error("internal error: {0}")]
    Internal(#[source] BoxError),
}

impl Error {
    pub fn fetch_timeout() -> Self {
        Error::from(FetchError::Timeout)
    }

    pub fn cancelled() -> Self {
        Error::from(ServiceError::Cancelled)
    }

    pub fn invalid_task(reason: impl Into<String>) -> Self {
        Error::from(TaskError::Invalid(reason.into()))
    }

    pub fn unsupported_task(reason: impl Into<String>) -> Self {
        Error::from(TaskError::Unsupported(reason.into()))
    }

    pub fn missing_cookie(cookie_id: impl Into<String>) -> Self {
        Error::from(CookieError::NotFound(cookie_id.into()))
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Error::from(ServiceError::InvalidConfig(reason.into()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Error::fetch_timeout(),
            std::io::ErrorKind::ConnectionRefused => Error::from(ServiceError::ConnectionFailed),
            _ => Error::new(ErrorKind::Service, Some(err)),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::from(TaskError::DecodeFailed(err.into()))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::fetch_timeout()
        } else if err.is_builder() {
            Error::from(FetchError::BuildFailed(err.into()))
        } else if err.is_decode() {
            Error::from(FetchError::Decode(err.into()))
        } else {
            Error::from(FetchError::Network(err.into()))
        }
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Error::from(CacheError::Pool(err.to_string()))
    }
}

impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        Error::from(CacheError::Redis(err.into()))
    }
}
