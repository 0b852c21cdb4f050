pub mod error;

pub use error::{
    BoxError, CacheError, CookieError, Error, ErrorKind, FetchError, ProviderError, ProxyError,
    QueueError, Result, ServiceError, TaskError,
};
