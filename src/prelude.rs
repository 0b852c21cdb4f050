// Common models
pub use ::common::{
    Disposition, Endpoint, FailureKind, Market, Settings, Task, TaskPayload, TaskResult, TaskType,
    Tier, WorkerDescriptor, WorkerStatus,
};

// Errors
pub use ::errors::{BoxError, Error, ErrorKind, Result};

pub mod engine {
    pub use ::engine::{
        ConcurrencyGate, Provider, ProviderRouter, Route, TaskExecutor, WorkerRegistry,
        WorkerSupervisor,
    };
}
pub mod downloader {
    pub use ::downloader::{FetchRequest, Fetched, ProviderAdapter, UpstreamClient};
}
pub mod queue {
    pub use ::queue::{Message, ResultPublisher, StreamConsumer};
}
pub mod resources {
    pub use ::resources::{CacheBackend, RedisBackend, ResourceCache};
}
