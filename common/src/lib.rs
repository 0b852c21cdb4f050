pub mod model;
pub mod settings;

pub use model::result::{Disposition, FailureKind, TaskResult};
pub use model::task::{Endpoint, Market, Task, TaskPayload, TaskType};
pub use model::worker::{Tier, WorkerDescriptor, WorkerStatus};
pub use settings::Settings;
