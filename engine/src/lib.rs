pub mod executor;
pub mod gate;
pub mod providers;
pub mod registry;
pub mod router;
pub mod worker;

pub use executor::TaskExecutor;
pub use gate::{ConcurrencyGate, GatePermit};
pub use registry::WorkerRegistry;
pub use router::{Provider, ProviderRouter, Route};
pub use worker::WorkerSupervisor;
