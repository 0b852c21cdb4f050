//! quarry: Unified entry point for the quarry workspace.
//! This crate re-exports the internal crates so consumers can
//! `use quarry::engine::...`, `quarry::common::...`, etc.

pub mod prelude;

pub mod common {
    pub use ::common::*;
}
pub mod downloader {
    pub use ::downloader::*;
}
pub mod engine {
    pub use ::engine::*;
}
pub mod errors {
    pub use ::errors::*;
}
pub mod queue {
    pub use ::queue::*;
}
pub mod resources {
    pub use ::resources::*;
}
pub mod utils {
    pub use ::utils::*;
}
