pub mod result;
pub mod task;
pub mod worker;
