pub mod config;
pub mod coordinator;
pub mod fleet;
pub mod queue;
pub mod runtime;
pub mod snapshot;
pub mod strategy;

pub use config::*;
pub use coordinator::*;
pub use queue::*;
pub use snapshot::*;
pub use strategy::*;
