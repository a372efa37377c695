pub mod agent;
pub mod error;
pub mod resource;
pub mod task;

pub use agent::*;
pub use error::*;
pub use resource::*;
pub use task::*;
