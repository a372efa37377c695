pub mod config;
pub mod controller;
pub mod event;
pub mod manager;
pub mod stability;

pub use config::*;
pub use controller::*;
pub use event::*;
pub use manager::*;
pub use stability::*;
