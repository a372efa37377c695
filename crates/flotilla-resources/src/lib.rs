pub mod manager;
pub mod monitor;
pub mod optimizer;
pub mod probe;

pub use manager::*;
pub use monitor::*;
pub use optimizer::*;
pub use probe::*;
