pub mod cost;
pub mod data;
pub mod report;
pub mod robot;
pub mod runner;
pub mod types;
pub mod utils;

// Re-export commonly used types and functions for convenience
pub use cost::*;
pub use data::*;
pub use report::*;
pub use robot::*;
pub use runner::*;
pub use types::*;
pub use utils::*;
