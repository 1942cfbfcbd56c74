pub mod transport;
pub mod types;

pub use transport::*;
pub use types::*;
