pub mod config;
pub mod entities;

pub use config::*;
pub use entities::*;
pub use fabric_errors::{FabricError, FabricResult};
