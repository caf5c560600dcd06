pub mod cluster;
pub mod config;
pub mod error;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::RosterConfig;
pub use error::{Result, RosterError};
