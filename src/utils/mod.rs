//! Utility functions and types for the nowcasting system.

pub mod dates;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
pub use logging::init_logging;
