//! Core types shared by the nxo workspace: the error type, `Result` helpers
//! and the operator configuration.

pub mod config;
pub mod error;
pub mod result;

pub use config::{OperatorConfig, DEFAULT_FINALIZER};
pub use error::Error;
pub use result::{Result, ResultExt};
