//! Result type definition and extension traits.
//!
//! Provides a logging combinator for Result types, enabling clean error handling
//! without unwrap/expect/panic.

use std::fmt::Display;

use crate::error::Error;

/// The standard Result type for nxo core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for any Result whose error can be displayed.
pub trait ResultExt<T, E> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self, context: &str) -> Option<T>;
}

impl<T, E: Display> ResultExt<T, E> for std::result::Result<T, E> {
    fn into_option_logged(self, context: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "{context}");
                None
            }
        }
    }
}
