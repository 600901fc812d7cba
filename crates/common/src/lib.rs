//! Common types for the identity CLI workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
