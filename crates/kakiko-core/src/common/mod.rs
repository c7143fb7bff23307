//! Shared types and error definitions used across the Kakiko pipeline.
//!
//! ## Submodules
//!
//! - [`error`] - Central error type and its HTTP error body.
//! - [`types`] - Request payload and identity newtypes.

pub mod error;
pub mod types;

pub use error::*;
pub use types::*;
