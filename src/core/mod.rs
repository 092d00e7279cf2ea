//! Core identifiers, constants, and error types.
//!
//! This module has no I/O dependencies. Everything else in the crate builds on
//! the types defined here.

mod constants;
mod error;
mod types;

pub use constants::*;
pub use error::*;
pub use types::*;

pub(crate) use error::dfatal;
