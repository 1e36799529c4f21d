//! Utility types and functions.
//!
//! - [`Error`] / [`Result`] / [`CompileError`] - Error handling
//! - Math type re-exports from glam plus ray/box helpers

mod error;
mod math;

pub use error::*;
pub use math::*;
