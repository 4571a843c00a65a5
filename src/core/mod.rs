//! objcast - Core traits, buffers, constants and error types.
//!
//! This module has no networking dependencies. It defines the byte buffer
//! every layer writes into and the traits application types implement to
//! travel through the object codec.

mod buffer;
mod constants;
mod error;
mod traits;

pub use buffer::*;
pub use constants::*;
pub use error::*;
pub use traits::*;
