//! objcast - Client
//!
//! A single logical connection to a server socket.

#[allow(clippy::module_inception)]
mod client;

pub use client::*;
