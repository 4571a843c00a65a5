//! objcast - Server
//!
//! Connection multiplexing over one or more UDP sockets.

mod pool;
#[allow(clippy::module_inception)]
mod server;

pub use pool::{ChannelPolicy, ChannelPool};
pub use server::*;
