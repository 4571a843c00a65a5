//! objcast - Transport Layer
//!
//! - **Delivery descriptors**: interned [`Transport`] values and their join
//! - **Framing**: the 16-byte [`DatagramHeader`] in front of every payload
//! - **Link state**: sequence/ack bookkeeping and RTT via [`EchoClock`]
//! - **Logical connections**: one codec pair per peer ([`LogicalConnection`])
//! - **Async sockets**: [`DatagramSocket`] wrapper for tokio UDP
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │            Application                  │
//! ├─────────────────────────────────────────┤
//! │         Class-Cache Codec               │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   header, link state, connections       │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Only the socket wrapper needs the `transport` feature.

mod connection;
mod descriptor;
mod error;
mod header;
#[cfg(feature = "transport")]
mod socket;
mod timing;

pub use connection::*;
pub use descriptor::{Transport, TransportType};
pub use error::*;
pub use header::{DatagramHeader, FrameError, sequence_newer};
#[cfg(feature = "transport")]
pub use socket::*;
pub use timing::{EchoClock, RttEstimator, constants as timing_constants};
