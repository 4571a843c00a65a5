//! Protocol constants.
//!
//! These values define the wire format and MUST match on both peers.

// =============================================================================
// OBJECT CODEC
// =============================================================================

/// Wire code for a null object reference.
pub const NULL_CODE: i16 = 0;

/// Largest class code a single stream can assign.
///
/// Codes travel as a signed 16-bit value whose sign carries protocol state,
/// so only the magnitude range `1..=i16::MAX` is usable.
pub const MAX_CLASS_CODE: i16 = i16::MAX;

/// Maximum encoded length of a length-prefixed string (u16 prefix).
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Deepest chain of nested non-null objects one root may carry.
///
/// Decoding recurses once per level; the bound keeps a hostile datagram from
/// exhausting the stack of the task that decodes it.
pub const MAX_OBJECT_DEPTH: usize = 128;

// =============================================================================
// DATAGRAM FRAMING
// =============================================================================

/// Datagram header size (sequence + ack + timestamp + echo, 4 x u32).
pub const DATAGRAM_HEADER_SIZE: usize = 16;

/// Recommended maximum payload for a single datagram.
pub const DEFAULT_MAX_PAYLOAD: usize = 1200;

/// Default receive buffer size (largest UDP datagram).
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65535;

// =============================================================================
// DELIVERY CHANNELS
// =============================================================================

/// Channel used by unordered transports and by combined transports whose
/// inputs disagree on the ordering channel.
pub const DEFAULT_CHANNEL: u16 = 0;

// =============================================================================
// MULTIPLEXER
// =============================================================================

/// `clients_per_channel` sentinel: every peer shares the listening socket.
pub const UNBOUNDED_CLIENTS: usize = 0;

/// Default depth of the queue between receive loops and the server socket.
pub const DEFAULT_INBOUND_QUEUE: usize = 256;
