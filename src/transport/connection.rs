//! Per-peer connection state.
//!
//! A [`LogicalConnection`] is what the multiplexer hands out for each peer:
//! one codec pair plus the [`LinkState`] that fills and reads datagram
//! headers. It owns no socket; whoever owns the physical socket moves bytes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tracing::trace;

use super::error::{TransportError, TransportResult};
use super::header::{DatagramHeader, sequence_newer};
use super::timing::{EchoClock, RttEstimator};
use crate::codec::{Checkpoint, ObjectReader, ObjectWriter, TypeRegistry};
use crate::core::{ByteBuffer, DATAGRAM_HEADER_SIZE, DEFAULT_MAX_PAYLOAD, Streamable};

/// How a received header relates to what the link has seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// First datagram from the peer; seeds the link.
    First,
    /// Newer than anything received so far.
    Newer,
    /// Duplicate or reordered behind a newer datagram.
    Stale,
}

/// Header bookkeeping for one peer.
#[derive(Debug, Clone)]
pub struct LinkState {
    next_sequence: u32,
    remote_sequence: Option<u32>,
    clock: EchoClock,
    rtt: RttEstimator,
    last_received: Option<Instant>,
}

impl Default for LinkState {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkState {
    /// Create link state with no traffic yet.
    pub fn new() -> Self {
        Self {
            next_sequence: 1,
            remote_sequence: None,
            clock: EchoClock::new(),
            rtt: RttEstimator::new(),
            last_received: None,
        }
    }

    /// Header for the next outgoing datagram.
    pub fn next_header(&mut self) -> DatagramHeader {
        let sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        DatagramHeader {
            sequence,
            acknowledgment: self.remote_sequence.unwrap_or(0),
            timestamp: self.clock.now(),
            echo_timestamp: self.clock.echo(),
        }
    }

    fn rewind(&mut self, sequence: u32) {
        self.next_sequence = sequence;
    }

    /// Account for a received header.
    pub fn on_header(&mut self, header: &DatagramHeader) -> Arrival {
        self.last_received = Some(Instant::now());
        let arrival = match self.remote_sequence {
            None => Arrival::First,
            Some(highest) if sequence_newer(header.sequence, highest) => Arrival::Newer,
            Some(_) => return Arrival::Stale,
        };

        self.remote_sequence = Some(header.sequence);
        if let Some(sample) = self
            .clock
            .on_receive(header.timestamp, header.echo_timestamp)
        {
            self.rtt.observe(sample);
        }
        arrival
    }

    /// Sequence the next send will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    /// Highest sequence received from the peer.
    pub fn remote_sequence(&self) -> Option<u32> {
        self.remote_sequence
    }

    /// RTT estimate fed by echoed timestamps.
    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    /// When the last header arrived.
    pub fn last_received(&self) -> Option<Instant> {
        self.last_received
    }
}

/// A decoded datagram.
#[derive(Debug)]
pub struct Received {
    /// Header as sent by the peer.
    pub header: DatagramHeader,
    /// Ordering relative to earlier datagrams.
    pub arrival: Arrival,
    /// Root object, `None` for an explicit null.
    pub object: Option<Box<dyn Streamable>>,
}

/// What the last [`LogicalConnection::encode`] changed, until it is sent.
#[derive(Debug, Clone, Copy)]
struct Unsent {
    sequence: u32,
    checkpoint: Checkpoint,
}

/// Per-peer session over a possibly shared physical socket.
#[derive(Debug)]
pub struct LogicalConnection {
    peer: SocketAddr,
    channel: usize,
    max_datagram_size: usize,
    link: LinkState,
    writer: ObjectWriter,
    reader: ObjectReader,
    unsent: Option<Unsent>,
}

impl LogicalConnection {
    /// Create a connection to `peer` on physical channel `channel`.
    pub fn new(peer: SocketAddr, channel: usize, registry: Arc<TypeRegistry>) -> Self {
        Self {
            peer,
            channel,
            max_datagram_size: DEFAULT_MAX_PAYLOAD + DATAGRAM_HEADER_SIZE,
            link: LinkState::new(),
            writer: ObjectWriter::new(Arc::clone(&registry)),
            reader: ObjectReader::new(registry),
            unsent: None,
        }
    }

    /// Limit encoded datagrams to `payload` bytes after the header.
    pub fn with_max_payload_size(mut self, payload: usize) -> Self {
        self.max_datagram_size = payload + DATAGRAM_HEADER_SIZE;
        self
    }

    /// Encode `obj` behind a fresh header into `buf`.
    ///
    /// `buf` is cleared first; its contents are the datagram to send. A
    /// datagram over the size limit is rejected with nothing recorded, as if
    /// it had never been encoded. If sending fails afterwards, call
    /// [`cancel_encode`](Self::cancel_encode).
    pub fn encode(
        &mut self,
        obj: Option<&dyn Streamable>,
        buf: &mut ByteBuffer,
    ) -> TransportResult<DatagramHeader> {
        buf.clear();
        let checkpoint = self.writer.checkpoint();
        let header = self.link.next_header();
        self.unsent = Some(Unsent {
            sequence: header.sequence,
            checkpoint,
        });
        header.write_to(buf);
        self.writer.write_object(obj, buf)?;

        if buf.len() > self.max_datagram_size {
            self.cancel_encode();
            return Err(TransportError::Oversize {
                len: buf.len(),
                limit: self.max_datagram_size,
            });
        }
        trace!(peer = %self.peer, seq = header.sequence, len = buf.len(), "encoded datagram");
        Ok(header)
    }

    /// Forget the last encoded datagram because it never left the host.
    ///
    /// Its sequence number is reused and metadata it carried goes out again
    /// with the next datagram. Does nothing if there is no such datagram.
    pub fn cancel_encode(&mut self) {
        if let Some(unsent) = self.unsent.take() {
            self.link.rewind(unsent.sequence);
            self.writer.rollback(unsent.checkpoint);
        }
    }

    /// Decode one datagram loaded in `buf`.
    ///
    /// The header only counts toward sequencing and RTT once the object
    /// decodes.
    pub fn decode(&mut self, buf: &mut ByteBuffer) -> TransportResult<Received> {
        let header = DatagramHeader::read_from(buf)?;
        let object = self.reader.read_object(buf)?;
        let arrival = self.link.on_header(&header);
        if buf.remaining() > 0 {
            trace!(peer = %self.peer, trailing = buf.remaining(), "ignoring trailing bytes");
        }
        Ok(Received {
            header,
            arrival,
            object,
        })
    }

    /// Peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Re-target the connection, keeping codec state.
    pub fn set_peer(&mut self, peer: SocketAddr) {
        self.peer = peer;
    }

    /// Largest datagram [`encode`](Self::encode) produces, header included.
    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Physical channel index (0 is the primary socket).
    pub fn channel(&self) -> usize {
        self.channel
    }

    /// Header bookkeeping.
    pub fn link(&self) -> &LinkState {
        &self.link
    }

    /// Outbound codec.
    pub fn writer(&self) -> &ObjectWriter {
        &self.writer
    }

    /// Outbound codec, for round management.
    pub fn writer_mut(&mut self) -> &mut ObjectWriter {
        &mut self.writer
    }

    /// Inbound codec.
    pub fn reader(&self) -> &ObjectReader {
        &self.reader
    }

    /// Whether either codec direction has failed.
    pub fn is_failed(&self) -> bool {
        self.writer.is_failed() || self.reader.is_failed()
    }
}
