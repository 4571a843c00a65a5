//! Datagram framing.
//!
//! Every datagram starts with a fixed header the reliability layer uses to
//! detect loss and reordering and to sample round-trip time. The object
//! payload follows immediately.
//!
//! Wire format (16 bytes, big-endian):
//! ```text
//! +----------------+----------------+----------------+----------------+
//! | Sequence       | Acknowledgment | Timestamp      | Echo Timestamp |
//! | 4 bytes        | 4 bytes        | 4 bytes        | 4 bytes        |
//! +----------------+----------------+----------------+----------------+
//! ```

use thiserror::Error;

use crate::core::{ByteBuffer, DATAGRAM_HEADER_SIZE};

/// Framing fields carried by every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DatagramHeader {
    /// Sender's sequence number for this datagram.
    pub sequence: u32,
    /// Highest sequence number the sender has received from us.
    pub acknowledgment: u32,
    /// Sender's clock in ms since its connection started.
    pub timestamp: u32,
    /// Most recent `timestamp` the sender received from us (0 if none).
    pub echo_timestamp: u32,
}

impl DatagramHeader {
    /// Create a header.
    pub fn new(sequence: u32, acknowledgment: u32, timestamp: u32, echo_timestamp: u32) -> Self {
        Self {
            sequence,
            acknowledgment,
            timestamp,
            echo_timestamp,
        }
    }

    /// Serialize to bytes (16 bytes).
    pub fn to_bytes(&self) -> [u8; DATAGRAM_HEADER_SIZE] {
        let mut buf = [0u8; DATAGRAM_HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.sequence.to_be_bytes());
        buf[4..8].copy_from_slice(&self.acknowledgment.to_be_bytes());
        buf[8..12].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[12..16].copy_from_slice(&self.echo_timestamp.to_be_bytes());
        buf
    }

    /// Parse from the start of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < DATAGRAM_HEADER_SIZE {
            return Err(FrameError::TooShort {
                expected: DATAGRAM_HEADER_SIZE,
                actual: bytes.len(),
            });
        }

        let word = |at: usize| u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        Ok(Self {
            sequence: word(0),
            acknowledgment: word(4),
            timestamp: word(8),
            echo_timestamp: word(12),
        })
    }

    /// Append the header to `buf`.
    pub fn write_to(&self, buf: &mut ByteBuffer) {
        buf.put_slice(&self.to_bytes());
    }

    /// Consume a header from `buf`'s read cursor.
    ///
    /// Nothing is consumed on failure.
    pub fn read_from(buf: &mut ByteBuffer) -> Result<Self, FrameError> {
        let available = buf.remaining();
        let header = Self::from_bytes(buf.unread())?;
        buf.get_slice(DATAGRAM_HEADER_SIZE)
            .map_err(|_| FrameError::TooShort {
                expected: DATAGRAM_HEADER_SIZE,
                actual: available,
            })?;
        Ok(header)
    }
}

/// Whether sequence `a` is newer than `b`, tolerating u32 wraparound.
pub fn sequence_newer(a: u32, b: u32) -> bool {
    a != b && a.wrapping_sub(b) < (1 << 31)
}

/// Errors that can occur during frame parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Datagram is too short for a header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum expected size.
        expected: usize,
        /// Actual size received.
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = DatagramHeader::new(1, 2, 0x0A0B_0C0D, 0xFFFF_FFFF);
        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..4], &[0, 0, 0, 1]);
        assert_eq!(&bytes[8..12], &[0x0A, 0x0B, 0x0C, 0x0D]);
        assert_eq!(DatagramHeader::from_bytes(&bytes).unwrap(), header);
    }

    #[test]
    fn test_header_in_buffer() {
        let header = DatagramHeader::new(7, 6, 500, 250);
        let mut buf = ByteBuffer::new();
        header.write_to(&mut buf);
        buf.put_i16(0);

        assert_eq!(DatagramHeader::read_from(&mut buf).unwrap(), header);
        assert_eq!(buf.remaining(), 2);
    }

    #[test]
    fn test_parse_too_short() {
        let mut buf = ByteBuffer::from_slice(&[0u8; 10]);
        assert_eq!(
            DatagramHeader::read_from(&mut buf),
            Err(FrameError::TooShort {
                expected: DATAGRAM_HEADER_SIZE,
                actual: 10
            })
        );
        assert_eq!(buf.position(), 0);
    }

    #[test]
    fn test_sequence_newer() {
        assert!(sequence_newer(2, 1));
        assert!(!sequence_newer(1, 2));
        assert!(!sequence_newer(5, 5));
        // Across the wrap
        assert!(sequence_newer(0, u32::MAX));
        assert!(sequence_newer(3, u32::MAX - 3));
        assert!(!sequence_newer(u32::MAX, 0));
    }
}
