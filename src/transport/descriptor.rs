//! Delivery descriptors.
//!
//! A [`Transport`] names the guarantees a message needs: reliability,
//! ordering, and for ordered delivery the channel ordering applies within.
//! Instances are interned, so `&'static Transport` identity equals value
//! equality and descriptors can be compared by pointer.

use std::collections::HashMap;
use std::fmt;
use std::sync::{LazyLock, PoisonError, RwLock};

use crate::core::DEFAULT_CHANNEL;

/// Reliability and ordering classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TransportType {
    /// Fire and forget, any order.
    UnreliableUnordered = 0x00,
    /// May drop, never delivers older after newer within a channel.
    UnreliableOrdered = 0x01,
    /// Always delivered, any order.
    ReliableUnordered = 0x02,
    /// Always delivered, in send order within a channel.
    ReliableOrdered = 0x03,
}

impl TransportType {
    /// All transport types, weakest first.
    pub const ALL: [TransportType; 4] = [
        TransportType::UnreliableUnordered,
        TransportType::UnreliableOrdered,
        TransportType::ReliableUnordered,
        TransportType::ReliableOrdered,
    ];

    /// Build a type from its two guarantee bits.
    pub fn from_guarantees(reliable: bool, ordered: bool) -> Self {
        match (reliable, ordered) {
            (false, false) => Self::UnreliableUnordered,
            (false, true) => Self::UnreliableOrdered,
            (true, false) => Self::ReliableUnordered,
            (true, true) => Self::ReliableOrdered,
        }
    }

    /// Parse a type from its byte representation.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::UnreliableUnordered),
            0x01 => Some(Self::UnreliableOrdered),
            0x02 => Some(Self::ReliableUnordered),
            0x03 => Some(Self::ReliableOrdered),
            _ => None,
        }
    }

    /// Convert to its byte representation.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Whether delivery is guaranteed.
    pub fn is_reliable(self) -> bool {
        matches!(self, Self::ReliableUnordered | Self::ReliableOrdered)
    }

    /// Whether delivery respects send order.
    pub fn is_ordered(self) -> bool {
        matches!(self, Self::UnreliableOrdered | Self::ReliableOrdered)
    }
}

/// Interned delivery descriptor.
///
/// Obtain instances with [`Transport::get`]; they live for the whole process.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Transport {
    kind: TransportType,
    channel: u16,
}

static UNRELIABLE_UNORDERED: Transport = Transport {
    kind: TransportType::UnreliableUnordered,
    channel: DEFAULT_CHANNEL,
};

static RELIABLE_UNORDERED: Transport = Transport {
    kind: TransportType::ReliableUnordered,
    channel: DEFAULT_CHANNEL,
};

type OrderedKey = (TransportType, u16);

/// Ordered descriptors, created on first request and never freed.
static ORDERED: LazyLock<RwLock<HashMap<OrderedKey, &'static Transport>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

impl Transport {
    /// Canonical descriptor for `kind` on `channel`.
    ///
    /// Unordered types ignore `channel`: every request returns the same
    /// instance, whose channel is [`DEFAULT_CHANNEL`].
    pub fn get(kind: TransportType, channel: u16) -> &'static Transport {
        match kind {
            TransportType::UnreliableUnordered => &UNRELIABLE_UNORDERED,
            TransportType::ReliableUnordered => &RELIABLE_UNORDERED,
            TransportType::UnreliableOrdered | TransportType::ReliableOrdered => {
                Self::get_ordered(kind, channel)
            }
        }
    }

    fn get_ordered(kind: TransportType, channel: u16) -> &'static Transport {
        let key = (kind, channel);
        let interned = ORDERED
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .copied();
        if let Some(transport) = interned {
            return transport;
        }

        // Entries are only ever inserted, so a poisoned map is still consistent.
        let mut map = ORDERED.write().unwrap_or_else(PoisonError::into_inner);
        *map.entry(key).or_insert_with(|| {
            let leaked: &'static Transport = Box::leak(Box::new(Transport { kind, channel }));
            leaked
        })
    }

    /// Fire-and-forget descriptor.
    pub fn unreliable() -> &'static Transport {
        &UNRELIABLE_UNORDERED
    }

    /// Guaranteed, unordered descriptor.
    pub fn reliable() -> &'static Transport {
        &RELIABLE_UNORDERED
    }

    /// Guaranteed, ordered descriptor on `channel`.
    pub fn reliable_ordered(channel: u16) -> &'static Transport {
        Self::get(TransportType::ReliableOrdered, channel)
    }

    /// Unreliable, ordered descriptor on `channel`.
    pub fn sequenced(channel: u16) -> &'static Transport {
        Self::get(TransportType::UnreliableOrdered, channel)
    }

    /// Reliability and ordering class.
    pub fn kind(&self) -> TransportType {
        self.kind
    }

    /// Ordering channel ([`DEFAULT_CHANNEL`] for unordered descriptors).
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Whether delivery is guaranteed.
    pub fn is_reliable(&self) -> bool {
        self.kind.is_reliable()
    }

    /// Whether delivery respects send order.
    pub fn is_ordered(&self) -> bool {
        self.kind.is_ordered()
    }

    /// Weakest descriptor that satisfies both `self` and `other`.
    ///
    /// Reliability and ordering are each the union of the inputs. The channel
    /// comes from whichever inputs are ordered; two ordered inputs on
    /// different channels fall back to [`DEFAULT_CHANNEL`].
    pub fn combine(&self, other: &Transport) -> &'static Transport {
        let kind = TransportType::from_guarantees(
            self.is_reliable() || other.is_reliable(),
            self.is_ordered() || other.is_ordered(),
        );
        let channel = match (self.is_ordered(), other.is_ordered()) {
            (true, true) if self.channel == other.channel => self.channel,
            (true, false) => self.channel,
            (false, true) => other.channel,
            _ => DEFAULT_CHANNEL,
        };
        Self::get(kind, channel)
    }

    /// Whether `self` gives at least the guarantees of `other`.
    pub fn satisfies(&self, other: &Transport) -> bool {
        (self.is_reliable() || !other.is_reliable()) && (self.is_ordered() || !other.is_ordered())
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reliability = if self.is_reliable() { "reliable" } else { "unreliable" };
        if self.is_ordered() {
            write!(f, "{reliability}-ordered#{}", self.channel)
        } else {
            write!(f, "{reliability}-unordered")
        }
    }
}
