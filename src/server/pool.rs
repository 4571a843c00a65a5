//! Peer-to-channel assignment.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::core::UNBOUNDED_CLIENTS;

/// How a server spreads peers over physical sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPolicy {
    /// Every peer shares the primary socket.
    Shared,
    /// Each peer gets its own socket, connected to it.
    Dedicated,
    /// Peers fill pool sockets of the given capacity, first fit.
    Pooled(usize),
}

impl ChannelPolicy {
    /// Policy for a `clients_per_channel` setting.
    ///
    /// [`UNBOUNDED_CLIENTS`] selects [`Shared`](Self::Shared).
    pub fn from_clients_per_channel(clients: usize) -> Self {
        match clients {
            UNBOUNDED_CLIENTS => Self::Shared,
            1 => Self::Dedicated,
            n => Self::Pooled(n),
        }
    }
}

/// Bounded-occupancy slots for pooled channels.
///
/// Slots are only ever appended; a slot emptied by releases stays open and is
/// refilled first.
#[derive(Debug, Clone)]
pub struct ChannelPool {
    capacity: usize,
    slots: Vec<usize>,
    members: HashMap<SocketAddr, usize>,
}

impl ChannelPool {
    /// Create a pool whose slots hold at most `capacity` peers.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Vec::new(),
            members: HashMap::new(),
        }
    }

    /// Place `peer` in the first slot with room.
    ///
    /// Returns `None` when every slot is full; open a channel and call
    /// [`add_slot`](Self::add_slot). A peer already in the pool keeps its slot.
    pub fn assign(&mut self, peer: SocketAddr) -> Option<usize> {
        if let Some(&slot) = self.members.get(&peer) {
            return Some(slot);
        }
        let slot = self.slots.iter().position(|&n| n < self.capacity)?;
        self.slots[slot] += 1;
        self.members.insert(peer, slot);
        Some(slot)
    }

    /// Open a new slot holding `peer`.
    pub fn add_slot(&mut self, peer: SocketAddr) -> usize {
        let slot = self.slots.len();
        self.slots.push(1);
        self.members.insert(peer, slot);
        slot
    }

    /// Remove `peer`, returning the slot it occupied.
    pub fn release(&mut self, peer: SocketAddr) -> Option<usize> {
        let slot = self.members.remove(&peer)?;
        self.slots[slot] -= 1;
        Some(slot)
    }

    /// Slot holding `peer`.
    pub fn slot_of(&self, peer: SocketAddr) -> Option<usize> {
        self.members.get(&peer).copied()
    }

    /// Number of slots opened so far.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Peers in `slot`.
    pub fn occupancy(&self, slot: usize) -> usize {
        self.slots.get(slot).copied().unwrap_or(0)
    }

    /// Maximum peers per slot.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
