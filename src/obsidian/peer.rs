//! Peer records and the round-robin registry.

use std::collections::HashMap;

use tokio::time::Instant;

use crate::codec::Address;

/// A remote node registered through the join handshake.
///
/// Peers are never removed from the registry, only marked inactive
/// when they fall silent.
#[derive(Debug, Clone)]
pub struct Peer {
    address: Address,
    registration_id: u32,
    active: bool,
    last_seen: Instant,
    next_poll_at: Instant,
    description: String,
    version: String,
}

impl Peer {
    /// Create a fresh, not-yet-confirmed peer record.
    pub fn new(address: Address, registration_id: u32) -> Self {
        let now = Instant::now();
        Self {
            address,
            registration_id,
            active: false,
            last_seen: now,
            next_poll_at: now,
            description: String::new(),
            version: String::new(),
        }
    }

    /// The peer's bus address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Identifier assigned when the peer first joined.
    pub fn registration_id(&self) -> u32 {
        self.registration_id
    }

    /// Has the peer confirmed its registration and answered recently?
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Last instant a frame from this peer was seen.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// When the next keepalive poll is due.
    pub fn next_poll_at(&self) -> Instant {
        self.next_poll_at
    }

    /// Free-form description the peer reported.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Firmware or software version the peer reported.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_seen = now;
    }

    pub(crate) fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    pub(crate) fn set_identity(&mut self, description: String, version: String) {
        self.description = description;
        self.version = version;
    }

    pub(crate) fn schedule_poll(&mut self, at: Instant) {
        self.next_poll_at = at;
    }
}

/// Registry of known peers with a wrapping round-robin cursor.
///
/// Insertion order is stable so the poll loop visits peers fairly.
#[derive(Debug, Default)]
pub(crate) struct PeerRegistry {
    peers: HashMap<Address, Peer>,
    order: Vec<Address>,
    cursor: usize,
}

impl PeerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a peer, keeping the rotation order stable.
    pub(crate) fn insert(&mut self, peer: Peer) {
        let address = peer.address().clone();
        if self.peers.insert(address.clone(), peer).is_none() {
            self.order.push(address);
        }
    }

    pub(crate) fn get(&self, address: &Address) -> Option<&Peer> {
        self.peers.get(address)
    }

    pub(crate) fn get_mut(&mut self, address: &Address) -> Option<&mut Peer> {
        self.peers.get_mut(address)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    /// Advance the cursor and return the next peer address, wrapping
    /// past the end. Returns `None` while the registry is empty.
    pub(crate) fn advance(&mut self) -> Option<Address> {
        if self.order.is_empty() {
            return None;
        }
        if self.cursor >= self.order.len() {
            self.cursor = 0;
        }
        let address = self.order[self.cursor].clone();
        self.cursor += 1;
        Some(address)
    }

    /// Owned snapshot for callers outside the lock.
    pub(crate) fn snapshot(&self) -> Vec<Peer> {
        self.order.iter().filter_map(|a| self.peers.get(a).cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(octet: u8) -> Peer {
        Peer::new(Address::new([0x10, octet]), u32::from(octet))
    }

    #[test]
    fn test_round_robin_wraps() {
        let mut registry = PeerRegistry::new();
        registry.insert(peer(1));
        registry.insert(peer(2));
        registry.insert(peer(3));

        let visits: Vec<Address> = (0..6).filter_map(|_| registry.advance()).collect();
        assert_eq!(visits[0], visits[3]);
        assert_eq!(visits[1], visits[4]);
        assert_eq!(visits[2], visits[5]);
        assert_eq!(visits[0], Address::new([0x10, 0x01]));
    }

    #[test]
    fn test_insert_during_rotation() {
        let mut registry = PeerRegistry::new();
        registry.insert(peer(1));
        registry.advance();
        registry.insert(peer(2));
        assert_eq!(registry.advance(), Some(Address::new([0x10, 0x02])));
        assert_eq!(registry.advance(), Some(Address::new([0x10, 0x01])));
    }

    #[test]
    fn test_reinsert_keeps_single_entry() {
        let mut registry = PeerRegistry::new();
        registry.insert(peer(1));
        registry.insert(peer(1));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn test_empty_registry_has_no_next() {
        let mut registry = PeerRegistry::new();
        assert_eq!(registry.advance(), None);
    }
}
