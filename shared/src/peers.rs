//! Peer connection management for the listening side of the transport
//!
//! This module tracks every remote peer the host has accepted:
//! - Peer id allocation (the host itself is peer 0, remote peers count from 1)
//! - Address lookup for routing incoming datagrams
//! - Activity tracking and timeout detection
//! - Capacity enforcement

use crate::types::PeerId;
use log::info;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A connected remote peer
#[derive(Debug)]
pub struct Peer {
    pub id: PeerId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Last time we received any datagram from this peer
    pub last_seen: Instant,
}

impl Peer {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
        }
    }

    /// Checks if the peer has been silent for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Manages all connected peers
///
/// Ids are never reused within a session, so a stale datagram from a peer
/// that already left can not be attributed to a newcomer.
#[derive(Debug)]
pub struct PeerTable {
    peers: HashMap<PeerId, Peer>,
    next_peer_id: u64,
    max_peers: usize,
    timeout: Duration,
}

impl PeerTable {
    pub fn new(max_peers: usize, timeout: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            next_peer_id: 1,
            max_peers,
            timeout,
        }
    }

    /// Attempts to register a new peer
    ///
    /// Returns None when the table is at capacity.
    pub fn add_peer(&mut self, addr: SocketAddr) -> Option<PeerId> {
        if self.peers.len() >= self.max_peers {
            return None;
        }

        let peer_id = PeerId(self.next_peer_id);
        self.next_peer_id += 1;

        info!("Peer {} connected from {}", peer_id, addr);
        self.peers.insert(peer_id, Peer::new(peer_id, addr));
        Some(peer_id)
    }

    /// Removes a peer; false if it was already gone
    pub fn remove_peer(&mut self, peer_id: &PeerId) -> bool {
        if let Some(peer) = self.peers.remove(peer_id) {
            info!("Peer {} disconnected", peer.id);
            true
        } else {
            false
        }
    }

    pub fn find_peer_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.peers
            .iter()
            .find(|(_, peer)| peer.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn addr_of(&self, peer_id: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer_id).map(|peer| peer.addr)
    }

    /// Marks a peer as active now
    pub fn touch(&mut self, peer_id: PeerId) -> bool {
        if let Some(peer) = self.peers.get_mut(&peer_id) {
            peer.last_seen = Instant::now();
            true
        } else {
            false
        }
    }

    /// Removes and returns every peer silent for longer than the timeout
    pub fn check_timeouts(&mut self) -> Vec<PeerId> {
        let timeout = self.timeout;
        let mut timed_out: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, peer)| peer.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();
        timed_out.sort();

        for peer_id in &timed_out {
            info!("Peer {} timed out", peer_id);
            self.remove_peer(peer_id);
        }

        timed_out
    }

    /// All peer ids and addresses, sorted by id
    pub fn peer_addrs(&self) -> Vec<(PeerId, SocketAddr)> {
        let mut addrs: Vec<_> = self.peers.iter().map(|(id, peer)| (*id, peer.addr)).collect();
        addrs.sort_by_key(|(id, _)| *id);
        addrs
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
