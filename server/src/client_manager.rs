//! Transport-level peer registry for the relay
//!
//! This module tracks who is talking to the relay, independent of any room:
//! - Peer identity (the id handed out on first contact) and its UDP address
//! - Which room, if any, the peer currently belongs to
//! - Transport liveness, used to drop peers that vanished without leaving
//!
//! Connection quality (ping, jitter, lag reports) is tracked per room by the
//! connection monitor; this registry only answers "who is at this address".

use log::info;
use shared::{PeerId, RoomId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// A peer known to the relay
#[derive(Debug)]
pub struct Client {
    /// Unique peer identifier assigned by the relay
    pub id: PeerId,
    /// Network address for sending responses
    pub addr: SocketAddr,
    /// Display name from the last `JoinRoom`
    pub name: String,
    /// Room the peer is in, `None` between rooms
    pub room: Option<RoomId>,
    /// Last time we received any packet from this peer
    pub last_seen: Instant,
}

impl Client {
    pub fn new(id: PeerId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            name: String::new(),
            room: None,
            last_seen: Instant::now(),
        }
    }

    /// Marks the peer as alive right now.
    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    /// Returns true if nothing arrived from this peer within `timeout`.
    pub fn is_timed_out(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

/// Every peer the relay currently knows about
///
/// Enforces the relay-wide capacity limit and hands out monotonically
/// increasing peer ids, so an id is never reused while the process lives.
pub struct ClientManager {
    /// Connected peers indexed by their id
    clients: HashMap<PeerId, Client>,
    /// Next id for a new address
    next_client_id: PeerId,
    /// Maximum number of concurrent peers
    max_clients: usize,
}

impl ClientManager {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_client_id: 1,
            max_clients,
        }
    }

    /// Registers a new address.
    ///
    /// Returns `None` when the relay is at capacity.
    pub fn add_client(&mut self, addr: SocketAddr) -> Option<PeerId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }

        let client_id = self.next_client_id;
        self.next_client_id += 1;

        info!("Peer {} connected from {}", client_id, addr);
        self.clients.insert(client_id, Client::new(client_id, addr));

        Some(client_id)
    }

    /// Looks up the peer at `addr`, registering it on first contact.
    pub fn get_or_add(&mut self, addr: SocketAddr) -> Option<PeerId> {
        match self.find_client_by_addr(addr) {
            Some(id) => {
                self.touch(id);
                Some(id)
            }
            None => self.add_client(addr),
        }
    }

    /// Forgets a peer. Returns the room it was in, if any.
    pub fn remove_client(&mut self, client_id: &PeerId) -> Option<Option<RoomId>> {
        self.clients.remove(client_id).map(|client| {
            info!("Peer {} disconnected", client.id);
            client.room
        })
    }

    pub fn find_client_by_addr(&self, addr: SocketAddr) -> Option<PeerId> {
        self.clients
            .iter()
            .find(|(_, client)| client.addr == addr)
            .map(|(id, _)| *id)
    }

    pub fn get(&self, client_id: PeerId) -> Option<&Client> {
        self.clients.get(&client_id)
    }

    pub fn addr_of(&self, client_id: PeerId) -> Option<SocketAddr> {
        self.clients.get(&client_id).map(|client| client.addr)
    }

    pub fn room_of(&self, client_id: PeerId) -> Option<RoomId> {
        self.clients.get(&client_id).and_then(|client| client.room)
    }

    /// Records room membership. Returns false for unknown peers.
    pub fn set_room(&mut self, client_id: PeerId, room: Option<RoomId>, name: Option<&str>) -> bool {
        match self.clients.get_mut(&client_id) {
            Some(client) => {
                client.room = room;
                if let Some(name) = name {
                    client.name = name.to_string();
                }
                true
            }
            None => false,
        }
    }

    pub fn touch(&mut self, client_id: PeerId) {
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.touch();
        }
    }

    /// Removes peers silent for longer than `timeout`.
    ///
    /// Returns each removed peer with the room it was in, so the caller can
    /// run the room's leave logic.
    pub fn check_timeouts(&mut self, timeout: Duration) -> Vec<(PeerId, Option<RoomId>)> {
        let timed_out: Vec<PeerId> = self
            .clients
            .iter()
            .filter(|(_, client)| client.is_timed_out(timeout))
            .map(|(id, _)| *id)
            .collect();

        timed_out
            .into_iter()
            .filter_map(|id| self.remove_client(&id).map(|room| (id, room)))
            .collect()
    }

    /// Returns the number of currently connected peers
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
