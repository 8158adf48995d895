use log::info;
use shared::{Packet, PeerId};
use std::collections::BTreeSet;

/// Barrier run after a handover: collects `PlayerReady` acknowledgments until
/// everyone connected has confirmed or the timeout fires.
///
/// The timeout itself is armed by the transfer coordinator; this type only
/// tracks who is ready.
#[derive(Debug, Clone, Default)]
pub struct ReadyCheckCoordinator {
    ready: BTreeSet<PeerId>,
    active: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadyUpdate {
    pub packet: Packet,
    pub complete: bool,
}

impl ReadyCheckCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a fresh check and returns the announcement.
    pub fn start(&mut self, timeout_ms: u64) -> Packet {
        self.ready.clear();
        self.active = true;
        Packet::ReadyCheckStarted {
            timeout_seconds: timeout_ms / 1000,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Records a ready mark. Marks outside an active check are ignored.
    pub fn mark_ready(&mut self, peer: PeerId, total_players: usize) -> Option<ReadyUpdate> {
        if !self.active {
            return None;
        }
        self.ready.insert(peer);
        info!(
            "Peer {peer} ready ({}/{total_players})",
            self.ready.len()
        );
        Some(ReadyUpdate {
            packet: Packet::PlayerReadyUpdate {
                player_id: peer,
                ready_count: self.ready.len(),
                total_players,
            },
            complete: self.is_complete(total_players),
        })
    }

    /// Drops a departed peer's mark. Returns whether the check is now complete.
    pub fn remove_peer(&mut self, peer: PeerId, total_players: usize) -> bool {
        self.ready.remove(&peer);
        self.is_complete(total_players)
    }

    pub fn is_complete(&self, total_players: usize) -> bool {
        self.active && self.ready.len() >= total_players
    }

    /// Closes the check and returns the summary, even if nobody answered.
    pub fn finish(&mut self) -> Packet {
        self.active = false;
        Packet::ReadyCheckFinished {
            ready_players: self.ready.iter().copied().collect(),
        }
    }

    pub fn reset(&mut self) {
        self.ready.clear();
        self.active = false;
    }

    pub fn ready_players(&self) -> Vec<PeerId> {
        self.ready.iter().copied().collect()
    }
}
