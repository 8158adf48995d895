//! Per-room match context on the relay
//!
//! A [`MatchContext`] owns everything the relay knows about one room: the
//! roster, connection health, lag votes and the authority transfer session.
//! The network layer feeds it packets and clock ticks and drains the packets
//! it wants delivered; the context itself never touches a socket.

use crate::config::MatchConfig;
use crate::connection_monitor::ConnectionMonitor;
use crate::error::MatchError;
use crate::host_scorer;
use crate::lag_votes::LagVoteRegistry;
use crate::transfer::{AuthorityTransferCoordinator, TransferAction};
use log::{debug, info, warn};
use shared::timers::Timers;
use shared::{
    GameSnapshot, InputState, Packet, PauseReason, PeerId, RoomId, RosterEntry, Score, Team,
    TransferPhase,
};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum MatchTimer {
    HealthCheck,
}

/// A packet addressed to one room member
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: PeerId,
    pub packet: Packet,
}

#[derive(Debug)]
pub struct MatchContext {
    room_id: RoomId,
    config: MatchConfig,
    roster: BTreeMap<PeerId, RosterEntry>,
    running: bool,
    score: Score,
    last_snapshot: Option<GameSnapshot>,
    monitor: ConnectionMonitor,
    votes: LagVoteRegistry,
    transfer: AuthorityTransferCoordinator,
    timers: Timers<MatchTimer>,
    outbox: Vec<Outbound>,
}

impl MatchContext {
    pub fn new(room_id: RoomId, config: MatchConfig) -> Self {
        MatchContext {
            room_id,
            monitor: ConnectionMonitor::new(config.stale_after_ms),
            votes: LagVoteRegistry::new(config.vote_freshness_ms),
            transfer: AuthorityTransferCoordinator::new(config.clone()),
            config,
            roster: BTreeMap::new(),
            running: false,
            score: Score::default(),
            last_snapshot: None,
            timers: Timers::new(),
            outbox: Vec::new(),
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn authority(&self) -> Option<PeerId> {
        self.transfer.authority()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// True while a running match waits on an authority transfer.
    pub fn is_paused(&self) -> bool {
        self.running && !self.transfer.is_idle()
    }

    pub fn transfer_phase(&self) -> TransferPhase {
        self.transfer.phase()
    }

    pub fn transfer(&self) -> &AuthorityTransferCoordinator {
        &self.transfer
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn votes(&self) -> &LagVoteRegistry {
        &self.votes
    }

    pub fn score(&self) -> Score {
        self.score
    }

    pub fn last_snapshot(&self) -> Option<&GameSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster.values().cloned().collect()
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.roster.contains_key(&peer)
    }

    pub fn player_count(&self) -> usize {
        self.roster.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }

    /// Earliest pending deadline across the match and its transfer session.
    pub fn next_deadline(&self) -> Option<u64> {
        [self.timers.next_deadline(), self.transfer.timers().next_deadline()]
            .into_iter()
            .flatten()
            .min()
    }

    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        std::mem::take(&mut self.outbox)
    }

    /// Adds a peer to the room as a spectator. The first member becomes the
    /// authority.
    pub fn join(&mut self, peer: PeerId, name: &str, now_ms: u64) -> Result<(), MatchError> {
        if !self.roster.contains_key(&peer) {
            if self.roster.len() >= self.config.max_players {
                return Err(MatchError::RoomFull(self.config.max_players));
            }
            let entry = RosterEntry {
                id: peer,
                name: name.to_string(),
                team: Team::Spectator,
            };
            self.roster.insert(peer, entry.clone());
            self.monitor.register(peer, now_ms);
            if self.transfer.authority().is_none() {
                self.transfer.set_authority(Some(peer));
            }
            info!("Peer {peer} ({name}) joined room {}", self.room_id);
            self.broadcast_except(peer, Packet::PlayerJoined { player: entry });
        }

        self.send(
            peer,
            Packet::Joined {
                peer_id: peer,
                room_id: self.room_id,
                authority: self.transfer.authority(),
                roster: self.roster(),
            },
        );
        if let (true, Some(authority)) = (self.running, self.transfer.authority()) {
            self.send(
                peer,
                Packet::MatchStarted {
                    authority,
                    roster: self.roster(),
                },
            );
            for packet in self.transfer.catch_up(now_ms, self.monitor.len()) {
                self.send(peer, packet);
            }
        }
        Ok(())
    }

    /// Removes a peer. A departing authority hands over to the healthiest
    /// remaining peer; an empty room ends its match.
    pub fn leave(&mut self, peer: PeerId, now_ms: u64) -> Result<(), MatchError> {
        if self.roster.remove(&peer).is_none() {
            return Err(MatchError::NotInRoom(peer));
        }
        self.monitor.remove(peer);
        self.votes.remove_peer(peer);
        info!("Peer {peer} left room {}", self.room_id);
        self.broadcast(Packet::PlayerLeft { player_id: peer });

        if self.roster.is_empty() {
            if self.running {
                self.stop_match();
            }
            self.transfer.set_authority(None);
            return Ok(());
        }

        if self.running {
            let actions = self.transfer.handle_peer_left(peer, now_ms, &self.monitor);
            self.apply(actions);
        } else if self.transfer.authority() == Some(peer) {
            let successor = host_scorer::select_best_host(self.monitor.candidates());
            self.transfer.set_authority(successor);
            if let Some(new_host) = successor {
                info!("Peer {new_host} now leads room {}", self.room_id);
                self.broadcast(Packet::HostChanged {
                    old_host: Some(peer),
                    new_host,
                    during_game: false,
                });
            }
        }
        Ok(())
    }

    /// Single entry point for packets from room members.
    pub fn handle(&mut self, from: PeerId, packet: Packet, now_ms: u64) -> Result<(), MatchError> {
        if !self.roster.contains_key(&from) {
            return Err(MatchError::NotInRoom(from));
        }

        match packet {
            Packet::ChangeTeam { room_id, team } => {
                self.check_room(room_id)?;
                let team: Team = team.parse()?;
                self.change_team(from, team);
                Ok(())
            }
            Packet::StartMatch { room_id } => {
                self.check_room(room_id)?;
                self.start_match(from, now_ms)
            }
            Packet::StopMatch { room_id } => {
                self.check_room(room_id)?;
                self.require_authority(from)?;
                if !self.running {
                    return Err(MatchError::MatchNotRunning);
                }
                self.stop_match();
                Ok(())
            }
            Packet::PlayerInput { room_id, input } => {
                self.check_room(room_id)?;
                self.forward_input(from, input)
            }
            Packet::ConnectionStats {
                ping,
                connection_speed,
            } => {
                self.monitor
                    .record_heartbeat(from, ping, connection_speed, now_ms);
                Ok(())
            }
            Packet::Ping { timestamp } => {
                self.send(from, Packet::Pong { timestamp });
                Ok(())
            }
            Packet::ReportLag { target_id, details } => self.report_lag(from, target_id, details, now_ms),
            Packet::PlayerReady => {
                let actions = self.transfer.mark_ready(from, now_ms, &self.monitor);
                self.apply(actions);
                Ok(())
            }
            Packet::GameState(snapshot) => {
                if !self.accept_from_authority(from)? {
                    return Ok(());
                }
                self.score = snapshot.score;
                self.last_snapshot = Some(snapshot.clone());
                self.broadcast_except(from, Packet::GameState(snapshot));
                Ok(())
            }
            packet @ (Packet::Goal { .. }
            | Packet::PowerUpSpawned { .. }
            | Packet::PowerUpCollected { .. }) => {
                if self.accept_from_authority(from)? {
                    if let Packet::Goal { team, score } = &packet {
                        info!("Room {}: goal for {team}, {}-{}", self.room_id, score.red, score.blue);
                        self.score = *score;
                    }
                    self.broadcast_except(from, packet);
                }
                Ok(())
            }
            Packet::LoopStopped { snapshot } => {
                let was_authority = self.transfer.authority() == Some(from)
                    || self.transfer.previous_authority() == Some(from);
                if !self.running || !was_authority {
                    return Err(MatchError::NotAuthority(from));
                }
                if let Some(snapshot) = snapshot {
                    debug!("Peer {from} handed back its state at tick {}", snapshot.tick);
                    self.score = snapshot.score;
                    self.last_snapshot = Some(snapshot);
                }
                Ok(())
            }
            Packet::LeaveRoom => self.leave(from, now_ms),
            _ => Err(MatchError::UnexpectedPacket(from)),
        }
    }

    /// Fires due timers: the periodic health check and the transfer session.
    pub fn poll(&mut self, now_ms: u64) {
        while let Some(timer) = self.timers.pop_due(now_ms) {
            match timer {
                MatchTimer::HealthCheck => {
                    self.run_health_check(now_ms);
                    if self.running {
                        self.timers.schedule_in(
                            MatchTimer::HealthCheck,
                            now_ms,
                            self.config.health_check_interval_ms,
                        );
                    }
                }
            }
        }

        let actions = self.transfer.poll(now_ms, &self.monitor);
        self.apply(actions);
    }

    fn check_room(&self, room_id: RoomId) -> Result<(), MatchError> {
        if room_id == self.room_id {
            Ok(())
        } else {
            Err(MatchError::UnknownRoom(room_id))
        }
    }

    fn require_authority(&self, peer: PeerId) -> Result<PeerId, MatchError> {
        match self.transfer.authority() {
            Some(authority) if authority == peer => Ok(authority),
            _ => Err(MatchError::NotAuthority(peer)),
        }
    }

    /// Whether a simulation packet from `from` should be relayed. Packets
    /// still in flight from a loop that was just paused are dropped quietly.
    fn accept_from_authority(&self, from: PeerId) -> Result<bool, MatchError> {
        if !self.running {
            return Err(MatchError::MatchNotRunning);
        }
        if self.is_paused() {
            debug!("Dropping simulation packet from {from} while paused");
            return Ok(false);
        }
        self.require_authority(from)?;
        Ok(true)
    }

    fn start_match(&mut self, from: PeerId, now_ms: u64) -> Result<(), MatchError> {
        let authority = self.require_authority(from)?;
        if self.running {
            return Err(MatchError::MatchAlreadyRunning);
        }
        if !Team::both_present(self.roster.values().map(|p| p.team)) {
            return Err(MatchError::NotEnoughPlayers);
        }

        self.running = true;
        self.score = Score::default();
        self.last_snapshot = None;
        self.transfer.reset_for_match();
        self.votes.clear();
        self.monitor.reset_lag_reports();
        self.timers.schedule_in(
            MatchTimer::HealthCheck,
            now_ms,
            self.config.health_check_interval_ms,
        );

        info!(
            "Match started in room {} with {} players, authority {authority}",
            self.room_id,
            self.roster.len()
        );
        self.broadcast(Packet::MatchStarted {
            authority,
            roster: self.roster(),
        });
        self.send(
            authority,
            Packet::StartGameLoop {
                roster: self.roster(),
                snapshot: None,
            },
        );
        Ok(())
    }

    fn stop_match(&mut self) {
        self.running = false;
        self.timers.clear();
        self.transfer.stop();
        self.votes.clear();
        info!(
            "Match stopped in room {} at {}-{}",
            self.room_id, self.score.red, self.score.blue
        );
        self.broadcast(Packet::MatchStopped { score: self.score });
    }

    fn change_team(&mut self, peer: PeerId, team: Team) {
        if let Some(entry) = self.roster.get_mut(&peer) {
            entry.team = team;
        }
        info!("Peer {peer} switched to {team}");
        self.broadcast(Packet::TeamChanged {
            player_id: peer,
            team,
        });
    }

    fn forward_input(&mut self, from: PeerId, input: InputState) -> Result<(), MatchError> {
        if !self.running {
            return Err(MatchError::MatchNotRunning);
        }
        match self.transfer.authority() {
            Some(authority) if authority != from && !self.is_paused() => {
                self.send(
                    authority,
                    Packet::ForwardedInput {
                        player_id: from,
                        input,
                    },
                );
            }
            _ => {}
        }
        Ok(())
    }

    fn report_lag(
        &mut self,
        from: PeerId,
        target: PeerId,
        details: String,
        now_ms: u64,
    ) -> Result<(), MatchError> {
        if !self.roster.contains_key(&target) {
            return Err(MatchError::NotInRoom(target));
        }
        if !self.votes.report_lag(from, target, details, now_ms) {
            return Ok(());
        }
        self.monitor.increment_lag_reports(target);

        let quorum = self.votes.has_quorum(target, self.roster.len(), now_ms);
        if self.running && quorum && self.transfer.authority() == Some(target) {
            warn!("Lag report quorum reached against authority {target}");
            self.begin_transfer(PauseReason::PlayerReports, now_ms);
        }
        Ok(())
    }

    fn run_health_check(&mut self, now_ms: u64) {
        if !self.running {
            return;
        }
        self.votes.prune(now_ms);

        for peer in self.monitor.stale_peers(now_ms) {
            let reports = self.monitor.increment_lag_reports(peer);
            warn!("Peer {peer} missed its heartbeats ({reports} lag reports)");
        }

        if !self.transfer.is_idle() {
            return;
        }
        let Some(authority) = self.transfer.authority() else {
            return;
        };

        let reason = if self.monitor.is_stale(authority, now_ms) {
            Some(PauseReason::Unresponsive)
        } else {
            self.monitor
                .stats(authority)
                .and_then(host_scorer::is_degraded)
        };

        match reason {
            Some(reason) => {
                warn!("Authority {authority} is degraded: {reason:?}");
                self.begin_transfer(reason, now_ms);
            }
            None => debug!(
                "Authority {authority} healthy (avg ping {:?})",
                self.monitor.average_ping(authority)
            ),
        }
    }

    fn begin_transfer(&mut self, reason: PauseReason, now_ms: u64) {
        match self.transfer.start_transfer(reason, now_ms) {
            Ok(actions) => self.apply(actions),
            Err(blocked) => info!("Transfer not started: {blocked}"),
        }
    }

    fn apply(&mut self, actions: Vec<TransferAction>) {
        for action in actions {
            match action {
                TransferAction::Broadcast(packet) => self.broadcast(packet),
                TransferAction::StopLoop(peer) => self.send(peer, Packet::StopGameLoop),
                TransferAction::StartLoop(peer) => self.send(
                    peer,
                    Packet::StartGameLoop {
                        roster: self.roster(),
                        snapshot: self.last_snapshot.clone(),
                    },
                ),
                TransferAction::ClearVotes => self.votes.clear(),
                TransferAction::EndMatch => {
                    if self.running {
                        self.stop_match();
                    }
                }
            }
        }
    }

    fn send(&mut self, to: PeerId, packet: Packet) {
        if self.roster.contains_key(&to) {
            self.outbox.push(Outbound { to, packet });
        }
    }

    fn broadcast(&mut self, packet: Packet) {
        for &to in self.roster.keys() {
            self.outbox.push(Outbound {
                to,
                packet: packet.clone(),
            });
        }
    }

    fn broadcast_except(&mut self, except: PeerId, packet: Packet) {
        for &to in self.roster.keys() {
            if to != except {
                self.outbox.push(Outbound {
                    to,
                    packet: packet.clone(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Vector2;
    use std::collections::BTreeMap as Map;

    const ROOM: RoomId = 7;

    fn packets_for(outbound: &[Outbound], peer: PeerId) -> Vec<&Packet> {
        outbound
            .iter()
            .filter(|o| o.to == peer)
            .map(|o| &o.packet)
            .collect()
    }

    fn snapshot(tick: u32) -> GameSnapshot {
        GameSnapshot {
            tick,
            timestamp: 0,
            ball: Vector2::new(400.0, 200.0),
            ball_velocity: Vector2::ZERO,
            players: Map::new(),
            power_ups: Vec::new(),
            score: Score::default(),
        }
    }

    /// Room with peers 1 (red, authority), 2 (blue) and 3 (blue).
    fn lobby() -> MatchContext {
        let mut room = MatchContext::new(ROOM, MatchConfig::default());
        for (peer, team) in [(1, "red"), (2, "blue"), (3, "blue")] {
            room.join(peer, &format!("p{peer}"), 0).unwrap();
            room.handle(peer, Packet::ChangeTeam { room_id: ROOM, team: team.into() }, 0)
                .unwrap();
        }
        room.drain_outbound();
        room
    }

    fn heartbeat(room: &mut MatchContext, peer: PeerId, ping: f32, now: u64) {
        room.handle(peer, Packet::ConnectionStats { ping, connection_speed: 5.0 }, now)
            .unwrap();
    }

    fn running() -> MatchContext {
        let mut room = lobby();
        room.handle(1, Packet::StartMatch { room_id: ROOM }, 0).unwrap();
        room.drain_outbound();
        room
    }

    #[test]
    fn test_first_joiner_is_authority() {
        let mut room = MatchContext::new(ROOM, MatchConfig::default());
        room.join(4, "ada", 0).unwrap();
        room.join(9, "bob", 0).unwrap();

        assert_eq!(room.authority(), Some(4));
        let out = room.drain_outbound();
        assert!(packets_for(&out, 4).iter().any(|p| matches!(
            p,
            Packet::PlayerJoined { player } if player.id == 9
        )));
        assert!(packets_for(&out, 9).iter().any(|p| matches!(
            p,
            Packet::Joined { peer_id: 9, authority: Some(4), .. }
        )));
    }

    #[test]
    fn test_room_capacity() {
        let config = MatchConfig {
            max_players: 2,
            ..MatchConfig::default()
        };
        let mut room = MatchContext::new(ROOM, config);
        room.join(1, "a", 0).unwrap();
        room.join(2, "b", 0).unwrap();

        assert_eq!(room.join(3, "c", 0), Err(MatchError::RoomFull(2)));
        assert_eq!(room.join(2, "b", 0), Ok(()));
    }

    #[test]
    fn test_boundary_validation() {
        let mut room = lobby();

        assert_eq!(
            room.handle(2, Packet::ChangeTeam { room_id: ROOM, team: "green".into() }, 0),
            Err(MatchError::InvalidTeam(shared::TeamParseError("green".into())))
        );
        assert_eq!(
            room.handle(2, Packet::ChangeTeam { room_id: 99, team: "red".into() }, 0),
            Err(MatchError::UnknownRoom(99))
        );
        assert_eq!(
            room.handle(42, Packet::PlayerReady, 0),
            Err(MatchError::NotInRoom(42))
        );
        assert_eq!(
            room.handle(2, Packet::StartMatch { room_id: ROOM }, 0),
            Err(MatchError::NotAuthority(2))
        );
        assert_eq!(
            room.handle(1, Packet::StopMatch { room_id: ROOM }, 0),
            Err(MatchError::MatchNotRunning)
        );
        assert_eq!(
            room.handle(2, Packet::GameResumed, 0),
            Err(MatchError::UnexpectedPacket(2))
        );
        assert!(!room.is_running());
    }

    #[test]
    fn test_start_requires_both_teams() {
        let mut room = MatchContext::new(ROOM, MatchConfig::default());
        room.join(1, "a", 0).unwrap();
        room.join(2, "b", 0).unwrap();
        room.handle(1, Packet::ChangeTeam { room_id: ROOM, team: "red".into() }, 0)
            .unwrap();

        assert_eq!(
            room.handle(1, Packet::StartMatch { room_id: ROOM }, 0),
            Err(MatchError::NotEnoughPlayers)
        );
    }

    #[test]
    fn test_start_hands_loop_to_authority_only() {
        let mut room = lobby();
        room.handle(1, Packet::StartMatch { room_id: ROOM }, 0).unwrap();

        let out = room.drain_outbound();
        let starts: Vec<PeerId> = out
            .iter()
            .filter(|o| matches!(o.packet, Packet::StartGameLoop { .. }))
            .map(|o| o.to)
            .collect();
        assert_eq!(starts, vec![1]);
        assert_eq!(
            out.iter()
                .filter(|o| matches!(o.packet, Packet::MatchStarted { authority: 1, .. }))
                .count(),
            3
        );
        assert_eq!(
            room.handle(1, Packet::StartMatch { room_id: ROOM }, 0),
            Err(MatchError::MatchAlreadyRunning)
        );
    }

    #[test]
    fn test_state_only_accepted_from_authority() {
        let mut room = running();

        assert_eq!(
            room.handle(2, Packet::GameState(snapshot(1)), 16),
            Err(MatchError::NotAuthority(2))
        );
        room.handle(1, Packet::GameState(snapshot(2)), 16).unwrap();

        let out = room.drain_outbound();
        assert_eq!(out.len(), 2);
        assert!(packets_for(&out, 1).is_empty());
        assert_eq!(room.last_snapshot().map(|s| s.tick), Some(2));
    }

    #[test]
    fn test_inputs_are_forwarded_to_authority() {
        let mut room = running();
        let input = InputState { left: true, ..InputState::default() };

        room.handle(2, Packet::PlayerInput { room_id: ROOM, input }, 10).unwrap();
        room.handle(1, Packet::PlayerInput { room_id: ROOM, input }, 10).unwrap();

        let out = room.drain_outbound();
        assert_eq!(
            out,
            vec![Outbound { to: 1, packet: Packet::ForwardedInput { player_id: 2, input } }]
        );
    }

    #[test]
    fn test_ping_is_echoed() {
        let mut room = lobby();
        room.handle(3, Packet::Ping { timestamp: 1234 }, 0).unwrap();
        assert_eq!(
            room.drain_outbound(),
            vec![Outbound { to: 3, packet: Packet::Pong { timestamp: 1234 } }]
        );
    }

    #[test]
    fn test_health_check_pauses_degraded_authority() {
        let mut room = running();
        for t in [1_000, 2_000, 3_000, 4_000] {
            heartbeat(&mut room, 1, 250.0, t);
            heartbeat(&mut room, 2, 50.0, t);
            heartbeat(&mut room, 3, 80.0, t);
        }

        room.poll(4_999);
        assert!(!room.is_paused());

        room.poll(5_000);
        assert!(room.is_paused());
        let out = room.drain_outbound();
        assert_eq!(packets_for(&out, 1)[0], &Packet::StopGameLoop);
        assert!(packets_for(&out, 2).iter().any(|p| matches!(
            p,
            Packet::GamePaused { reason: PauseReason::HighPing, .. }
        )));

        room.poll(7_000);
        assert_eq!(room.authority(), Some(2));
    }

    #[test]
    fn test_late_joiners_see_the_transfer_in_progress() {
        let mut room = running();
        for t in [1_000, 2_000, 3_000, 4_000] {
            heartbeat(&mut room, 1, 250.0, t);
            heartbeat(&mut room, 2, 50.0, t);
            heartbeat(&mut room, 3, 80.0, t);
        }
        room.poll(5_000);
        room.drain_outbound();

        room.join(4, "dee", 5_500).unwrap();
        heartbeat(&mut room, 4, 400.0, 5_600);
        let out = room.drain_outbound();
        let joiner = packets_for(&out, 4);
        assert!(matches!(joiner[1], Packet::MatchStarted { authority: 1, .. }));
        assert!(matches!(
            joiner[2],
            Packet::GamePaused { reason: PauseReason::HighPing, .. }
        ));
        assert!(matches!(
            joiner[3],
            Packet::HostTransferStatus { phase: TransferPhase::Paused, total_players: 4, .. }
        ));
        assert!(!joiner.iter().any(|p| matches!(p, Packet::ReadyCheckStarted { .. })));

        room.poll(7_000);
        assert_eq!(room.authority(), Some(2));
        room.drain_outbound();

        room.join(5, "eve", 17_000).unwrap();
        let out = room.drain_outbound();
        let joiner = packets_for(&out, 5);
        assert!(matches!(
            joiner[3],
            Packet::HostTransferStatus { phase: TransferPhase::ReadyCheck, total_players: 5, .. }
        ));
        assert_eq!(joiner[4], &Packet::ReadyCheckStarted { timeout_seconds: 20 });
    }

    #[test]
    fn test_joiners_outside_a_transfer_get_no_pause() {
        let mut room = running();
        room.join(4, "dee", 1_000).unwrap();
        let out = room.drain_outbound();
        let joiner = packets_for(&out, 4);
        assert_eq!(joiner.len(), 2);
        assert!(matches!(joiner[1], Packet::MatchStarted { .. }));
    }

    #[test]
    fn test_paused_match_drops_state_and_inputs() {
        let mut room = running();
        heartbeat(&mut room, 1, 300.0, 1_000);
        room.poll(5_000);
        room.drain_outbound();

        assert_eq!(room.handle(1, Packet::GameState(snapshot(9)), 5_010), Ok(()));
        let input = InputState::default();
        room.handle(2, Packet::PlayerInput { room_id: ROOM, input }, 5_010).unwrap();
        assert!(room.drain_outbound().is_empty());
        assert!(room.last_snapshot().is_none());

        room.handle(1, Packet::LoopStopped { snapshot: Some(snapshot(9)) }, 5_020)
            .unwrap();
        assert_eq!(room.last_snapshot().map(|s| s.tick), Some(9));
    }

    #[test]
    fn test_lag_quorum_triggers_transfer() {
        let mut room = running();
        room.handle(2, Packet::ReportLag { target_id: 1, details: "jumpy".into() }, 1_000)
            .unwrap();
        assert!(!room.is_paused());

        room.handle(3, Packet::ReportLag { target_id: 1, details: "frozen".into() }, 2_000)
            .unwrap();
        assert!(room.is_paused());
        assert_eq!(room.monitor().stats(1).unwrap().lag_reports, 2);
    }

    #[test]
    fn test_lag_reports_against_unknown_target() {
        let mut room = running();
        assert_eq!(
            room.handle(2, Packet::ReportLag { target_id: 50, details: String::new() }, 0),
            Err(MatchError::NotInRoom(50))
        );
    }

    #[test]
    fn test_stale_peers_accumulate_reports() {
        let mut room = running();
        for t in (0..=20_000).step_by(1_000) {
            heartbeat(&mut room, 1, 40.0, t);
            heartbeat(&mut room, 2, 40.0, t);
        }

        room.poll(15_000);
        assert_eq!(room.monitor().stats(3).unwrap().lag_reports, 1);
        room.poll(20_000);
        assert_eq!(room.monitor().stats(3).unwrap().lag_reports, 2);
        assert!(!room.is_paused());
    }

    #[test]
    fn test_silent_authority_is_replaced() {
        let mut room = running();
        for t in (0..=11_000).step_by(1_000) {
            heartbeat(&mut room, 2, 40.0, t);
            heartbeat(&mut room, 3, 60.0, t);
        }

        room.poll(10_000);
        assert!(!room.is_paused());
        room.poll(15_000);
        assert!(room.is_paused());
        assert!(room.drain_outbound().iter().any(|o| matches!(
            o.packet,
            Packet::GamePaused { reason: PauseReason::Unresponsive, .. }
        )));
    }

    #[test]
    fn test_authority_leaving_mid_match() {
        let mut room = running();
        heartbeat(&mut room, 2, 90.0, 100);
        heartbeat(&mut room, 3, 30.0, 100);
        room.handle(1, Packet::GameState(snapshot(40)), 200).unwrap();
        room.drain_outbound();

        room.leave(1, 300).unwrap();
        assert_eq!(room.authority(), Some(3));
        assert_eq!(room.transfer_phase(), TransferPhase::ReadyCheck);

        room.handle(2, Packet::PlayerReady, 400).unwrap();
        room.handle(3, Packet::PlayerReady, 500).unwrap();
        room.drain_outbound();
        room.poll(3_500);

        let out = room.drain_outbound();
        assert!(packets_for(&out, 3).iter().any(|p| matches!(
            p,
            Packet::StartGameLoop { snapshot: Some(s), .. } if s.tick == 40
        )));
        assert!(!room.is_paused());
    }

    #[test]
    fn test_last_peer_leaving_stops_match() {
        let mut room = running();
        room.leave(2, 0).unwrap();
        room.leave(3, 0).unwrap();
        assert!(room.is_running());

        room.leave(1, 0).unwrap();
        assert!(!room.is_running());
        assert_eq!(room.authority(), None);
        assert!(room.is_empty());
        assert_eq!(room.leave(1, 0), Err(MatchError::NotInRoom(1)));
    }

    #[test]
    fn test_lobby_authority_leaving_promotes_someone() {
        let mut room = lobby();
        heartbeat(&mut room, 3, 20.0, 0);
        heartbeat(&mut room, 2, 120.0, 0);

        room.leave(1, 0).unwrap();
        assert_eq!(room.authority(), Some(3));
        assert!(room.drain_outbound().iter().any(|o| matches!(
            o.packet,
            Packet::HostChanged { new_host: 3, during_game: false, .. }
        )));
    }

    #[test]
    fn test_stop_match_resets_transfer() {
        let mut room = running();
        heartbeat(&mut room, 1, 300.0, 1_000);
        room.poll(5_000);
        assert!(room.is_paused());

        room.handle(1, Packet::StopMatch { room_id: ROOM }, 5_500).unwrap();
        assert!(!room.is_running());
        assert_eq!(room.transfer_phase(), TransferPhase::Idle);
        assert_eq!(room.next_deadline(), None);
        assert!(room.drain_outbound().iter().any(|o| matches!(o.packet, Packet::MatchStopped { .. })));
    }
}
