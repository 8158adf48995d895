//! Protocol state of one peer, independent of any socket
//!
//! A [`PeerSession`] is either a spectator (renders what the authority
//! publishes, sends inputs) or the authority (owns the [`GameLoop`] and
//! publishes a snapshot per tick). Which one is decided by the relay through
//! `StartGameLoop` and `StopGameLoop`; the session only reacts.
//!
//! Every entry point takes the current time in milliseconds and returns the
//! packets to send to the relay, so the same code runs over UDP and inside
//! the in-process test harness.

use log::{debug, info, warn};
use shared::game_loop::GameLoop;
use shared::state::MatchState;
use shared::timers::Timers;
use shared::{
    GameSnapshot, InputState, Packet, PeerId, RoomId, RosterEntry, Team, Vector2,
    PROTOCOL_VERSION, TICK_RATE,
};
use std::collections::BTreeMap;

/// Heartbeats (ping + connection stats) go out at least this often
pub const HEARTBEAT_INTERVAL_MS: u64 = 1_000;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub room_id: RoomId,
    pub name: String,
    /// Team requested right after joining
    pub team: Team,
    /// Self-declared link quality sent with every heartbeat
    pub connection_speed: f32,
    pub tick_interval_ms: u64,
    /// Complain about the authority once its snapshots are this old; `None`
    /// never complains
    pub complain_after_ms: Option<u64>,
    /// Ask to start the match once both teams have players, if we lead the room
    pub auto_start: bool,
    /// Seed for power-up placement when this peer becomes authority
    pub seed: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            room_id: 1,
            name: "peer".to_string(),
            team: Team::Spectator,
            connection_speed: 5.0,
            tick_interval_ms: 1_000 / TICK_RATE as u64,
            complain_after_ms: Some(3_000),
            auto_start: false,
            seed: 0,
        }
    }
}

#[derive(Debug)]
enum Role {
    Spectator,
    Authority(Box<GameLoop>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum SessionTimer {
    Heartbeat,
    Tick,
}

#[derive(Debug)]
pub struct PeerSession {
    config: SessionConfig,
    peer_id: Option<PeerId>,
    authority: Option<PeerId>,
    roster: BTreeMap<PeerId, RosterEntry>,
    role: Role,
    running: bool,
    paused: bool,
    start_requested: bool,
    input: InputState,
    last_ping_ms: Option<f32>,
    last_snapshot: Option<GameSnapshot>,
    /// When the authority was last heard from (or the grace period started)
    last_state_at: Option<u64>,
    last_complaint_at: Option<u64>,
    timers: Timers<SessionTimer>,
}

impl PeerSession {
    pub fn new(config: SessionConfig) -> Self {
        PeerSession {
            config,
            peer_id: None,
            authority: None,
            roster: BTreeMap::new(),
            role: Role::Spectator,
            running: false,
            paused: false,
            start_requested: false,
            input: InputState::default(),
            last_ping_ms: None,
            last_snapshot: None,
            last_state_at: None,
            last_complaint_at: None,
            timers: Timers::new(),
        }
    }

    pub fn join_packet(&self) -> Packet {
        Packet::JoinRoom {
            room_id: self.config.room_id,
            name: self.config.name.clone(),
            client_version: PROTOCOL_VERSION,
        }
    }

    pub fn peer_id(&self) -> Option<PeerId> {
        self.peer_id
    }

    pub fn authority(&self) -> Option<PeerId> {
        self.authority
    }

    /// True while this peer runs the authoritative loop.
    pub fn is_authority(&self) -> bool {
        matches!(self.role, Role::Authority(_))
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn last_ping_ms(&self) -> Option<f32> {
        self.last_ping_ms
    }

    pub fn last_snapshot(&self) -> Option<&GameSnapshot> {
        self.last_snapshot.as_ref()
    }

    pub fn game(&self) -> Option<&GameLoop> {
        match &self.role {
            Role::Authority(game) => Some(game),
            Role::Spectator => None,
        }
    }

    pub fn roster(&self) -> Vec<RosterEntry> {
        self.roster.values().cloned().collect()
    }

    /// Own position and the ball, from the loop if we run it, otherwise from
    /// the latest snapshot.
    pub fn positions(&self) -> Option<(Vector2, Vector2)> {
        let me = self.peer_id?;
        match &self.role {
            Role::Authority(game) => {
                let state = game.state();
                Some((state.players.get(&me)?.position, state.ball))
            }
            Role::Spectator => {
                let snapshot = self.last_snapshot.as_ref()?;
                Some((snapshot.players.get(&me)?.position, snapshot.ball))
            }
        }
    }

    pub fn my_team(&self) -> Option<Team> {
        self.peer_id
            .and_then(|id| self.roster.get(&id))
            .map(|entry| entry.team)
    }

    /// Updates held input. The authority applies it directly; everyone else
    /// gets a `PlayerInput` to send when it changed.
    pub fn set_input(&mut self, input: InputState) -> Option<Packet> {
        if input == self.input {
            return None;
        }
        self.input = input;

        if let (Role::Authority(game), Some(me)) = (&mut self.role, self.peer_id) {
            game.set_input(me, input);
            return None;
        }
        if self.running && !self.paused {
            Some(Packet::PlayerInput {
                room_id: self.config.room_id,
                input,
            })
        } else {
            None
        }
    }

    /// Single entry point for packets from the relay.
    pub fn handle(&mut self, packet: Packet, now_ms: u64) -> Vec<Packet> {
        let mut out = Vec::new();
        let unhandled = if self.is_authority() {
            self.dispatch_authority(packet, now_ms, &mut out)
        } else {
            self.dispatch_spectator(packet, now_ms, &mut out)
        };
        if let Some(packet) = unhandled {
            self.dispatch_common(packet, now_ms, &mut out);
        }
        out
    }

    /// Fires due heartbeats and simulation ticks.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Packet> {
        let mut out = Vec::new();
        while let Some(timer) = self.timers.pop_due(now_ms) {
            match timer {
                SessionTimer::Heartbeat => {
                    self.heartbeat(now_ms, &mut out);
                    self.timers
                        .schedule_in(SessionTimer::Heartbeat, now_ms, HEARTBEAT_INTERVAL_MS);
                }
                SessionTimer::Tick => {
                    if let Role::Authority(game) = &mut self.role {
                        let output = game.tick(now_ms);
                        out.push(Packet::GameState(output.snapshot));
                        out.extend(output.events);
                        self.timers.schedule_in(
                            SessionTimer::Tick,
                            now_ms,
                            self.config.tick_interval_ms,
                        );
                    }
                }
            }
        }
        out
    }

    /// Packets the authority handles differently. Anything returned falls
    /// through to the shared handling.
    fn dispatch_authority(&mut self, packet: Packet, now_ms: u64, out: &mut Vec<Packet>) -> Option<Packet> {
        let Role::Authority(game) = &mut self.role else {
            return Some(packet);
        };

        match packet {
            Packet::ForwardedInput { player_id, input } => {
                if !game.set_input(player_id, input) {
                    debug!("Input for unknown player {player_id}");
                }
                None
            }
            Packet::StopGameLoop => {
                self.stop_loop(now_ms, out);
                None
            }
            Packet::StartGameLoop { .. } => {
                debug!("Already running the loop, ignoring start");
                None
            }
            Packet::PlayerJoined { ref player } => {
                game.add_player(player);
                Some(packet)
            }
            Packet::PlayerLeft { player_id } => {
                game.remove_player(player_id);
                Some(packet)
            }
            Packet::TeamChanged { player_id, team } => {
                game.change_team(player_id, team);
                Some(packet)
            }
            Packet::MatchStopped { .. } => {
                self.role = Role::Spectator;
                self.timers.cancel(&SessionTimer::Tick);
                Some(packet)
            }
            Packet::GameState(_) => {
                warn!("Received a snapshot while running the loop");
                None
            }
            other => Some(other),
        }
    }

    fn dispatch_spectator(&mut self, packet: Packet, now_ms: u64, out: &mut Vec<Packet>) -> Option<Packet> {
        match packet {
            Packet::GameState(snapshot) => {
                self.last_state_at = Some(now_ms);
                self.last_snapshot = Some(snapshot);
                None
            }
            Packet::Goal { team, score } => {
                info!("Goal for {team}: {}-{}", score.red, score.blue);
                self.last_state_at = Some(now_ms);
                None
            }
            Packet::PowerUpSpawned { id, kind, x, y } => {
                debug!("Power-up {id} ({kind:?}) at ({x:.0}, {y:.0})");
                None
            }
            Packet::PowerUpCollected {
                player_id, kind, ..
            } => {
                debug!("Player {player_id} picked up {kind:?}");
                None
            }
            Packet::StartGameLoop { roster, snapshot } => {
                self.start_loop(&roster, snapshot.as_ref(), now_ms);
                None
            }
            Packet::StopGameLoop => {
                out.push(Packet::LoopStopped { snapshot: None });
                None
            }
            Packet::ForwardedInput { player_id, .. } => {
                debug!("Spectator got input for {player_id}, ignoring");
                None
            }
            other => Some(other),
        }
    }

    fn dispatch_common(&mut self, packet: Packet, now_ms: u64, out: &mut Vec<Packet>) {
        match packet {
            Packet::Joined {
                peer_id,
                room_id,
                authority,
                roster,
            } => {
                info!("Joined room {room_id} as peer {peer_id}, authority {authority:?}");
                self.peer_id = Some(peer_id);
                self.authority = authority;
                self.roster = roster.into_iter().map(|p| (p.id, p)).collect();
                self.timers.schedule(SessionTimer::Heartbeat, now_ms);
                if self.config.team.is_active() {
                    out.push(Packet::ChangeTeam {
                        room_id: self.config.room_id,
                        team: self.config.team.to_string(),
                    });
                }
            }
            Packet::Rejected { reason } => {
                warn!("Relay rejected a request: {reason}");
            }
            Packet::Pong { timestamp } => {
                let rtt = now_ms.saturating_sub(timestamp) as f32;
                debug!("RTT {rtt}ms");
                self.last_ping_ms = Some(rtt);
            }
            Packet::PlayerJoined { player } => {
                info!("{} joined", player.name);
                self.roster.insert(player.id, player);
            }
            Packet::PlayerLeft { player_id } => {
                self.roster.remove(&player_id);
            }
            Packet::TeamChanged { player_id, team } => {
                if let Some(entry) = self.roster.get_mut(&player_id) {
                    entry.team = team;
                }
            }
            Packet::MatchStarted { authority, roster } => {
                info!("Match started, authority {authority}");
                self.running = true;
                self.paused = false;
                self.authority = Some(authority);
                self.roster = roster.into_iter().map(|p| (p.id, p)).collect();
                self.last_state_at = Some(now_ms);
                self.last_complaint_at = None;
            }
            Packet::MatchStopped { score } => {
                info!("Match over: {}-{}", score.red, score.blue);
                self.running = false;
                self.paused = false;
                self.start_requested = false;
                self.last_snapshot = None;
            }
            Packet::HostChanged {
                old_host,
                new_host,
                during_game,
            } => {
                info!("Authority moved from {old_host:?} to {new_host} (in game: {during_game})");
                self.authority = Some(new_host);
                self.last_complaint_at = None;
            }
            Packet::GamePaused { reason, message } => {
                warn!("Game paused ({reason:?}): {message}");
                self.paused = true;
            }
            Packet::GameResumed => {
                info!("Game resumed");
                self.paused = false;
                self.last_state_at = Some(now_ms);
            }
            Packet::HostTransferCancelled { message, .. } => {
                info!("{message}");
            }
            Packet::HostTransferStatus {
                phase,
                ready_players,
                total_players,
                ..
            } => {
                debug!(
                    "Transfer {phase:?}: {}/{total_players} ready",
                    ready_players.len()
                );
            }
            Packet::ReadyCheckStarted { timeout_seconds } => {
                info!("Ready check ({timeout_seconds}s)");
                out.push(Packet::PlayerReady);
            }
            Packet::PlayerReadyUpdate {
                player_id,
                ready_count,
                total_players,
            } => {
                debug!("Player {player_id} ready ({ready_count}/{total_players})");
            }
            Packet::ReadyCheckFinished { ready_players } => {
                info!("Ready check finished with {} ready", ready_players.len());
            }
            other => {
                debug!("Ignoring unexpected packet {other:?}");
            }
        }
        self.maybe_request_start(out);
    }

    fn start_loop(&mut self, roster: &[RosterEntry], snapshot: Option<&GameSnapshot>, now_ms: u64) {
        let seed = self.config.seed.wrapping_add(now_ms);
        let mut game = match snapshot {
            Some(snapshot) => GameLoop::resume_from(snapshot, roster, now_ms, seed),
            None => GameLoop::start(MatchState::from_roster(roster), now_ms, seed),
        };
        if let Some(me) = self.peer_id {
            game.set_input(me, self.input);
        }
        info!("This peer is now the authority");
        self.role = Role::Authority(Box::new(game));
        self.authority = self.peer_id;
        self.running = true;
        self.timers
            .schedule_in(SessionTimer::Tick, now_ms, self.config.tick_interval_ms);
    }

    fn stop_loop(&mut self, now_ms: u64, out: &mut Vec<Packet>) {
        let role = std::mem::replace(&mut self.role, Role::Spectator);
        self.timers.cancel(&SessionTimer::Tick);
        if let Role::Authority(game) = role {
            let snapshot = game.snapshot(now_ms);
            game.stop();
            self.last_snapshot = Some(snapshot.clone());
            self.last_state_at = Some(now_ms);
            out.push(Packet::LoopStopped {
                snapshot: Some(snapshot),
            });
        }
    }

    fn heartbeat(&mut self, now_ms: u64, out: &mut Vec<Packet>) {
        if self.peer_id.is_none() {
            return;
        }
        out.push(Packet::Ping { timestamp: now_ms });
        if let Some(ping) = self.last_ping_ms {
            out.push(Packet::ConnectionStats {
                ping,
                connection_speed: self.config.connection_speed,
            });
        }
        if let Some(packet) = self.lag_complaint(now_ms) {
            out.push(packet);
        }
    }

    /// A `ReportLag` against the authority if its state went stale, at most
    /// once per complaint window.
    fn lag_complaint(&mut self, now_ms: u64) -> Option<Packet> {
        let threshold = self.config.complain_after_ms?;
        if !self.running || self.paused || self.is_authority() {
            return None;
        }
        let target = self.authority.filter(|&a| Some(a) != self.peer_id)?;
        let silent_for = now_ms.saturating_sub(self.last_state_at?);
        if silent_for <= threshold {
            return None;
        }
        if self
            .last_complaint_at
            .is_some_and(|last| now_ms.saturating_sub(last) < threshold)
        {
            return None;
        }

        warn!("No state from authority {target} for {silent_for}ms, reporting lag");
        self.last_complaint_at = Some(now_ms);
        Some(Packet::ReportLag {
            target_id: target,
            details: format!("no game state for {silent_for}ms"),
        })
    }

    fn maybe_request_start(&mut self, out: &mut Vec<Packet>) {
        if !self.config.auto_start || self.running || self.start_requested {
            return;
        }
        if self.peer_id.is_none() || self.authority != self.peer_id {
            return;
        }
        if Team::both_present(self.roster.values().map(|p| p.team)) {
            info!("Both teams present, starting the match");
            self.start_requested = true;
            out.push(Packet::StartMatch {
                room_id: self.config.room_id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::Score;

    fn entry(id: PeerId, team: Team) -> RosterEntry {
        RosterEntry {
            id,
            name: format!("p{id}"),
            team,
        }
    }

    fn roster() -> Vec<RosterEntry> {
        vec![entry(1, Team::Red), entry(2, Team::Blue)]
    }

    fn joined(peer_id: PeerId, team: Team) -> PeerSession {
        let mut session = PeerSession::new(SessionConfig {
            team,
            ..SessionConfig::default()
        });
        session.handle(
            Packet::Joined {
                peer_id,
                room_id: 1,
                authority: Some(1),
                roster: roster(),
            },
            0,
        );
        session
    }

    fn started(peer_id: PeerId) -> PeerSession {
        let mut session = joined(peer_id, Team::Blue);
        session.handle(
            Packet::MatchStarted {
                authority: 1,
                roster: roster(),
            },
            0,
        );
        session
    }

    #[test]
    fn test_join_requests_team() {
        let mut session = PeerSession::new(SessionConfig {
            team: Team::Red,
            ..SessionConfig::default()
        });
        assert!(matches!(session.join_packet(), Packet::JoinRoom { client_version: PROTOCOL_VERSION, .. }));

        let out = session.handle(
            Packet::Joined {
                peer_id: 4,
                room_id: 1,
                authority: Some(4),
                roster: vec![entry(4, Team::Spectator)],
            },
            0,
        );
        assert_eq!(session.peer_id(), Some(4));
        assert_eq!(
            out,
            vec![Packet::ChangeTeam {
                room_id: 1,
                team: "red".into()
            }]
        );
    }

    #[test]
    fn test_heartbeat_measures_rtt() {
        let mut session = joined(2, Team::Blue);

        // No measurement yet, so only the ping goes out.
        assert_eq!(session.tick(0), vec![Packet::Ping { timestamp: 0 }]);
        session.handle(Packet::Pong { timestamp: 0 }, 80);
        assert_approx_eq!(session.last_ping_ms().unwrap_or_default(), 80.0);

        let out = session.tick(1_000);
        assert_eq!(out[0], Packet::Ping { timestamp: 1_000 });
        assert_eq!(
            out[1],
            Packet::ConnectionStats {
                ping: 80.0,
                connection_speed: 5.0
            }
        );
        assert!(session.tick(1_999).is_empty());
    }

    #[test]
    fn test_ready_check_is_acknowledged() {
        let mut session = started(2);
        let out = session.handle(Packet::ReadyCheckStarted { timeout_seconds: 30 }, 10);
        assert_eq!(out, vec![Packet::PlayerReady]);
    }

    #[test]
    fn test_becoming_authority_starts_ticking() {
        let mut session = started(1);
        session.handle(
            Packet::StartGameLoop {
                roster: roster(),
                snapshot: None,
            },
            100,
        );
        assert!(session.is_authority());

        let moving_left = InputState {
            left: true,
            ..InputState::default()
        };
        session.handle(
            Packet::ForwardedInput {
                player_id: 2,
                input: moving_left,
            },
            105,
        );

        let out = session.tick(100 + 16);
        let Some(Packet::GameState(snapshot)) = out.iter().find(|p| matches!(p, Packet::GameState(_))) else {
            panic!("authority tick should publish a snapshot");
        };
        assert_eq!(snapshot.tick, 1);
        assert!(snapshot.players[&2].velocity.x < 0.0);
    }

    #[test]
    fn test_stop_loop_hands_back_snapshot() {
        let mut session = started(1);
        session.handle(
            Packet::StartGameLoop {
                roster: roster(),
                snapshot: None,
            },
            0,
        );
        session.tick(16);
        session.tick(32);

        let out = session.handle(Packet::StopGameLoop, 40);
        assert!(!session.is_authority());
        assert!(matches!(
            out.as_slice(),
            [Packet::LoopStopped { snapshot: Some(s) }] if s.tick == 2
        ));
        assert!(session.tick(100).iter().all(|p| !matches!(p, Packet::GameState(_))));
    }

    #[test]
    fn test_resume_from_snapshot() {
        let mut old = started(1);
        old.handle(Packet::StartGameLoop { roster: roster(), snapshot: None }, 0);
        old.tick(16);
        let out = old.handle(Packet::StopGameLoop, 20);
        let Some(Packet::LoopStopped { snapshot: Some(snapshot) }) = out.into_iter().next() else {
            panic!("expected a final snapshot");
        };

        let mut new = started(2);
        new.handle(
            Packet::StartGameLoop {
                roster: roster(),
                snapshot: Some(snapshot.clone()),
            },
            5_000,
        );
        assert_eq!(new.game().unwrap().state().tick, snapshot.tick);
        assert_eq!(new.authority(), Some(2));
    }

    #[test]
    fn test_spectator_inputs_only_while_running() {
        let mut session = joined(2, Team::Blue);
        let input = InputState {
            up: true,
            ..InputState::default()
        };
        assert_eq!(session.set_input(input), None);

        session.handle(Packet::MatchStarted { authority: 1, roster: roster() }, 0);
        let input = InputState {
            down: true,
            ..InputState::default()
        };
        assert_eq!(
            session.set_input(input),
            Some(Packet::PlayerInput { room_id: 1, input })
        );
        assert_eq!(session.set_input(input), None);
    }

    #[test]
    fn test_stale_authority_draws_a_complaint() {
        let mut session = started(2);
        session.handle(Packet::Pong { timestamp: 0 }, 20);
        session.tick(0);

        session.handle(Packet::GameState(MatchState::from_roster(&roster()).snapshot(500)), 500);
        assert!(session
            .tick(3_000)
            .iter()
            .all(|p| !matches!(p, Packet::ReportLag { .. })));

        let out = session.tick(4_000);
        assert!(out.iter().any(|p| matches!(p, Packet::ReportLag { target_id: 1, .. })));

        // One complaint per window.
        assert!(session
            .tick(5_000)
            .iter()
            .all(|p| !matches!(p, Packet::ReportLag { .. })));
    }

    #[test]
    fn test_no_complaints_while_paused() {
        let mut session = started(2);
        session.handle(
            Packet::GamePaused {
                reason: shared::PauseReason::HighPing,
                message: String::new(),
            },
            0,
        );
        session.tick(0);
        assert!(session
            .tick(10_000)
            .iter()
            .all(|p| !matches!(p, Packet::ReportLag { .. })));
    }

    #[test]
    fn test_auto_start_when_both_teams_present() {
        let mut session = PeerSession::new(SessionConfig {
            team: Team::Red,
            auto_start: true,
            ..SessionConfig::default()
        });
        session.handle(
            Packet::Joined {
                peer_id: 1,
                room_id: 1,
                authority: Some(1),
                roster: vec![entry(1, Team::Spectator)],
            },
            0,
        );
        session.handle(Packet::TeamChanged { player_id: 1, team: Team::Red }, 0);
        session.handle(Packet::PlayerJoined { player: entry(2, Team::Spectator) }, 0);

        let out = session.handle(Packet::TeamChanged { player_id: 2, team: Team::Blue }, 0);
        assert_eq!(out, vec![Packet::StartMatch { room_id: 1 }]);

        let again = session.handle(Packet::TeamChanged { player_id: 2, team: Team::Blue }, 0);
        assert!(again.is_empty());
    }

    #[test]
    fn test_match_stop_drops_loop() {
        let mut session = started(1);
        session.handle(Packet::StartGameLoop { roster: roster(), snapshot: None }, 0);
        session.handle(Packet::MatchStopped { score: Score::default() }, 10);

        assert!(!session.is_authority());
        assert!(!session.is_running());
    }
}
