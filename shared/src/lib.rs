//! Wire protocol, field constants and the authority-side simulation shared by
//! the relay and every peer.
//!
//! Any connected peer may be promoted to authority mid-match, so the whole
//! simulation (physics, match state, power-ups, tick loop) lives here rather
//! than in the relay.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub mod game_loop;
pub mod physics;
pub mod powerups;
pub mod state;
pub mod timers;

pub use physics::Vector2;

pub type PeerId = u32;
pub type RoomId = u32;
pub type PowerUpId = u32;

pub const PROTOCOL_VERSION: u32 = 1;

pub const FIELD_WIDTH: f32 = 800.0;
pub const FIELD_HEIGHT: f32 = 400.0;
pub const GOAL_WIDTH: f32 = 100.0;
pub const BALL_RADIUS: f32 = 10.0;
pub const PLAYER_RADIUS: f32 = 15.0;
pub const TICK_RATE: u32 = 60;

pub const PLAYER_ACCELERATION: f32 = 900.0;
pub const SPEED_BOOST_MULTIPLIER: f32 = 1.5;
pub const KICK_REACH: f32 = 10.0;
pub const KICK_FORCE: f32 = 6000.0;
pub const SUPER_KICK_MULTIPLIER: f32 = 3.0;
pub const SIZE_BOOST_SCALE: f32 = 1.5;

pub const ABILITY_DURATION_MS: u64 = 10_000;
pub const POWER_UP_LIFETIME_MS: u64 = 10_000;
pub const POWER_UP_SPAWN_MIN_MS: u64 = 10_000;
pub const POWER_UP_SPAWN_MAX_MS: u64 = 20_000;
pub const POWER_UP_MARGIN: f32 = 100.0;
pub const POWER_UP_PICKUP_RADIUS: f32 = 20.0;

/// Current wall-clock time in milliseconds since the unix epoch
pub fn timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    Red,
    Blue,
    Spectator,
}

impl Team {
    /// Red and blue players own a body while the match runs; spectators don't.
    pub fn is_active(self) -> bool {
        !matches!(self, Team::Spectator)
    }

    pub fn opponent(self) -> Option<Team> {
        match self {
            Team::Red => Some(Team::Blue),
            Team::Blue => Some(Team::Red),
            Team::Spectator => None,
        }
    }

    /// True when at least one red and one blue player are among `teams`.
    pub fn both_present(teams: impl IntoIterator<Item = Team>) -> bool {
        let (mut red, mut blue) = (false, false);
        for team in teams {
            red |= team == Team::Red;
            blue |= team == Team::Blue;
        }
        red && blue
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Team::Red => "red",
            Team::Blue => "blue",
            Team::Spectator => "spectator",
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown team name: {0:?}")]
pub struct TeamParseError(pub String);

impl FromStr for Team {
    type Err = TeamParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "red" => Ok(Team::Red),
            "blue" => Ok(Team::Blue),
            "spectator" => Ok(Team::Spectator),
            other => Err(TeamParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowerUpKind {
    Speed,
    Size,
    Kick,
    Freeze,
}

impl PowerUpKind {
    pub const ALL: [PowerUpKind; 4] = [
        PowerUpKind::Speed,
        PowerUpKind::Size,
        PowerUpKind::Kick,
        PowerUpKind::Freeze,
    ];
}

/// Held buttons for one player, overwritten by every `PlayerInput`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputState {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
    pub kick: bool,
    pub ability: bool,
}

/// Transient effects granted by power-ups
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Abilities {
    pub speed_boost: bool,
    pub super_kick: bool,
    pub frozen: bool,
    pub size_scale: f32,
}

impl Default for Abilities {
    fn default() -> Self {
        Self {
            speed_boost: false,
            super_kick: false,
            frozen: false,
            size_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub red: u32,
    pub blue: u32,
}

impl Score {
    pub fn increment(&mut self, team: Team) {
        match team {
            Team::Red => self.red += 1,
            Team::Blue => self.blue += 1,
            Team::Spectator => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerUp {
    pub id: PowerUpId,
    pub kind: PowerUpKind,
    pub position: Vector2,
    pub spawned_at: u64,
}

/// Lobby-level view of a room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: PeerId,
    pub name: String,
    pub team: Team,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub id: PeerId,
    pub name: String,
    pub team: Team,
    pub position: Vector2,
    pub velocity: Vector2,
    pub abilities: Abilities,
    /// Time left on each active ability, so a new authority keeps the
    /// original expiry instead of granting a fresh full duration.
    pub ability_remaining_ms: Vec<(powerups::Ability, u64)>,
}

/// Full match state emitted by the authority once per tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub tick: u32,
    pub timestamp: u64,
    pub ball: Vector2,
    pub ball_velocity: Vector2,
    pub players: BTreeMap<PeerId, PlayerSnapshot>,
    pub power_ups: Vec<PowerUp>,
    pub score: Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    HighPing,
    UnstablePing,
    LagReports,
    PlayerReports,
    Unresponsive,
    HostDisconnected,
}

impl PauseReason {
    pub fn message(self) -> &'static str {
        match self {
            PauseReason::HighPing => "High host ping detected. Transferring host...",
            PauseReason::UnstablePing => "Unstable host connection detected. Transferring host...",
            PauseReason::LagReports => "Host connection problems detected. Transferring host...",
            PauseReason::PlayerReports => "Players reported lag from the host. Transferring host...",
            PauseReason::Unresponsive => "Host stopped responding. Transferring host...",
            PauseReason::HostDisconnected => "Host disconnected. Transferring host...",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    NoSuitableHost,
}

impl CancelReason {
    pub fn message(self) -> &'static str {
        match self {
            CancelReason::NoSuitableHost => {
                "No suitable host found. Resuming with the current host."
            }
        }
    }
}

/// Phase of the authority transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferPhase {
    Idle,
    Paused,
    SelectingHost,
    Transferring,
    ReadyCheck,
    Resuming,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    // Peer -> relay
    JoinRoom {
        room_id: RoomId,
        name: String,
        client_version: u32,
    },
    LeaveRoom,
    ChangeTeam {
        room_id: RoomId,
        team: String,
    },
    StartMatch {
        room_id: RoomId,
    },
    StopMatch {
        room_id: RoomId,
    },
    PlayerInput {
        room_id: RoomId,
        input: InputState,
    },
    ConnectionStats {
        ping: f32,
        connection_speed: f32,
    },
    Ping {
        timestamp: u64,
    },
    ReportLag {
        target_id: PeerId,
        details: String,
    },
    PlayerReady,
    LoopStopped {
        snapshot: Option<GameSnapshot>,
    },

    // Authority -> relay -> peers
    GameState(GameSnapshot),
    Goal {
        team: Team,
        score: Score,
    },
    PowerUpSpawned {
        id: PowerUpId,
        kind: PowerUpKind,
        x: f32,
        y: f32,
    },
    PowerUpCollected {
        player_id: PeerId,
        kind: PowerUpKind,
        power_up_id: PowerUpId,
    },

    // Relay -> peer
    Joined {
        peer_id: PeerId,
        room_id: RoomId,
        authority: Option<PeerId>,
        roster: Vec<RosterEntry>,
    },
    Rejected {
        reason: String,
    },
    Pong {
        timestamp: u64,
    },
    PlayerJoined {
        player: RosterEntry,
    },
    PlayerLeft {
        player_id: PeerId,
    },
    TeamChanged {
        player_id: PeerId,
        team: Team,
    },
    MatchStarted {
        authority: PeerId,
        roster: Vec<RosterEntry>,
    },
    MatchStopped {
        score: Score,
    },
    ForwardedInput {
        player_id: PeerId,
        input: InputState,
    },
    StartGameLoop {
        roster: Vec<RosterEntry>,
        snapshot: Option<GameSnapshot>,
    },
    StopGameLoop,
    HostChanged {
        old_host: Option<PeerId>,
        new_host: PeerId,
        during_game: bool,
    },
    GamePaused {
        reason: PauseReason,
        message: String,
    },
    GameResumed,
    HostTransferCancelled {
        reason: CancelReason,
        message: String,
    },
    HostTransferStatus {
        phase: TransferPhase,
        ready_players: Vec<PeerId>,
        total_players: usize,
        current_host: Option<PeerId>,
        attempts: u32,
    },
    ReadyCheckStarted {
        timeout_seconds: u64,
    },
    PlayerReadyUpdate {
        player_id: PeerId,
        ready_count: usize,
        total_players: usize,
    },
    ReadyCheckFinished {
        ready_players: Vec<PeerId>,
    },
}
