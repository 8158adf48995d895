use crate::physics::Field;
use crate::{
    Abilities, GameSnapshot, InputState, PeerId, PlayerSnapshot, PowerUp, PowerUpId, RosterEntry,
    Score, Team, Vector2,
};
use std::collections::BTreeMap;

/// Vertical gap between teammates on the kickoff line
const SPAWN_SPACING: f32 = 50.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PeerId,
    pub name: String,
    pub team: Team,
    pub position: Vector2,
    pub velocity: Vector2,
    pub input: InputState,
    pub abilities: Abilities,
}

impl Player {
    pub fn new(id: PeerId, name: impl Into<String>, team: Team) -> Self {
        Player {
            id,
            name: name.into(),
            team,
            position: Vector2::ZERO,
            velocity: Vector2::ZERO,
            input: InputState::default(),
            abilities: Abilities::default(),
        }
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            name: self.name.clone(),
            team: self.team,
            position: self.position,
            velocity: self.velocity,
            abilities: self.abilities,
            ability_remaining_ms: Vec::new(),
        }
    }
}

/// Everything the authority owns about a running match.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub tick: u32,
    pub score: Score,
    pub running: bool,
    pub paused: bool,
    pub players: BTreeMap<PeerId, Player>,
    pub power_ups: Vec<PowerUp>,
    pub ball: Vector2,
    pub ball_velocity: Vector2,
}

impl Default for MatchState {
    fn default() -> Self {
        MatchState {
            tick: 0,
            score: Score::default(),
            running: false,
            paused: false,
            players: BTreeMap::new(),
            power_ups: Vec::new(),
            ball: Field::default().center(),
            ball_velocity: Vector2::ZERO,
        }
    }
}

impl MatchState {
    pub fn from_roster(roster: &[RosterEntry]) -> Self {
        let mut state = MatchState::default();
        for entry in roster {
            state.add_player(entry);
        }
        state
    }

    /// Adds or replaces a player. Returns the previous entry if one existed.
    pub fn add_player(&mut self, entry: &RosterEntry) -> Option<Player> {
        self.players
            .insert(entry.id, Player::new(entry.id, entry.name.clone(), entry.team))
    }

    pub fn remove_player(&mut self, id: PeerId) -> Option<Player> {
        self.players.remove(&id)
    }

    pub fn set_team(&mut self, id: PeerId, team: Team) -> bool {
        match self.players.get_mut(&id) {
            Some(player) => {
                player.team = team;
                true
            }
            None => false,
        }
    }

    pub fn team_members(&self, team: Team) -> Vec<PeerId> {
        self.players
            .values()
            .filter(|p| p.team == team)
            .map(|p| p.id)
            .collect()
    }

    /// Players on the other active team. Spectators have no opponents.
    pub fn opponents_of(&self, id: PeerId) -> Vec<PeerId> {
        self.players
            .get(&id)
            .and_then(|p| p.team.opponent())
            .map(|team| self.team_members(team))
            .unwrap_or_default()
    }

    pub fn record_goal(&mut self, team: Team) -> Score {
        self.score.increment(team);
        self.score
    }

    pub fn take_power_up(&mut self, id: PowerUpId) -> Option<PowerUp> {
        let index = self.power_ups.iter().position(|p| p.id == id)?;
        Some(self.power_ups.remove(index))
    }

    /// Kickoff position of the `index`-th of `count` players on `team`.
    pub fn spawn_position(field: &Field, team: Team, index: usize, count: usize) -> Vector2 {
        let x = match team {
            Team::Blue => field.width * 0.75,
            _ => field.width * 0.25,
        };
        let offset = index as f32 - count as f32 / 2.0;
        Vector2::new(x, field.height / 2.0 + offset * SPAWN_SPACING)
    }

    /// Moves every active player to their kickoff spot.
    pub fn place_at_kickoff(&mut self, field: &Field) {
        for team in [Team::Red, Team::Blue] {
            let members = self.team_members(team);
            let count = members.len();
            for (index, id) in members.into_iter().enumerate() {
                if let Some(player) = self.players.get_mut(&id) {
                    player.position = Self::spawn_position(field, team, index, count);
                    player.velocity = Vector2::ZERO;
                }
            }
        }
    }

    pub fn snapshot(&self, timestamp: u64) -> GameSnapshot {
        GameSnapshot {
            tick: self.tick,
            timestamp,
            ball: self.ball,
            ball_velocity: self.ball_velocity,
            players: self
                .players
                .iter()
                .map(|(&id, p)| (id, p.snapshot()))
                .collect(),
            power_ups: self.power_ups.clone(),
            score: self.score,
        }
    }
}
