use crate::physics::{CollisionEvent, PhysicsWorld, MAX_STEP_MS};
use crate::powerups::{self, Ability, PowerUpSpawner};
use crate::state::MatchState;
use crate::timers::Timers;
use crate::{
    Abilities, GameSnapshot, InputState, Packet, PeerId, PowerUpId, RosterEntry, Score, Team,
    Vector2, KICK_FORCE, KICK_REACH, PLAYER_ACCELERATION, POWER_UP_LIFETIME_MS,
    SPEED_BOOST_MULTIPLIER, SUPER_KICK_MULTIPLIER,
};
use log::{debug, info};

/// Deadlines owned by a running loop. Dropping the loop drops them all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LoopTimer {
    SpawnPowerUp,
    ExpirePowerUp(PowerUpId),
    AbilityExpiry(PeerId, Ability),
}

/// What one tick produced: the snapshot to broadcast and any discrete events
/// (goals, spawns, pickups) that happened during it.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutput {
    pub snapshot: GameSnapshot,
    pub events: Vec<Packet>,
}

/// The authoritative simulation, run by whichever peer currently holds
/// authority.
///
/// A loop is created either for a fresh match ([`GameLoop::start`]) or to
/// pick up where a previous authority stopped ([`GameLoop::resume_from`]).
/// Only one peer may run one at a time; the relay enforces that.
#[derive(Debug)]
pub struct GameLoop {
    state: MatchState,
    world: PhysicsWorld,
    spawner: PowerUpSpawner,
    timers: Timers<LoopTimer>,
    last_tick_ms: u64,
}

impl GameLoop {
    /// Starts a new match from a lobby roster: score reset, every active
    /// player on their kickoff spot, ball on the centre spot.
    pub fn start(mut state: MatchState, now_ms: u64, seed: u64) -> Self {
        let world = PhysicsWorld::default();
        state.running = true;
        state.paused = false;
        state.tick = 0;
        state.score = Score::default();
        state.power_ups.clear();
        state.ball = world.field().center();
        state.ball_velocity = Vector2::ZERO;
        for player in state.players.values_mut() {
            player.abilities = Abilities::default();
            player.input = InputState::default();
        }
        state.place_at_kickoff(world.field());

        let mut game = GameLoop {
            state,
            world,
            spawner: PowerUpSpawner::new(seed),
            timers: Timers::new(),
            last_tick_ms: now_ms,
        };
        game.create_bodies();
        game.spawner.schedule_next(&mut game.timers, now_ms);

        info!(
            "Game loop started with {} players",
            game.state.players.len()
        );
        game
    }

    /// Rebuilds a running match from the last snapshot another authority
    /// published. The roster decides who is in the match; the snapshot decides
    /// where they are. Power-up lifetimes and active abilities are re-armed
    /// against the local clock; abilities keep whatever time they had left.
    pub fn resume_from(
        snapshot: &GameSnapshot,
        roster: &[RosterEntry],
        now_ms: u64,
        seed: u64,
    ) -> Self {
        let world = PhysicsWorld::default();
        let field = *world.field();

        let mut state = MatchState::from_roster(roster);
        state.running = true;
        state.tick = snapshot.tick;
        state.score = snapshot.score;
        state.ball = snapshot.ball;
        state.ball_velocity = snapshot.ball_velocity;
        state.power_ups = snapshot.power_ups.clone();

        for team in [Team::Red, Team::Blue] {
            let members = state.team_members(team);
            let count = members.len();
            for (index, id) in members.into_iter().enumerate() {
                let Some(player) = state.players.get_mut(&id) else {
                    continue;
                };
                match snapshot.players.get(&id) {
                    Some(remote) => {
                        player.position = remote.position;
                        player.velocity = remote.velocity;
                        player.abilities = remote.abilities;
                    }
                    None => {
                        player.position = MatchState::spawn_position(&field, team, index, count);
                    }
                }
            }
        }

        let mut spawner = PowerUpSpawner::new(seed);
        spawner.continue_after(&state.power_ups);

        let mut game = GameLoop {
            state,
            world,
            spawner,
            timers: Timers::new(),
            last_tick_ms: now_ms,
        };
        game.world.set_ball(game.state.ball, game.state.ball_velocity);
        game.create_bodies();

        for power_up in &game.state.power_ups {
            game.world.add_sensor(power_up.id, power_up.position);
            let deadline = (power_up.spawned_at + POWER_UP_LIFETIME_MS)
                .clamp(now_ms, now_ms + POWER_UP_LIFETIME_MS);
            game.timers
                .schedule(LoopTimer::ExpirePowerUp(power_up.id), deadline);
        }

        for player in game.state.players.values() {
            let carried = snapshot
                .players
                .get(&player.id)
                .map(|remote| remote.ability_remaining_ms.as_slice())
                .unwrap_or_default();
            for ability in Ability::active_on(&player.abilities) {
                let remaining = carried
                    .iter()
                    .find(|(held, _)| *held == ability)
                    .map_or(ability.duration_ms(), |&(_, ms)| ms);
                game.timers.schedule(
                    LoopTimer::AbilityExpiry(player.id, ability),
                    now_ms.saturating_add(remaining),
                );
            }
        }

        game.spawner.schedule_next(&mut game.timers, now_ms);

        info!(
            "Game loop resumed at tick {} ({}-{}) with {} power-ups on the field",
            game.state.tick,
            game.state.score.red,
            game.state.score.blue,
            game.state.power_ups.len()
        );
        game
    }

    /// Runs one simulation tick at `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> TickOutput {
        let dt_ms = now_ms.saturating_sub(self.last_tick_ms) as f32;
        self.last_tick_ms = now_ms;

        let mut events = Vec::new();
        self.run_due_timers(now_ms, &mut events);
        self.apply_inputs(dt_ms);

        for collision in self.world.step(dt_ms) {
            match collision {
                CollisionEvent::Goal { scorer } => {
                    let score = self.state.record_goal(scorer);
                    info!("Goal for {scorer}! Score {}-{}", score.red, score.blue);
                    events.push(Packet::Goal {
                        team: scorer,
                        score,
                    });
                }
                CollisionEvent::PowerUpTouched {
                    player_id,
                    power_up_id,
                } => {
                    if let Some(packet) = self.spawner.collect(
                        player_id,
                        power_up_id,
                        &mut self.state,
                        &mut self.world,
                        &mut self.timers,
                        now_ms,
                    ) {
                        events.push(packet);
                    }
                }
            }
        }

        self.sync_state_from_world();
        self.state.tick = self.state.tick.wrapping_add(1);

        TickOutput {
            snapshot: self.snapshot(now_ms),
            events,
        }
    }

    /// The match as of `now_ms`, with the time left on every running ability.
    pub fn snapshot(&self, now_ms: u64) -> GameSnapshot {
        let mut snapshot = self.state.snapshot(now_ms);
        for (&id, player) in snapshot.players.iter_mut() {
            player.ability_remaining_ms = Ability::active_on(&player.abilities)
                .into_iter()
                .filter_map(|ability| {
                    self.timers
                        .deadline(&LoopTimer::AbilityExpiry(id, ability))
                        .map(|deadline| (ability, deadline.saturating_sub(now_ms)))
                })
                .collect();
        }
        snapshot
    }

    /// Replaces a player's held input. Returns false for unknown players.
    pub fn set_input(&mut self, id: PeerId, input: InputState) -> bool {
        match self.state.players.get_mut(&id) {
            Some(player) => {
                player.input = input;
                true
            }
            None => false,
        }
    }

    pub fn add_player(&mut self, entry: &RosterEntry) {
        self.state.add_player(entry);
        if entry.team.is_active() {
            self.spawn_body(entry.id, entry.team);
        }
        debug!("Player {} joined the running match", entry.id);
    }

    pub fn remove_player(&mut self, id: PeerId) {
        self.state.remove_player(id);
        self.world.remove_player(id);
        self.timers
            .cancel_where(|key| matches!(key, LoopTimer::AbilityExpiry(pid, _) if *pid == id));
    }

    pub fn change_team(&mut self, id: PeerId, team: Team) {
        if !self.state.set_team(id, team) {
            return;
        }

        if !team.is_active() {
            let active = self
                .state
                .players
                .get(&id)
                .map(|p| Ability::active_on(&p.abilities))
                .unwrap_or_default();
            for ability in active {
                powerups::revoke(id, ability, &mut self.state, &mut self.world);
            }
            self.world.remove_player(id);
            self.timers
                .cancel_where(|key| matches!(key, LoopTimer::AbilityExpiry(pid, _) if *pid == id));
        } else if self.world.player(id).is_none() {
            self.spawn_body(id, team);
        }
    }

    /// Moves the ball, e.g. for a restart.
    pub fn place_ball(&mut self, position: Vector2, velocity: Vector2) {
        self.world.set_ball(position, velocity);
        self.state.ball = position;
        self.state.ball_velocity = velocity;
    }

    /// Ends the loop and hands back the frozen match state. All of its
    /// timers go with it.
    pub fn stop(mut self) -> MatchState {
        self.sync_state_from_world();
        info!("Game loop stopped at tick {}", self.state.tick);
        self.state
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn world(&self) -> &PhysicsWorld {
        &self.world
    }

    pub fn timers(&self) -> &Timers<LoopTimer> {
        &self.timers
    }

    fn create_bodies(&mut self) {
        for player in self.state.players.values() {
            if player.team.is_active() {
                self.world.add_player(player.id, player.position);
                if let Some(body) = self.world.player_mut(player.id) {
                    body.velocity = player.velocity;
                }
                self.world
                    .set_player_scale(player.id, player.abilities.size_scale);
            }
        }
    }

    fn spawn_body(&mut self, id: PeerId, team: Team) {
        let count = self.state.team_members(team).len();
        let position =
            MatchState::spawn_position(self.world.field(), team, count.saturating_sub(1), count);
        self.world.add_player(id, position);
        if let Some(player) = self.state.players.get_mut(&id) {
            player.position = position;
            player.velocity = Vector2::ZERO;
        }
    }

    fn run_due_timers(&mut self, now_ms: u64, events: &mut Vec<Packet>) {
        while let Some(timer) = self.timers.pop_due(now_ms) {
            match timer {
                LoopTimer::SpawnPowerUp => {
                    if let Some(packet) = self.spawner.spawn(
                        &mut self.state,
                        &mut self.world,
                        &mut self.timers,
                        now_ms,
                    ) {
                        events.push(packet);
                    }
                }
                LoopTimer::ExpirePowerUp(id) => {
                    self.spawner.expire(id, &mut self.state, &mut self.world);
                }
                LoopTimer::AbilityExpiry(id, ability) => {
                    powerups::revoke(id, ability, &mut self.state, &mut self.world);
                }
            }
        }
    }

    fn apply_inputs(&mut self, dt_ms: f32) {
        let dt = dt_ms.clamp(0.0, MAX_STEP_MS) / 1000.0;

        for player in self.state.players.values() {
            if !player.team.is_active() || player.abilities.frozen {
                continue;
            }
            let Some(body) = self.world.player(player.id) else {
                continue;
            };
            let input = player.input;

            let mut direction = Vector2::ZERO;
            if input.up {
                direction.y -= 1.0;
            }
            if input.down {
                direction.y += 1.0;
            }
            if input.left {
                direction.x -= 1.0;
            }
            if input.right {
                direction.x += 1.0;
            }

            let boost = if player.abilities.speed_boost {
                SPEED_BOOST_MULTIPLIER
            } else {
                1.0
            };
            let force = direction.scale(PLAYER_ACCELERATION * body.mass * boost);
            let toward_ball = self.world.ball().position.sub(&body.position).normalize();

            self.world.apply_force(player.id, force);

            if input.kick {
                let in_reach = self
                    .world
                    .gap_to_ball(player.id)
                    .is_some_and(|gap| gap < KICK_REACH);
                if in_reach {
                    let strength = if player.abilities.super_kick {
                        KICK_FORCE * SUPER_KICK_MULTIPLIER
                    } else {
                        KICK_FORCE
                    };
                    self.world
                        .apply_ball_impulse(toward_ball.scale(strength * dt));
                }
            }
        }
    }

    fn sync_state_from_world(&mut self) {
        for player in self.state.players.values_mut() {
            if let Some(body) = self.world.player(player.id) {
                player.position = body.position;
                player.velocity = body.velocity;
            }
        }
        let ball = self.world.ball();
        self.state.ball = ball.position;
        self.state.ball_velocity = ball.velocity;
    }
}
