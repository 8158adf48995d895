use crate::game_loop::LoopTimer;
use crate::physics::PhysicsWorld;
use crate::state::MatchState;
use crate::timers::Timers;
use crate::{
    Packet, PeerId, PowerUp, PowerUpId, PowerUpKind, Vector2, ABILITY_DURATION_MS,
    POWER_UP_LIFETIME_MS, POWER_UP_MARGIN, POWER_UP_SPAWN_MAX_MS, POWER_UP_SPAWN_MIN_MS,
    SIZE_BOOST_SCALE,
};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// A timed effect a power-up leaves on a player
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ability {
    SpeedBoost,
    Size,
    SuperKick,
    Frozen,
}

impl Ability {
    /// Freeze lands on the opponents and lasts half as long as the buffs.
    pub fn duration_ms(self) -> u64 {
        match self {
            Ability::Frozen => ABILITY_DURATION_MS / 2,
            _ => ABILITY_DURATION_MS,
        }
    }

    /// Abilities currently switched on for a player.
    pub fn active_on(abilities: &crate::Abilities) -> Vec<Ability> {
        let mut active = Vec::new();
        if abilities.speed_boost {
            active.push(Ability::SpeedBoost);
        }
        if abilities.size_scale != 1.0 {
            active.push(Ability::Size);
        }
        if abilities.super_kick {
            active.push(Ability::SuperKick);
        }
        if abilities.frozen {
            active.push(Ability::Frozen);
        }
        active
    }
}

/// Places power-ups at random spots on a random 10-20s cadence and resolves
/// pickups into abilities.
#[derive(Debug, Clone)]
pub struct PowerUpSpawner {
    rng: StdRng,
    next_id: PowerUpId,
}

impl PowerUpSpawner {
    pub fn new(seed: u64) -> Self {
        PowerUpSpawner {
            rng: StdRng::seed_from_u64(seed),
            next_id: 1,
        }
    }

    /// Continues numbering after power-ups inherited from a previous authority.
    /// Numbering wraps back to 1 once the id space runs out.
    pub fn continue_after(&mut self, existing: &[PowerUp]) {
        let max = existing.iter().map(|p| p.id).max();
        if let Some(next) = max.and_then(|max| max.checked_add(1)) {
            self.next_id = self.next_id.max(next);
        }
    }

    pub fn schedule_next(&mut self, timers: &mut Timers<LoopTimer>, now_ms: u64) -> u64 {
        let delay = self
            .rng
            .gen_range(POWER_UP_SPAWN_MIN_MS..POWER_UP_SPAWN_MAX_MS);
        let at = now_ms + delay;
        timers.schedule(LoopTimer::SpawnPowerUp, at);
        at
    }

    /// Handles a due spawn timer. The next spawn is always rescheduled, but
    /// nothing appears while the match is paused or stopped.
    pub fn spawn(
        &mut self,
        state: &mut MatchState,
        world: &mut PhysicsWorld,
        timers: &mut Timers<LoopTimer>,
        now_ms: u64,
    ) -> Option<Packet> {
        self.schedule_next(timers, now_ms);
        if !state.running || state.paused {
            return None;
        }

        let field = *world.field();
        let id = self.next_id;
        self.next_id = id.checked_add(1).unwrap_or(1);

        let kind = PowerUpKind::ALL[self.rng.gen_range(0..PowerUpKind::ALL.len())];
        let position = Vector2::new(
            POWER_UP_MARGIN + self.rng.gen::<f32>() * (field.width - 2.0 * POWER_UP_MARGIN),
            POWER_UP_MARGIN + self.rng.gen::<f32>() * (field.height - 2.0 * POWER_UP_MARGIN),
        );

        state.power_ups.push(PowerUp {
            id,
            kind,
            position,
            spawned_at: now_ms,
        });
        world.add_sensor(id, position);
        timers.schedule(LoopTimer::ExpirePowerUp(id), now_ms + POWER_UP_LIFETIME_MS);

        debug!("Spawned {kind:?} power-up {id} at ({:.0}, {:.0})", position.x, position.y);
        Some(Packet::PowerUpSpawned {
            id,
            kind,
            x: position.x,
            y: position.y,
        })
    }

    /// Drops an uncollected power-up. Returns false if it was already gone.
    pub fn expire(&self, id: PowerUpId, state: &mut MatchState, world: &mut PhysicsWorld) -> bool {
        world.remove_sensor(id);
        let removed = state.take_power_up(id).is_some();
        if removed {
            debug!("Power-up {id} expired");
        }
        removed
    }

    /// Resolves a pickup. The first touch wins; later touches of the same id
    /// find nothing and return `None`.
    pub fn collect(
        &self,
        player_id: PeerId,
        power_up_id: PowerUpId,
        state: &mut MatchState,
        world: &mut PhysicsWorld,
        timers: &mut Timers<LoopTimer>,
        now_ms: u64,
    ) -> Option<Packet> {
        if !state.players.contains_key(&player_id) {
            return None;
        }
        let power_up = state.take_power_up(power_up_id)?;
        world.remove_sensor(power_up_id);
        timers.cancel(&LoopTimer::ExpirePowerUp(power_up_id));

        match power_up.kind {
            PowerUpKind::Speed => grant(player_id, Ability::SpeedBoost, state, world, timers, now_ms),
            PowerUpKind::Size => grant(player_id, Ability::Size, state, world, timers, now_ms),
            PowerUpKind::Kick => grant(player_id, Ability::SuperKick, state, world, timers, now_ms),
            PowerUpKind::Freeze => {
                for opponent in state.opponents_of(player_id) {
                    grant(opponent, Ability::Frozen, state, world, timers, now_ms);
                }
            }
        }

        debug!("Player {player_id} collected {:?} power-up {power_up_id}", power_up.kind);
        Some(Packet::PowerUpCollected {
            player_id,
            kind: power_up.kind,
            power_up_id,
        })
    }
}

/// Switches an ability on and (re)arms its expiry.
pub fn grant(
    player_id: PeerId,
    ability: Ability,
    state: &mut MatchState,
    world: &mut PhysicsWorld,
    timers: &mut Timers<LoopTimer>,
    now_ms: u64,
) {
    let Some(player) = state.players.get_mut(&player_id) else {
        return;
    };
    match ability {
        Ability::SpeedBoost => player.abilities.speed_boost = true,
        Ability::SuperKick => player.abilities.super_kick = true,
        Ability::Frozen => player.abilities.frozen = true,
        Ability::Size => {
            player.abilities.size_scale = SIZE_BOOST_SCALE;
            world.set_player_scale(player_id, SIZE_BOOST_SCALE);
        }
    }
    timers.schedule(
        LoopTimer::AbilityExpiry(player_id, ability),
        now_ms + ability.duration_ms(),
    );
}

/// Switches an ability off.
pub fn revoke(player_id: PeerId, ability: Ability, state: &mut MatchState, world: &mut PhysicsWorld) {
    let Some(player) = state.players.get_mut(&player_id) else {
        return;
    };
    match ability {
        Ability::SpeedBoost => player.abilities.speed_boost = false,
        Ability::SuperKick => player.abilities.super_kick = false,
        Ability::Frozen => player.abilities.frozen = false,
        Ability::Size => {
            player.abilities.size_scale = 1.0;
            world.set_player_scale(player_id, 1.0);
        }
    }
}
