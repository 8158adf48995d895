use crate::{
    PeerId, PowerUpId, Team, BALL_RADIUS, FIELD_HEIGHT, FIELD_WIDTH, GOAL_WIDTH, PLAYER_RADIUS,
    POWER_UP_PICKUP_RADIUS,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Frames longer than this are clamped before integration.
pub const MAX_STEP_MS: f32 = 50.0;
const MAX_SUBSTEPS: u32 = 32;

pub const BALL_MASS: f32 = 1.0;
pub const PLAYER_MASS: f32 = 2.0;
pub const BALL_RESTITUTION: f32 = 0.8;
pub const PLAYER_RESTITUTION: f32 = 0.5;
/// Exponential velocity decay per second
pub const BALL_DAMPING: f32 = 0.6;
pub const PLAYER_DAMPING: f32 = 3.0;

///Represents a vector in 2D space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector2 {
    ///Value along the x-axis.
    /// Positive direction is towards the blue goal.
    pub x: f32,
    ///Value along the y-axis.
    /// Positive direction is down the screen.
    pub y: f32,
}

impl Vector2 {
    pub const ZERO: Vector2 = Vector2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Vector2 { x, y }
    }

    ///Returns the magnitude of the vector.
    pub fn magnitude(&self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    ///Returns the normalized vector.
    pub fn normalize(&self) -> Vector2 {
        let mag = self.magnitude();
        if mag == 0.0 {
            Vector2::ZERO
        } else {
            self.scale(1.0 / mag)
        }
    }

    ///Returns the scaled vector.
    pub fn scale(&self, scalar: f32) -> Vector2 {
        Vector2 {
            x: self.x * scalar,
            y: self.y * scalar,
        }
    }

    ///Returns the sum of two vectors.
    pub fn add(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x + other.x,
            y: self.y + other.y,
        }
    }

    ///Returns `self - other`.
    pub fn sub(&self, other: &Vector2) -> Vector2 {
        Vector2 {
            x: self.x - other.x,
            y: self.y - other.y,
        }
    }

    pub fn dot(&self, other: &Vector2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn distance(&self, other: &Vector2) -> f32 {
        self.sub(other).magnitude()
    }
}

/// Rectangular pitch with a goal mouth centred on each short side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Field {
    pub width: f32,
    pub height: f32,
    pub goal_width: f32,
}

impl Default for Field {
    fn default() -> Self {
        Field {
            width: FIELD_WIDTH,
            height: FIELD_HEIGHT,
            goal_width: GOAL_WIDTH,
        }
    }
}

impl Field {
    pub fn center(&self) -> Vector2 {
        Vector2::new(self.width / 2.0, self.height / 2.0)
    }

    /// True when `y` lies between the posts of either goal.
    pub fn in_goal_mouth(&self, y: f32) -> bool {
        (y - self.height / 2.0).abs() < self.goal_width / 2.0
    }
}

///A circular rigid body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Body {
    pub position: Vector2,
    pub velocity: Vector2,
    pub radius: f32,
    pub mass: f32,
    pub restitution: f32,
    pub damping: f32,
    force: Vector2,
}

impl Body {
    pub fn ball(position: Vector2) -> Self {
        Body {
            position,
            velocity: Vector2::ZERO,
            radius: BALL_RADIUS,
            mass: BALL_MASS,
            restitution: BALL_RESTITUTION,
            damping: BALL_DAMPING,
            force: Vector2::ZERO,
        }
    }

    pub fn player(position: Vector2) -> Self {
        Body {
            position,
            velocity: Vector2::ZERO,
            radius: PLAYER_RADIUS,
            mass: PLAYER_MASS,
            restitution: PLAYER_RESTITUTION,
            damping: PLAYER_DAMPING,
            force: Vector2::ZERO,
        }
    }

    pub fn apply_force(&mut self, force: Vector2) {
        self.force = self.force.add(&force);
    }

    pub fn apply_impulse(&mut self, impulse: Vector2) {
        self.velocity = self.velocity.add(&impulse.scale(1.0 / self.mass));
    }

    fn integrate(&mut self, dt: f32) {
        let acceleration = self.force.scale(1.0 / self.mass);
        self.velocity = self
            .velocity
            .add(&acceleration.scale(dt))
            .scale((-self.damping * dt).exp());
        self.position = self.position.add(&self.velocity.scale(dt));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionEvent {
    Goal { scorer: Team },
    PowerUpTouched { player_id: PeerId, power_up_id: PowerUpId },
}

/// Owns every body on the pitch and turns a frame delta into collision events.
///
/// Ball and players are solid circles. Power-ups are sensors: they never push
/// anything, they only report which player reached them first.
#[derive(Debug, Clone)]
pub struct PhysicsWorld {
    field: Field,
    ball: Body,
    players: BTreeMap<PeerId, Body>,
    sensors: BTreeMap<PowerUpId, Vector2>,
}

impl Default for PhysicsWorld {
    fn default() -> Self {
        PhysicsWorld::new(Field::default())
    }
}

impl PhysicsWorld {
    pub fn new(field: Field) -> Self {
        PhysicsWorld {
            ball: Body::ball(field.center()),
            field,
            players: BTreeMap::new(),
            sensors: BTreeMap::new(),
        }
    }

    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn ball(&self) -> &Body {
        &self.ball
    }

    pub fn set_ball(&mut self, position: Vector2, velocity: Vector2) {
        self.ball.position = position;
        self.ball.velocity = velocity;
    }

    /// Puts the ball back on the centre spot at rest.
    pub fn reset_ball(&mut self) {
        self.set_ball(self.field.center(), Vector2::ZERO);
        self.ball.force = Vector2::ZERO;
    }

    pub fn add_player(&mut self, id: PeerId, position: Vector2) {
        self.players.insert(id, Body::player(position));
    }

    pub fn remove_player(&mut self, id: PeerId) -> Option<Body> {
        self.players.remove(&id)
    }

    pub fn player(&self, id: PeerId) -> Option<&Body> {
        self.players.get(&id)
    }

    pub fn player_mut(&mut self, id: PeerId) -> Option<&mut Body> {
        self.players.get_mut(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Rescales a player's collision radius. Returns false for unknown players.
    pub fn set_player_scale(&mut self, id: PeerId, scale: f32) -> bool {
        match self.players.get_mut(&id) {
            Some(body) => {
                body.radius = PLAYER_RADIUS * scale;
                true
            }
            None => false,
        }
    }

    pub fn add_sensor(&mut self, id: PowerUpId, position: Vector2) {
        self.sensors.insert(id, position);
    }

    pub fn remove_sensor(&mut self, id: PowerUpId) -> bool {
        self.sensors.remove(&id).is_some()
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn apply_force(&mut self, id: PeerId, force: Vector2) -> bool {
        match self.players.get_mut(&id) {
            Some(body) => {
                body.apply_force(force);
                true
            }
            None => false,
        }
    }

    pub fn apply_ball_impulse(&mut self, impulse: Vector2) {
        self.ball.apply_impulse(impulse);
    }

    /// Distance between the surfaces of a player and the ball.
    pub fn gap_to_ball(&self, id: PeerId) -> Option<f32> {
        self.players.get(&id).map(|body| {
            body.position.distance(&self.ball.position) - body.radius - self.ball.radius
        })
    }

    /// Advances the simulation by `dt_ms` milliseconds.
    ///
    /// The delta is clamped to [`MAX_STEP_MS`] and split into substeps so no
    /// body moves more than half the ball radius per substep. A goal ends the
    /// step early with the ball already back on the centre spot.
    pub fn step(&mut self, dt_ms: f32) -> Vec<CollisionEvent> {
        let mut events = Vec::new();
        let dt = dt_ms.clamp(0.0, MAX_STEP_MS) / 1000.0;

        if dt > 0.0 {
            let substeps = self.calculate_required_substeps(dt);
            let substep_dt = dt / substeps as f32;

            for _ in 0..substeps {
                if let Some(scorer) = self.substep(substep_dt) {
                    self.reset_ball();
                    events.push(CollisionEvent::Goal { scorer });
                    break;
                }
            }
        }

        self.collect_sensor_contacts(&mut events);

        self.ball.force = Vector2::ZERO;
        for body in self.players.values_mut() {
            body.force = Vector2::ZERO;
        }

        events
    }

    /// Calculates physics substeps required to prevent collision tunneling
    fn calculate_required_substeps(&self, dt: f32) -> u32 {
        const SAFETY_FACTOR: f32 = 0.5;

        let fastest = self
            .players
            .values()
            .chain(std::iter::once(&self.ball))
            .map(|body| {
                body.velocity
                    .add(&body.force.scale(dt / body.mass))
                    .magnitude()
            })
            .fold(0.0_f32, f32::max);

        let max_movement_per_step = BALL_RADIUS * SAFETY_FACTOR;
        let max_movement_this_tick = fastest * dt;

        ((max_movement_this_tick / max_movement_per_step).ceil() as u32).clamp(1, MAX_SUBSTEPS)
    }

    fn substep(&mut self, dt: f32) -> Option<Team> {
        self.ball.integrate(dt);
        for body in self.players.values_mut() {
            body.integrate(dt);
        }

        // Player pairs: clone out, resolve, write back.
        let ids: Vec<PeerId> = self.players.keys().copied().collect();
        for (i, &a_id) in ids.iter().enumerate() {
            for &b_id in &ids[i + 1..] {
                let (Some(mut a), Some(mut b)) =
                    (self.players.get(&a_id).copied(), self.players.get(&b_id).copied())
                else {
                    continue;
                };
                if resolve_contact(&mut a, &mut b) {
                    self.players.insert(a_id, a);
                    self.players.insert(b_id, b);
                }
            }
        }

        for body in self.players.values_mut() {
            resolve_contact(body, &mut self.ball);
        }

        let field = self.field;
        for body in self.players.values_mut() {
            confine_player(body, &field);
        }

        self.bounce_ball()
    }

    /// Reflects the ball off the walls and reports a goal once its centre
    /// crosses a goal line inside the mouth.
    fn bounce_ball(&mut self) -> Option<Team> {
        let field = self.field;
        let ball = &mut self.ball;

        if ball.position.y < ball.radius {
            ball.position.y = ball.radius;
            ball.velocity.y = -ball.velocity.y * ball.restitution;
        } else if ball.position.y > field.height - ball.radius {
            ball.position.y = field.height - ball.radius;
            ball.velocity.y = -ball.velocity.y * ball.restitution;
        }

        if field.in_goal_mouth(ball.position.y) {
            if ball.position.x < 0.0 {
                return Some(Team::Blue);
            }
            if ball.position.x > field.width {
                return Some(Team::Red);
            }
            return None;
        }

        if ball.position.x < ball.radius {
            ball.position.x = ball.radius;
            ball.velocity.x = -ball.velocity.x * ball.restitution;
        } else if ball.position.x > field.width - ball.radius {
            ball.position.x = field.width - ball.radius;
            ball.velocity.x = -ball.velocity.x * ball.restitution;
        }

        None
    }

    fn collect_sensor_contacts(&self, events: &mut Vec<CollisionEvent>) {
        for (&power_up_id, position) in &self.sensors {
            let toucher = self.players.iter().find(|(_, body)| {
                body.position.distance(position) < body.radius + POWER_UP_PICKUP_RADIUS
            });
            if let Some((&player_id, _)) = toucher {
                events.push(CollisionEvent::PowerUpTouched {
                    player_id,
                    power_up_id,
                });
            }
        }
    }
}

/// Pushes two overlapping circles apart and exchanges momentum along the
/// contact normal. Returns true if they were touching.
fn resolve_contact(a: &mut Body, b: &mut Body) -> bool {
    let delta = b.position.sub(&a.position);
    let distance = delta.magnitude();
    let min_distance = a.radius + b.radius;

    if distance >= min_distance {
        return false;
    }

    let normal = if distance < 1e-4 {
        Vector2::new(1.0, 0.0)
    } else {
        delta.scale(1.0 / distance)
    };

    let overlap = min_distance - distance;
    let total_mass = a.mass + b.mass;
    a.position = a.position.sub(&normal.scale(overlap * b.mass / total_mass));
    b.position = b.position.add(&normal.scale(overlap * a.mass / total_mass));

    let closing = b.velocity.sub(&a.velocity).dot(&normal);
    if closing < 0.0 {
        let restitution = a.restitution.min(b.restitution);
        let impulse = -(1.0 + restitution) * closing / (1.0 / a.mass + 1.0 / b.mass);
        a.velocity = a.velocity.sub(&normal.scale(impulse / a.mass));
        b.velocity = b.velocity.add(&normal.scale(impulse / b.mass));
    }

    true
}

fn confine_player(body: &mut Body, field: &Field) {
    let r = body.radius;
    if body.position.x < r {
        body.position.x = r;
        body.velocity.x = 0.0;
    } else if body.position.x > field.width - r {
        body.position.x = field.width - r;
        body.velocity.x = 0.0;
    }
    if body.position.y < r {
        body.position.y = r;
        body.velocity.y = 0.0;
    } else if body.position.y > field.height - r {
        body.position.y = field.height - r;
        body.velocity.y = 0.0;
    }
}
