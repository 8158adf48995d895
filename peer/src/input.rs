//! Headless input generation
//!
//! Peers run without a window, so held buttons come from a simple planner
//! that chases the ball and kicks it toward the opponent's goal. It is good
//! enough to keep the simulation busy while exercising authority transfers.

use shared::{InputState, Team, Vector2, BALL_RADIUS, FIELD_HEIGHT, FIELD_WIDTH, KICK_REACH, PLAYER_RADIUS};

/// Positions closer than this on an axis count as reached
const DEADZONE: f32 = 4.0;

/// Drives one player toward the spot behind the ball
#[derive(Debug, Clone, Copy)]
pub struct BallChaser {
    team: Team,
}

impl BallChaser {
    pub fn new(team: Team) -> Self {
        Self { team }
    }

    pub fn set_team(&mut self, team: Team) {
        self.team = team;
    }

    /// Centre of the goal this team attacks. Red attacks the right side.
    pub fn target_goal(&self) -> Option<Vector2> {
        match self.team {
            Team::Red => Some(Vector2::new(FIELD_WIDTH, FIELD_HEIGHT / 2.0)),
            Team::Blue => Some(Vector2::new(0.0, FIELD_HEIGHT / 2.0)),
            Team::Spectator => None,
        }
    }

    /// Buttons to hold given our position and the ball's.
    pub fn plan(&self, me: Vector2, ball: Vector2) -> InputState {
        let Some(goal) = self.target_goal() else {
            return InputState::default();
        };

        let shot = goal.sub(&ball).normalize();
        let approach = ball.sub(&shot.scale(BALL_RADIUS + PLAYER_RADIUS));
        let delta = approach.sub(&me);

        let gap = me.distance(&ball) - BALL_RADIUS - PLAYER_RADIUS;
        let behind_ball = me.sub(&ball).dot(&shot) < 0.0;

        InputState {
            up: delta.y < -DEADZONE,
            down: delta.y > DEADZONE,
            left: delta.x < -DEADZONE,
            right: delta.x > DEADZONE,
            kick: gap < KICK_REACH && behind_ball,
            ability: false,
        }
    }
}
