//! # Headless Match Peer
//!
//! A peer joins a room on the relay, picks a team and plays. At any moment it
//! is in one of two roles:
//!
//! ### Spectator
//! Sends its held buttons as `PlayerInput`, keeps the latest `GameState`
//! snapshot the authority published and complains with `ReportLag` when
//! those snapshots stop arriving.
//!
//! ### Authority
//! Owns the [`shared::game_loop::GameLoop`], applies every forwarded input,
//! ticks at a fixed rate and publishes one snapshot per tick plus goal and
//! power-up events. On `StopGameLoop` it stops immediately and hands its
//! final snapshot back so the next authority can resume from it.
//!
//! In both roles the peer sends a `Ping` and a `ConnectionStats` heartbeat
//! every second and acknowledges ready checks, which is what the relay uses
//! to decide who should be the authority.
//!
//! ## Module Organization
//!
//! - `session`: protocol state and the per-role dispatch, no IO
//! - `input`: the ball-chasing planner standing in for a keyboard
//! - `network`: UDP transport with optional simulated latency
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use peer::network::Client;
//! use peer::session::{PeerSession, SessionConfig};
//! use shared::Team;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = PeerSession::new(SessionConfig {
//!         room_id: 1,
//!         name: "ada".to_string(),
//!         team: Team::Red,
//!         ..SessionConfig::default()
//!     });
//!     let mut client = Client::new("127.0.0.1:8080", session, 0, Duration::from_millis(16), true).await?;
//!     client.run().await?;
//!     Ok(())
//! }
//! ```

pub mod input;
pub mod network;
pub mod session;
