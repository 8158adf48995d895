//! # Match Relay Library
//!
//! The relay sits between the peers of a two-team ball game. It never runs
//! the simulation itself: one peer per room is the *authority* and runs the
//! authoritative game loop, everyone else sends inputs and renders the
//! snapshots the authority publishes. The relay decides who that authority
//! is and moves the role when its connection degrades.
//!
//! ## Core Responsibilities
//!
//! ### Room Membership
//! Peers join rooms by id, pick a team and, once both teams have players, the
//! authority starts a match. Packets are routed only within a room.
//!
//! ### Health Monitoring
//! Every peer reports its measured ping and declared link speed once a second.
//! A periodic health check evaluates the authority against fixed thresholds
//! and peers can vote against an authority that feels laggy.
//!
//! ### Authority Migration
//! A degraded authority triggers a transfer: the match pauses, the old loop is
//! stopped and reports its final snapshot, the healthiest peer is chosen, a
//! ready check gives everyone a chance to catch up and the new authority
//! resumes from the last snapshot. At most one loop runs at any time.
//!
//! ## Module Organization
//!
//! - `client_manager`: address to peer id registry and transport timeouts
//! - `config`: relay and per-room tunables
//! - `connection_monitor`: rolling ping statistics per peer
//! - `host_scorer`: pure scoring and threshold checks for candidates
//! - `lag_votes`: peer complaints and quorum evaluation
//! - `ready_check`: acknowledgment barrier run after a handover
//! - `transfer`: the authority transfer state machine
//! - `room`: per-room match context tying the above together
//! - `network`: the UDP relay loop
//!
//! ## Time
//!
//! Everything below `network` runs on a logical millisecond clock passed in by
//! the caller, so the whole transfer flow can be driven deterministically in
//! tests. Only `network` reads the wall clock.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         bind_addr: "127.0.0.1:8080".to_string(),
//!         ..ServerConfig::default()
//!     };
//!     let mut server = Server::new(config).await?;
//!
//!     // Routes packets, polls room timers and drops silent peers until the
//!     // receive channel closes.
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client_manager;
pub mod config;
pub mod connection_monitor;
pub mod error;
pub mod host_scorer;
pub mod lag_votes;
pub mod network;
pub mod ready_check;
pub mod room;
pub mod transfer;
