//! Relay tunables. Defaults match the intervals peers are built around;
//! `main` overrides them from the command line.

use std::time::Duration;

/// Per-room timing and limits for health checks and authority transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchConfig {
    pub max_players: usize,
    /// How often the authority's health is evaluated while a match runs
    pub health_check_interval_ms: u64,
    /// Silence after which a peer counts as stale
    pub stale_after_ms: u64,
    /// How long a lag vote stays valid
    pub vote_freshness_ms: u64,
    /// Pause before a host is picked, so in-flight state can settle
    pub settle_delay_ms: u64,
    pub min_transfer_interval_ms: u64,
    pub max_transfer_attempts: u32,
    pub ready_check_timeout_ms: u64,
    pub resume_delay_ms: u64,
    pub status_interval_ms: u64,
}

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            max_players: 10,
            health_check_interval_ms: 5_000,
            stale_after_ms: 10_000,
            vote_freshness_ms: 10_000,
            settle_delay_ms: 2_000,
            min_transfer_interval_ms: 60_000,
            max_transfer_attempts: 3,
            ready_check_timeout_ms: 30_000,
            resume_delay_ms: 3_000,
            status_interval_ms: 1_000,
        }
    }
}

/// Everything the UDP relay needs to start
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// How often room timers are polled
    pub poll_interval: Duration,
    /// Transport-level silence before a peer is dropped entirely
    pub client_timeout: Duration,
    pub max_clients: usize,
    pub match_config: MatchConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "127.0.0.1:8080".to_string(),
            poll_interval: Duration::from_millis(50),
            client_timeout: Duration::from_secs(30),
            max_clients: 64,
            match_config: MatchConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.match_config.max_players, 10);
        assert_eq!(config.match_config.max_transfer_attempts, 3);
        assert!(config.client_timeout.as_millis() as u64 > config.match_config.stale_after_ms);
    }
}
