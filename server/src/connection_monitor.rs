//! Per-peer connection health as reported by the peers themselves
//!
//! Every peer sends a `ConnectionStats` heartbeat at least once a second with
//! the round-trip time it measured against the relay. The monitor keeps a
//! short rolling window of those samples so the host scorer can judge both
//! latency and jitter, and tracks when each peer was last heard from.

use log::{debug, warn};
use shared::PeerId;
use std::collections::{HashMap, VecDeque};

/// Number of ping samples kept per peer
pub const PING_WINDOW: usize = 10;

/// Latency assumed for a peer that has not reported any samples yet
pub const DEFAULT_PING_MS: f32 = 100.0;

/// Rolling connection statistics for one peer
#[derive(Debug, Clone, PartialEq)]
pub struct PeerStats {
    /// Most recent samples, oldest first
    pub ping_history: VecDeque<f32>,
    pub last_ping: Option<f32>,
    /// Self-declared link quality; `None` until the first heartbeat
    pub connection_speed: Option<f32>,
    /// Clock value of the last heartbeat (or of registration)
    pub last_seen_ms: u64,
    /// Lag complaints and missed health checks accumulated against this peer
    pub lag_reports: u32,
}

impl PeerStats {
    pub fn new(now_ms: u64) -> Self {
        PeerStats {
            ping_history: VecDeque::with_capacity(PING_WINDOW),
            last_ping: None,
            connection_speed: None,
            last_seen_ms: now_ms,
            lag_reports: 0,
        }
    }

    /// Arithmetic mean of the window, `None` without samples.
    pub fn average_ping(&self) -> Option<f32> {
        if self.ping_history.is_empty() {
            return None;
        }
        Some(self.ping_history.iter().sum::<f32>() / self.ping_history.len() as f32)
    }

    /// Population standard deviation of the window, zero without samples.
    pub fn ping_std_dev(&self) -> f32 {
        let Some(mean) = self.average_ping() else {
            return 0.0;
        };
        let variance = self
            .ping_history
            .iter()
            .map(|p| (p - mean).powi(2))
            .sum::<f32>()
            / self.ping_history.len() as f32;
        variance.sqrt()
    }

    /// Declared speed, treating "never declared" as the minimum usable link.
    pub fn declared_speed(&self) -> f32 {
        self.connection_speed.unwrap_or(1.0)
    }

    fn push_ping(&mut self, ping_ms: f32) {
        if self.ping_history.len() == PING_WINDOW {
            self.ping_history.pop_front();
        }
        self.ping_history.push_back(ping_ms);
        self.last_ping = Some(ping_ms);
    }
}

/// Connection statistics for every peer in a room
#[derive(Debug, Clone)]
pub struct ConnectionMonitor {
    peers: HashMap<PeerId, PeerStats>,
    stale_after_ms: u64,
}

impl ConnectionMonitor {
    pub fn new(stale_after_ms: u64) -> Self {
        ConnectionMonitor {
            peers: HashMap::new(),
            stale_after_ms,
        }
    }

    /// Starts tracking a peer. Re-registering keeps existing stats.
    pub fn register(&mut self, peer: PeerId, now_ms: u64) {
        self.peers.entry(peer).or_insert_with(|| PeerStats::new(now_ms));
    }

    pub fn remove(&mut self, peer: PeerId) -> Option<PeerStats> {
        self.peers.remove(&peer)
    }

    /// Records a heartbeat. Negative or non-finite pings are discarded but
    /// still count as a sign of life.
    pub fn record_heartbeat(&mut self, peer: PeerId, ping_ms: f32, declared_speed: f32, now_ms: u64) {
        let stats = self
            .peers
            .entry(peer)
            .or_insert_with(|| PeerStats::new(now_ms));

        if ping_ms.is_finite() && ping_ms >= 0.0 {
            stats.push_ping(ping_ms);
        } else {
            warn!("Ignoring invalid ping sample {ping_ms} from peer {peer}");
        }
        if declared_speed.is_finite() {
            stats.connection_speed = Some(declared_speed);
        }
        stats.last_seen_ms = stats.last_seen_ms.max(now_ms);
    }

    pub fn is_stale(&self, peer: PeerId, now_ms: u64) -> bool {
        self.peers
            .get(&peer)
            .is_some_and(|stats| now_ms.saturating_sub(stats.last_seen_ms) > self.stale_after_ms)
    }

    /// Peers not heard from within the stale window, lowest id first.
    pub fn stale_peers(&self, now_ms: u64) -> Vec<PeerId> {
        let mut stale: Vec<PeerId> = self
            .peers
            .keys()
            .copied()
            .filter(|&peer| self.is_stale(peer, now_ms))
            .collect();
        stale.sort_unstable();
        stale
    }

    pub fn increment_lag_reports(&mut self, peer: PeerId) -> u32 {
        match self.peers.get_mut(&peer) {
            Some(stats) => {
                stats.lag_reports += 1;
                debug!("Peer {peer} now has {} lag reports", stats.lag_reports);
                stats.lag_reports
            }
            None => 0,
        }
    }

    /// Forgets accumulated lag reports, e.g. when a new match starts.
    pub fn reset_lag_reports(&mut self) {
        for stats in self.peers.values_mut() {
            stats.lag_reports = 0;
        }
    }

    pub fn stats(&self, peer: PeerId) -> Option<&PeerStats> {
        self.peers.get(&peer)
    }

    pub fn average_ping(&self, peer: PeerId) -> Option<f32> {
        self.peers.get(&peer).and_then(PeerStats::average_ping)
    }

    pub fn ping_std_dev(&self, peer: PeerId) -> Option<f32> {
        self.peers.get(&peer).map(PeerStats::ping_std_dev)
    }

    /// Every tracked peer with its stats, in id order.
    pub fn candidates(&self) -> Vec<(PeerId, &PeerStats)> {
        let mut all: Vec<(PeerId, &PeerStats)> =
            self.peers.iter().map(|(&id, stats)| (id, stats)).collect();
        all.sort_unstable_by_key(|(id, _)| *id);
        all
    }

    pub fn contains(&self, peer: PeerId) -> bool {
        self.peers.contains_key(&peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_window_is_bounded() {
        let mut monitor = ConnectionMonitor::new(10_000);
        for i in 0..15 {
            monitor.record_heartbeat(1, i as f32, 5.0, i * 100);
        }

        let stats = monitor.stats(1).unwrap();
        assert_eq!(stats.ping_history.len(), PING_WINDOW);
        assert_eq!(stats.ping_history.front(), Some(&5.0));
        assert_eq!(stats.last_ping, Some(14.0));
        assert_approx_eq!(monitor.average_ping(1).unwrap(), 9.5);
    }

    #[test]
    fn test_std_dev_is_population() {
        let mut monitor = ConnectionMonitor::new(10_000);
        for ping in [40.0, 60.0] {
            monitor.record_heartbeat(2, ping, 5.0, 0);
        }
        assert_approx_eq!(monitor.ping_std_dev(2).unwrap(), 10.0);

        monitor.register(3, 0);
        assert_eq!(monitor.average_ping(3), None);
        assert_eq!(monitor.ping_std_dev(3), Some(0.0));
        assert_eq!(monitor.ping_std_dev(4), None);
    }

    #[test]
    fn test_staleness() {
        let mut monitor = ConnectionMonitor::new(10_000);
        monitor.register(1, 0);
        monitor.register(2, 0);
        monitor.record_heartbeat(2, 30.0, 5.0, 4_000);

        assert!(!monitor.is_stale(1, 10_000));
        assert!(monitor.is_stale(1, 10_001));
        assert!(!monitor.is_stale(2, 10_001));
        assert_eq!(monitor.stale_peers(14_001), vec![1]);
        assert_eq!(monitor.stale_peers(20_000), vec![1, 2]);
        assert!(!monitor.is_stale(99, 50_000));
    }

    #[test]
    fn test_invalid_ping_still_counts_as_alive() {
        let mut monitor = ConnectionMonitor::new(10_000);
        monitor.register(1, 0);
        monitor.record_heartbeat(1, f32::NAN, 2.0, 9_000);
        monitor.record_heartbeat(1, -5.0, 2.0, 9_500);

        let stats = monitor.stats(1).unwrap();
        assert!(stats.ping_history.is_empty());
        assert_eq!(stats.last_seen_ms, 9_500);
        assert_approx_eq!(stats.declared_speed(), 2.0);
    }

    #[test]
    fn test_lag_reports() {
        let mut monitor = ConnectionMonitor::new(10_000);
        monitor.register(1, 0);

        assert_eq!(monitor.increment_lag_reports(1), 1);
        assert_eq!(monitor.increment_lag_reports(1), 2);
        assert_eq!(monitor.increment_lag_reports(7), 0);

        monitor.reset_lag_reports();
        assert_eq!(monitor.stats(1).unwrap().lag_reports, 0);
    }

    #[test]
    fn test_register_and_remove() {
        let mut monitor = ConnectionMonitor::new(10_000);
        monitor.register(5, 0);
        monitor.register(3, 0);
        monitor.record_heartbeat(5, 80.0, 3.0, 100);
        monitor.register(5, 200);

        assert_eq!(monitor.stats(5).unwrap().ping_history.len(), 1);
        let ids: Vec<PeerId> = monitor.candidates().iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![3, 5]);

        assert!(monitor.remove(5).is_some());
        assert!(!monitor.contains(5));
        assert_eq!(monitor.len(), 1);
        assert!(monitor.remove(5).is_none());
    }

    #[test]
    fn test_undeclared_speed_defaults_to_one() {
        let stats = PeerStats::new(0);
        assert_approx_eq!(stats.declared_speed(), 1.0);
    }
}
