use log::debug;
use shared::PeerId;
use std::collections::HashMap;

/// Votes older than this no longer count
pub const VOTE_FRESHNESS_MS: u64 = 10_000;
/// Distinct reporters required regardless of room size
pub const MIN_VOTERS: usize = 2;
/// Share of the other peers that must agree
pub const QUORUM_FRACTION: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct LagVote {
    pub reporter: PeerId,
    pub target: PeerId,
    pub timestamp_ms: u64,
    pub details: String,
}

/// Peer complaints about each other's connection, keyed target -> reporter.
///
/// A reporter has at most one live vote per target; reporting again just
/// refreshes it.
#[derive(Debug, Clone)]
pub struct LagVoteRegistry {
    votes: HashMap<PeerId, HashMap<PeerId, LagVote>>,
    freshness_ms: u64,
}

impl Default for LagVoteRegistry {
    fn default() -> Self {
        LagVoteRegistry::new(VOTE_FRESHNESS_MS)
    }
}

impl LagVoteRegistry {
    pub fn new(freshness_ms: u64) -> Self {
        LagVoteRegistry {
            votes: HashMap::new(),
            freshness_ms,
        }
    }

    /// Records a vote. Self-reports are ignored and return false.
    pub fn report_lag(&mut self, reporter: PeerId, target: PeerId, details: impl Into<String>, now_ms: u64) -> bool {
        if reporter == target {
            return false;
        }
        let vote = LagVote {
            reporter,
            target,
            timestamp_ms: now_ms,
            details: details.into(),
        };
        debug!("Peer {reporter} reported lag on peer {target}: {}", vote.details);
        self.votes.entry(target).or_default().insert(reporter, vote);
        true
    }

    /// Distinct reporters with a fresh vote against `target`.
    pub fn fresh_voters(&self, target: PeerId, now_ms: u64) -> usize {
        self.votes.get(&target).map_or(0, |by_reporter| {
            by_reporter
                .values()
                .filter(|vote| vote.reporter != target && self.is_fresh(vote, now_ms))
                .count()
        })
    }

    /// True when enough of the other peers currently complain about `target`.
    pub fn has_quorum(&self, target: PeerId, total_peers: usize, now_ms: u64) -> bool {
        if total_peers <= 1 {
            return false;
        }
        let voters = self.fresh_voters(target, now_ms);
        voters >= MIN_VOTERS && voters as f32 / (total_peers - 1) as f32 >= QUORUM_FRACTION
    }

    /// Drops expired votes.
    pub fn prune(&mut self, now_ms: u64) {
        let freshness_ms = self.freshness_ms;
        for by_reporter in self.votes.values_mut() {
            by_reporter.retain(|_, vote| now_ms.saturating_sub(vote.timestamp_ms) <= freshness_ms);
        }
        self.votes.retain(|_, by_reporter| !by_reporter.is_empty());
    }

    /// Forgets a departed peer both as a target and as a reporter.
    pub fn remove_peer(&mut self, peer: PeerId) {
        self.votes.remove(&peer);
        for by_reporter in self.votes.values_mut() {
            by_reporter.remove(&peer);
        }
        self.votes.retain(|_, by_reporter| !by_reporter.is_empty());
    }

    pub fn clear(&mut self) {
        self.votes.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.votes.is_empty()
    }

    fn is_fresh(&self, vote: &LagVote, now_ms: u64) -> bool {
        now_ms.saturating_sub(vote.timestamp_ms) <= self.freshness_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_voter_never_reaches_quorum() {
        let mut votes = LagVoteRegistry::default();
        votes.report_lag(2, 1, "choppy", 0);

        // 1 of 1 other peer is 100%, but below the minimum voter count.
        assert!(!votes.has_quorum(1, 2, 0));
    }

    #[test]
    fn test_two_of_three_reach_quorum() {
        let mut votes = LagVoteRegistry::default();
        votes.report_lag(2, 1, "", 1_000);
        assert!(!votes.has_quorum(1, 3, 1_000));

        votes.report_lag(3, 1, "", 4_000);
        assert!(votes.has_quorum(1, 3, 4_000));
    }

    #[test]
    fn test_fraction_is_required() {
        let mut votes = LagVoteRegistry::default();
        votes.report_lag(2, 1, "", 0);
        votes.report_lag(3, 1, "", 0);

        // 2 of 9 others.
        assert!(!votes.has_quorum(1, 10, 0));
        // 2 of 4 others.
        assert!(votes.has_quorum(1, 5, 0));
    }

    #[test]
    fn test_votes_expire() {
        let mut votes = LagVoteRegistry::default();
        votes.report_lag(2, 1, "", 0);
        votes.report_lag(3, 1, "", 5_000);

        assert!(votes.has_quorum(1, 3, VOTE_FRESHNESS_MS));
        assert!(!votes.has_quorum(1, 3, VOTE_FRESHNESS_MS + 1));
        assert_eq!(votes.fresh_voters(1, VOTE_FRESHNESS_MS + 1), 1);

        votes.prune(20_000);
        assert!(votes.is_empty());
    }

    #[test]
    fn test_repeat_vote_refreshes_instead_of_counting_twice() {
        let mut votes = LagVoteRegistry::default();
        votes.report_lag(2, 1, "first", 0);
        votes.report_lag(2, 1, "again", 9_000);

        assert_eq!(votes.fresh_voters(1, 15_000), 1);
        assert!(!votes.has_quorum(1, 3, 15_000));
    }

    #[test]
    fn test_self_reports_and_tiny_rooms() {
        let mut votes = LagVoteRegistry::default();
        assert!(!votes.report_lag(1, 1, "", 0));
        assert_eq!(votes.fresh_voters(1, 0), 0);
        assert!(!votes.has_quorum(1, 1, 0));
        assert!(!votes.has_quorum(1, 0, 0));
    }

    #[test]
    fn test_remove_peer() {
        let mut votes = LagVoteRegistry::default();
        votes.report_lag(2, 1, "", 0);
        votes.report_lag(3, 1, "", 0);
        votes.report_lag(1, 3, "", 0);

        votes.remove_peer(3);
        assert_eq!(votes.fresh_voters(1, 0), 1);
        assert_eq!(votes.fresh_voters(3, 0), 0);

        votes.clear();
        assert!(votes.is_empty());
    }
}
