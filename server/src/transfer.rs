//! Authority transfer state machine
//!
//! Moves the authoritative simulation from a struggling peer to a healthier
//! one without ever letting two peers run it at once:
//!
//! ```text
//! Idle -> Paused -> SelectingHost -> Transferring -> ReadyCheck -> Resuming -> Idle
//! ```
//!
//! The old loop is stopped when the match pauses, the new authority is only
//! told to start once the ready check is over and the resume delay elapsed.
//! Any non-idle phase can be cancelled back to the previous authority.
//!
//! The coordinator never talks to the network. It returns
//! [`TransferAction`]s that the owning match turns into packets.

use crate::config::MatchConfig;
use crate::connection_monitor::ConnectionMonitor;
use crate::host_scorer;
use crate::ready_check::ReadyCheckCoordinator;
use log::{debug, info, warn};
use shared::timers::Timers;
use shared::{CancelReason, Packet, PauseReason, PeerId, TransferPhase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransferTimer {
    SelectHost,
    ReadyCheckTimeout,
    Resume,
    StatusUpdate,
}

/// Side effects requested from the owning match
#[derive(Debug, Clone, PartialEq)]
pub enum TransferAction {
    Broadcast(Packet),
    /// Tell this peer to stop its loop and report its final snapshot
    StopLoop(PeerId),
    /// Hand this peer the roster and last snapshot so it starts ticking
    StartLoop(PeerId),
    /// Complaints about the old authority no longer apply
    ClearVotes,
    /// Nobody is left to run the match
    EndMatch,
}

/// Why a transfer trigger was ignored
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransferBlocked {
    #[error("a transfer is already in progress ({0:?})")]
    Busy(TransferPhase),
    #[error("last transfer was too recent ({remaining_ms}ms left)")]
    TooSoon { remaining_ms: u64 },
    #[error("transfer attempts exhausted ({0})")]
    AttemptsExhausted(u32),
    #[error("there is no authority to transfer from")]
    NoAuthority,
}

#[derive(Debug, Clone)]
pub struct AuthorityTransferCoordinator {
    config: MatchConfig,
    phase: TransferPhase,
    pause_reason: Option<PauseReason>,
    authority: Option<PeerId>,
    previous_authority: Option<PeerId>,
    attempts: u32,
    last_transfer_ms: Option<u64>,
    ready_check: ReadyCheckCoordinator,
    timers: Timers<TransferTimer>,
}

impl AuthorityTransferCoordinator {
    pub fn new(config: MatchConfig) -> Self {
        AuthorityTransferCoordinator {
            config,
            phase: TransferPhase::Idle,
            pause_reason: None,
            authority: None,
            previous_authority: None,
            attempts: 0,
            last_transfer_ms: None,
            ready_check: ReadyCheckCoordinator::new(),
            timers: Timers::new(),
        }
    }

    pub fn phase(&self) -> TransferPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == TransferPhase::Idle
    }

    pub fn authority(&self) -> Option<PeerId> {
        self.authority
    }

    /// The authority replaced by the most recent handover.
    pub fn previous_authority(&self) -> Option<PeerId> {
        self.previous_authority
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn last_transfer_ms(&self) -> Option<u64> {
        self.last_transfer_ms
    }

    pub fn ready_check(&self) -> &ReadyCheckCoordinator {
        &self.ready_check
    }

    pub fn timers(&self) -> &Timers<TransferTimer> {
        &self.timers
    }

    /// Lobby-level assignment, e.g. the first peer to join a room. Ignored
    /// while a transfer is in flight.
    pub fn set_authority(&mut self, peer: Option<PeerId>) {
        if self.is_idle() {
            self.authority = peer;
        }
    }

    /// Fresh bookkeeping for a new match.
    pub fn reset_for_match(&mut self) {
        self.stop();
        self.attempts = 0;
        self.last_transfer_ms = None;
        self.previous_authority = None;
    }

    /// Abandons any transfer in flight. The authority stays as it is.
    pub fn stop(&mut self) {
        if !self.is_idle() {
            info!("Transfer aborted in phase {:?}", self.phase);
        }
        self.timers.clear();
        self.ready_check.reset();
        self.phase = TransferPhase::Idle;
        self.pause_reason = None;
    }

    pub fn check_guards(&self, now_ms: u64) -> Result<(), TransferBlocked> {
        if !self.is_idle() {
            return Err(TransferBlocked::Busy(self.phase));
        }
        if self.authority.is_none() {
            return Err(TransferBlocked::NoAuthority);
        }
        if let Some(last) = self.last_transfer_ms {
            let elapsed = now_ms.saturating_sub(last);
            if elapsed < self.config.min_transfer_interval_ms {
                return Err(TransferBlocked::TooSoon {
                    remaining_ms: self.config.min_transfer_interval_ms - elapsed,
                });
            }
        }
        if self.attempts >= self.config.max_transfer_attempts {
            return Err(TransferBlocked::AttemptsExhausted(self.attempts));
        }
        Ok(())
    }

    /// Pauses the match and schedules host selection after the settle delay.
    pub fn start_transfer(
        &mut self,
        reason: PauseReason,
        now_ms: u64,
    ) -> Result<Vec<TransferAction>, TransferBlocked> {
        self.check_guards(now_ms)?;

        self.attempts += 1;
        self.phase = TransferPhase::Paused;
        self.pause_reason = Some(reason);
        info!(
            "Starting authority transfer away from {:?} ({reason:?}), attempt {}/{}",
            self.authority, self.attempts, self.config.max_transfer_attempts
        );

        let mut actions = Vec::new();
        if let Some(authority) = self.authority {
            actions.push(TransferAction::StopLoop(authority));
        }
        actions.push(Self::paused_notice(reason));

        self.timers
            .schedule_in(TransferTimer::SelectHost, now_ms, self.config.settle_delay_ms);
        self.timers
            .schedule_in(TransferTimer::StatusUpdate, now_ms, self.config.status_interval_ms);

        Ok(actions)
    }

    /// The authority is gone: pick a replacement right away, skipping the
    /// guards and the settle delay. Later phases fall back to selection.
    pub fn force_transfer(
        &mut self,
        reason: PauseReason,
        now_ms: u64,
        monitor: &ConnectionMonitor,
    ) -> Vec<TransferAction> {
        let mut actions = Vec::new();
        warn!(
            "Forcing authority transfer away from {:?} ({reason:?}) in phase {:?}",
            self.authority, self.phase
        );

        if self.is_idle() {
            self.pause_reason = Some(reason);
            actions.push(Self::paused_notice(reason));
        }
        self.timers.cancel(&TransferTimer::SelectHost);
        self.timers.cancel(&TransferTimer::ReadyCheckTimeout);
        self.timers.cancel(&TransferTimer::Resume);
        self.ready_check.reset();
        if !self.timers.is_scheduled(&TransferTimer::StatusUpdate) {
            self.timers
                .schedule_in(TransferTimer::StatusUpdate, now_ms, self.config.status_interval_ms);
        }
        self.phase = TransferPhase::Paused;

        actions.extend(self.select_host(now_ms, monitor));
        actions
    }

    /// Reacts to a peer leaving a running match. `monitor` must already have
    /// forgotten the peer.
    pub fn handle_peer_left(
        &mut self,
        peer: PeerId,
        now_ms: u64,
        monitor: &ConnectionMonitor,
    ) -> Vec<TransferAction> {
        if self.authority == Some(peer) {
            return self.force_transfer(PauseReason::HostDisconnected, now_ms, monitor);
        }
        if self.phase == TransferPhase::ReadyCheck && self.ready_check.remove_peer(peer, monitor.len())
        {
            return self.finish_ready_check(now_ms);
        }
        Vec::new()
    }

    /// Records a ready acknowledgment. Ignored outside a ready check.
    pub fn mark_ready(
        &mut self,
        peer: PeerId,
        now_ms: u64,
        monitor: &ConnectionMonitor,
    ) -> Vec<TransferAction> {
        if self.phase != TransferPhase::ReadyCheck {
            debug!("Ignoring ready mark from {peer} outside a ready check");
            return Vec::new();
        }
        let Some(update) = self.ready_check.mark_ready(peer, monitor.len()) else {
            return Vec::new();
        };

        let mut actions = vec![TransferAction::Broadcast(update.packet)];
        if update.complete {
            actions.extend(self.finish_ready_check(now_ms));
        }
        actions
    }

    /// Gives up on the transfer and resumes with the current authority. The
    /// attempt stays counted.
    pub fn cancel_transfer(&mut self, reason: CancelReason, now_ms: u64) -> Vec<TransferAction> {
        if self.is_idle() {
            return Vec::new();
        }
        warn!("Authority transfer cancelled in phase {:?}: {reason:?}", self.phase);

        self.timers.cancel(&TransferTimer::SelectHost);
        self.timers.cancel(&TransferTimer::ReadyCheckTimeout);
        self.timers.cancel(&TransferTimer::Resume);
        self.ready_check.reset();
        self.enter_resuming(now_ms);

        vec![TransferAction::Broadcast(Packet::HostTransferCancelled {
            reason,
            message: reason.message().to_string(),
        })]
    }

    /// Fires every due timer.
    pub fn poll(&mut self, now_ms: u64, monitor: &ConnectionMonitor) -> Vec<TransferAction> {
        let mut actions = Vec::new();
        while let Some(timer) = self.timers.pop_due(now_ms) {
            debug!("Transfer timer {timer:?} fired in phase {:?}", self.phase);
            match timer {
                TransferTimer::SelectHost => {
                    if self.phase == TransferPhase::Paused {
                        actions.extend(self.select_host(now_ms, monitor));
                    }
                }
                TransferTimer::ReadyCheckTimeout => {
                    if self.phase == TransferPhase::ReadyCheck {
                        warn!(
                            "Ready check timed out with {} of {} ready",
                            self.ready_check.ready_players().len(),
                            monitor.len()
                        );
                        actions.extend(self.finish_ready_check(now_ms));
                    }
                }
                TransferTimer::Resume => {
                    actions.extend(self.resume(now_ms));
                }
                TransferTimer::StatusUpdate => {
                    if !self.is_idle() {
                        actions.push(TransferAction::Broadcast(self.status_packet(monitor.len())));
                        self.timers.schedule_in(
                            TransferTimer::StatusUpdate,
                            now_ms,
                            self.config.status_interval_ms,
                        );
                    }
                }
            }
        }
        actions
    }

    pub fn status_packet(&self, total_players: usize) -> Packet {
        Packet::HostTransferStatus {
            phase: self.phase,
            ready_players: self.ready_check.ready_players(),
            total_players,
            current_host: self.authority,
            attempts: self.attempts,
        }
    }

    /// Packets that bring a peer joining mid-transfer up to date with
    /// everyone else. Empty while idle.
    pub fn catch_up(&self, now_ms: u64, total_players: usize) -> Vec<Packet> {
        let Some(reason) = self.pause_reason.filter(|_| !self.is_idle()) else {
            return Vec::new();
        };

        let mut packets = vec![
            Packet::GamePaused {
                reason,
                message: reason.message().to_string(),
            },
            self.status_packet(total_players),
        ];
        if self.phase == TransferPhase::ReadyCheck {
            let remaining_ms = self
                .timers
                .deadline(&TransferTimer::ReadyCheckTimeout)
                .map_or(0, |deadline| deadline.saturating_sub(now_ms));
            packets.push(Packet::ReadyCheckStarted {
                timeout_seconds: remaining_ms.div_ceil(1000),
            });
        }
        packets
    }

    fn paused_notice(reason: PauseReason) -> TransferAction {
        TransferAction::Broadcast(Packet::GamePaused {
            reason,
            message: reason.message().to_string(),
        })
    }

    fn select_host(&mut self, now_ms: u64, monitor: &ConnectionMonitor) -> Vec<TransferAction> {
        self.phase = TransferPhase::SelectingHost;

        let authority_connected = self.authority.is_some_and(|a| monitor.contains(a));
        match host_scorer::select_best_host(monitor.candidates()) {
            None if authority_connected => {
                self.cancel_transfer(CancelReason::NoSuitableHost, now_ms)
            }
            None => {
                warn!("No peers left to take over authority");
                self.stop();
                self.authority = None;
                vec![TransferAction::EndMatch]
            }
            Some(best) if Some(best) == self.authority => {
                info!("Peer {best} is still the best authority");
                self.cancel_transfer(CancelReason::NoSuitableHost, now_ms)
            }
            Some(best) => self.transfer_to(best, now_ms, monitor.len()),
        }
    }

    fn transfer_to(&mut self, new_host: PeerId, now_ms: u64, total_players: usize) -> Vec<TransferAction> {
        self.phase = TransferPhase::Transferring;
        let old_host = self.authority.replace(new_host);
        self.previous_authority = old_host;
        info!("Authority moved from {old_host:?} to {new_host}");

        let mut actions = vec![
            TransferAction::Broadcast(Packet::HostChanged {
                old_host,
                new_host,
                during_game: true,
            }),
            TransferAction::ClearVotes,
        ];

        self.phase = TransferPhase::ReadyCheck;
        actions.push(TransferAction::Broadcast(
            self.ready_check.start(self.config.ready_check_timeout_ms),
        ));
        self.timers.schedule_in(
            TransferTimer::ReadyCheckTimeout,
            now_ms,
            self.config.ready_check_timeout_ms,
        );
        debug!("Ready check started for {total_players} players");

        actions
    }

    fn finish_ready_check(&mut self, now_ms: u64) -> Vec<TransferAction> {
        self.timers.cancel(&TransferTimer::ReadyCheckTimeout);
        let summary = self.ready_check.finish();
        self.enter_resuming(now_ms);
        vec![TransferAction::Broadcast(summary)]
    }

    fn enter_resuming(&mut self, now_ms: u64) {
        self.phase = TransferPhase::Resuming;
        self.timers
            .schedule_in(TransferTimer::Resume, now_ms, self.config.resume_delay_ms);
    }

    fn resume(&mut self, now_ms: u64) -> Vec<TransferAction> {
        if self.phase != TransferPhase::Resuming {
            return Vec::new();
        }
        self.phase = TransferPhase::Idle;
        self.pause_reason = None;
        self.last_transfer_ms = Some(now_ms);
        self.timers.clear();
        self.ready_check.reset();
        info!("Resuming match with authority {:?}", self.authority);

        let mut actions = Vec::new();
        match self.authority {
            Some(authority) => actions.push(TransferAction::StartLoop(authority)),
            None => actions.push(TransferAction::EndMatch),
        }
        actions.push(TransferAction::Broadcast(Packet::GameResumed));
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> MatchConfig {
        MatchConfig::default()
    }

    /// Peers with a steady ping each, all declaring a decent link.
    fn monitor(pings: &[(PeerId, f32)]) -> ConnectionMonitor {
        let mut monitor = ConnectionMonitor::new(10_000);
        for &(peer, ping) in pings {
            for _ in 0..5 {
                monitor.record_heartbeat(peer, ping, 5.0, 0);
            }
        }
        monitor
    }

    fn coordinator(authority: PeerId) -> AuthorityTransferCoordinator {
        let mut coordinator = AuthorityTransferCoordinator::new(config());
        coordinator.set_authority(Some(authority));
        coordinator
    }

    fn broadcasts(actions: &[TransferAction]) -> Vec<&Packet> {
        actions
            .iter()
            .filter_map(|a| match a {
                TransferAction::Broadcast(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_start_pauses_and_stops_old_loop() {
        let mut c = coordinator(1);
        let actions = c.start_transfer(PauseReason::HighPing, 0).unwrap();

        assert_eq!(actions[0], TransferAction::StopLoop(1));
        assert!(matches!(
            broadcasts(&actions)[..],
            [Packet::GamePaused { reason: PauseReason::HighPing, .. }]
        ));
        assert_eq!(c.phase(), TransferPhase::Paused);
        assert_eq!(c.attempts(), 1);
        assert_eq!(c.timers().deadline(&TransferTimer::SelectHost), Some(2_000));
    }

    #[test]
    fn test_concurrent_triggers_are_suppressed() {
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();

        assert_eq!(
            c.start_transfer(PauseReason::PlayerReports, 100),
            Err(TransferBlocked::Busy(TransferPhase::Paused))
        );
        assert_eq!(c.attempts(), 1);
    }

    #[test]
    fn test_full_handover() {
        let m = monitor(&[(1, 250.0), (2, 50.0)]);
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();

        assert!(c.poll(999, &m).is_empty());
        let actions = c.poll(2_000, &m);
        assert_eq!(c.authority(), Some(2));
        assert_eq!(c.phase(), TransferPhase::ReadyCheck);
        assert!(actions.contains(&TransferAction::ClearVotes));
        assert!(actions.contains(&TransferAction::Broadcast(Packet::HostChanged {
            old_host: Some(1),
            new_host: 2,
            during_game: true,
        })));
        assert!(actions.contains(&TransferAction::Broadcast(Packet::ReadyCheckStarted {
            timeout_seconds: 30
        })));

        c.mark_ready(1, 2_100, &m);
        let actions = c.mark_ready(2, 2_200, &m);
        assert!(actions.contains(&TransferAction::Broadcast(Packet::ReadyCheckFinished {
            ready_players: vec![1, 2]
        })));
        assert_eq!(c.phase(), TransferPhase::Resuming);
        assert!(!c.timers().is_scheduled(&TransferTimer::ReadyCheckTimeout));

        let actions = c.poll(5_200, &m);
        assert!(actions.ends_with(&[
            TransferAction::StartLoop(2),
            TransferAction::Broadcast(Packet::GameResumed)
        ]));
        assert!(c.is_idle());
        assert_eq!(c.last_transfer_ms(), Some(5_200));
        assert!(c.timers().is_empty());
        assert_eq!(c.previous_authority(), Some(1));
    }

    #[test]
    fn test_ready_check_times_out() {
        let m = monitor(&[(1, 250.0), (2, 50.0), (3, 60.0)]);
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();
        c.poll(2_000, &m);
        c.mark_ready(3, 3_000, &m);

        assert!(c.poll(31_999, &m).iter().all(|a| !matches!(
            a,
            TransferAction::Broadcast(Packet::ReadyCheckFinished { .. })
        )));
        let actions = c.poll(32_000, &m);
        assert!(actions.contains(&TransferAction::Broadcast(Packet::ReadyCheckFinished {
            ready_players: vec![3]
        })));
        assert_eq!(c.phase(), TransferPhase::Resuming);
    }

    #[test]
    fn test_catch_up_follows_the_phase() {
        let m = monitor(&[(1, 250.0), (2, 50.0)]);
        let mut c = coordinator(1);
        assert!(c.catch_up(0, 2).is_empty());

        c.start_transfer(PauseReason::UnstablePing, 0).unwrap();
        let packets = c.catch_up(500, 2);
        assert_eq!(packets.len(), 2);
        assert!(matches!(
            packets[0],
            Packet::GamePaused { reason: PauseReason::UnstablePing, .. }
        ));

        c.poll(2_000, &m);
        let packets = c.catch_up(2_500, 3);
        assert_eq!(packets[1], c.status_packet(3));
        assert_eq!(packets[2], Packet::ReadyCheckStarted { timeout_seconds: 30 });

        c.mark_ready(1, 3_000, &m);
        c.mark_ready(2, 3_000, &m);
        assert_eq!(c.catch_up(4_000, 2).len(), 2);

        c.poll(6_000, &m);
        assert!(c.is_idle());
        assert!(c.catch_up(6_000, 2).is_empty());
    }

    #[test]
    fn test_no_better_host_cancels() {
        let m = monitor(&[(1, 30.0), (2, 150.0)]);
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::LagReports, 0).unwrap();

        let actions = c.poll(2_000, &m);
        assert!(broadcasts(&actions).iter().any(|p| matches!(
            p,
            Packet::HostTransferCancelled { reason: CancelReason::NoSuitableHost, .. }
        )));
        assert_eq!(c.authority(), Some(1));
        assert_eq!(c.phase(), TransferPhase::Resuming);

        let actions = c.poll(5_000, &m);
        assert!(actions.contains(&TransferAction::StartLoop(1)));
        assert_eq!(c.attempts(), 1);
    }

    #[test]
    fn test_interval_and_attempt_guards() {
        let m = monitor(&[(1, 30.0)]);
        let mut c = coordinator(1);

        c.start_transfer(PauseReason::HighPing, 0).unwrap();
        c.poll(2_000, &m);
        c.poll(5_000, &m);
        assert!(c.is_idle());

        assert_eq!(
            c.start_transfer(PauseReason::HighPing, 6_000),
            Err(TransferBlocked::TooSoon { remaining_ms: 59_000 })
        );

        c.start_transfer(PauseReason::HighPing, 65_000).unwrap();
        c.poll(67_000, &m);
        c.poll(70_000, &m);
        c.start_transfer(PauseReason::HighPing, 130_000).unwrap();
        c.poll(132_000, &m);
        c.poll(135_000, &m);

        assert_eq!(c.attempts(), 3);
        assert_eq!(
            c.start_transfer(PauseReason::HighPing, 200_000),
            Err(TransferBlocked::AttemptsExhausted(3))
        );

        c.reset_for_match();
        assert!(c.start_transfer(PauseReason::HighPing, 200_000).is_ok());
    }

    #[test]
    fn test_status_updates_while_transferring() {
        let m = monitor(&[(1, 250.0), (2, 50.0)]);
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();

        let actions = c.poll(1_000, &m);
        assert_eq!(
            actions,
            vec![TransferAction::Broadcast(Packet::HostTransferStatus {
                phase: TransferPhase::Paused,
                ready_players: vec![],
                total_players: 2,
                current_host: Some(1),
                attempts: 1,
            })]
        );
        assert_eq!(c.timers().deadline(&TransferTimer::StatusUpdate), Some(2_000));
    }

    #[test]
    fn test_authority_leaving_forces_selection() {
        let mut m = monitor(&[(1, 30.0), (2, 80.0), (3, 40.0)]);
        let mut c = coordinator(1);
        c.set_authority(Some(1));

        m.remove(1);
        let actions = c.handle_peer_left(1, 10_000, &m);

        assert!(matches!(
            broadcasts(&actions)[0],
            Packet::GamePaused { reason: PauseReason::HostDisconnected, .. }
        ));
        assert!(!actions.iter().any(|a| matches!(a, TransferAction::StopLoop(_))));
        assert_eq!(c.authority(), Some(3));
        assert_eq!(c.phase(), TransferPhase::ReadyCheck);
        assert_eq!(c.attempts(), 0);
    }

    #[test]
    fn test_new_authority_leaving_during_ready_check_reselects() {
        let mut m = monitor(&[(1, 250.0), (2, 50.0), (3, 70.0)]);
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();
        c.poll(2_000, &m);
        assert_eq!(c.authority(), Some(2));

        m.remove(2);
        c.handle_peer_left(2, 3_000, &m);
        assert_eq!(c.authority(), Some(3));
        assert_eq!(c.phase(), TransferPhase::ReadyCheck);
        assert_eq!(c.timers().deadline(&TransferTimer::ReadyCheckTimeout), Some(33_000));
    }

    #[test]
    fn test_last_peer_leaving_ends_match() {
        let mut m = monitor(&[(1, 30.0)]);
        let mut c = coordinator(1);

        m.remove(1);
        let actions = c.handle_peer_left(1, 0, &m);
        assert_eq!(actions.last(), Some(&TransferAction::EndMatch));
        assert!(c.is_idle());
        assert_eq!(c.authority(), None);
    }

    #[test]
    fn test_spectator_leaving_completes_ready_check() {
        let mut m = monitor(&[(1, 250.0), (2, 50.0), (3, 70.0)]);
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();
        c.poll(2_000, &m);
        c.mark_ready(1, 2_100, &m);
        c.mark_ready(2, 2_200, &m);

        m.remove(3);
        let actions = c.handle_peer_left(3, 2_300, &m);
        assert!(actions.contains(&TransferAction::Broadcast(Packet::ReadyCheckFinished {
            ready_players: vec![1, 2]
        })));
    }

    #[test]
    fn test_ready_marks_outside_check_are_ignored() {
        let m = monitor(&[(1, 30.0)]);
        let mut c = coordinator(1);
        assert!(c.mark_ready(1, 0, &m).is_empty());
    }

    #[test]
    fn test_stop_clears_everything() {
        let m = monitor(&[(1, 250.0), (2, 50.0)]);
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();
        c.poll(2_000, &m);

        c.stop();
        assert!(c.is_idle());
        assert!(c.timers().is_empty());
        assert!(!c.ready_check().is_active());
        assert!(c.poll(100_000, &m).is_empty());
        assert!(c.cancel_transfer(CancelReason::NoSuitableHost, 100_000).is_empty());
    }

    #[test]
    fn test_set_authority_ignored_mid_transfer() {
        let mut c = coordinator(1);
        c.start_transfer(PauseReason::HighPing, 0).unwrap();
        c.set_authority(Some(9));
        assert_eq!(c.authority(), Some(1));
    }
}
