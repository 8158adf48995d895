//! Ranks peers by how well they could run the authoritative simulation.
//!
//! Everything here is a pure function of [`PeerStats`]. Each metric is
//! normalised into `[0, 1]` over a fixed range and combined with fixed
//! weights; peers that fail the hard thresholds are only considered when
//! nobody passes them.

use crate::connection_monitor::{PeerStats, DEFAULT_PING_MS};
use shared::{PauseReason, PeerId};

pub const PING_WEIGHT: f32 = 0.5;
pub const STABILITY_WEIGHT: f32 = 0.2;
pub const SPEED_WEIGHT: f32 = 0.2;
pub const LAG_REPORT_WEIGHT: f32 = 0.3;

const PING_RANGE: (f32, f32) = (0.0, 300.0);
const STD_DEV_RANGE: (f32, f32) = (0.0, 100.0);
const SPEED_RANGE: (f32, f32) = (0.0, 10.0);
const LAG_REPORT_RANGE: (f32, f32) = (0.0, 10.0);

pub const MAX_PING_MS: f32 = 200.0;
pub const MAX_PING_STD_DEV_MS: f32 = 50.0;
pub const MIN_CONNECTION_SPEED: f32 = 1.0;
pub const MAX_LAG_REPORTS: u32 = 3;

/// Clamps `value` into `[lo, hi]` and maps it onto `[0, 1]`.
pub fn normalize(value: f32, (lo, hi): (f32, f32)) -> f32 {
    if hi <= lo {
        return 0.0;
    }
    ((value - lo) / (hi - lo)).clamp(0.0, 1.0)
}

/// Suitability score, higher is better.
pub fn score(stats: &PeerStats) -> f32 {
    let avg_ping = stats.average_ping().unwrap_or(DEFAULT_PING_MS);

    PING_WEIGHT * (1.0 - normalize(avg_ping, PING_RANGE))
        + STABILITY_WEIGHT * (1.0 - normalize(stats.ping_std_dev(), STD_DEV_RANGE))
        + SPEED_WEIGHT * normalize(stats.declared_speed(), SPEED_RANGE)
        - LAG_REPORT_WEIGHT * normalize(stats.lag_reports as f32, LAG_REPORT_RANGE)
}

pub fn passes_thresholds(stats: &PeerStats) -> bool {
    let avg_ping = stats.average_ping().unwrap_or(DEFAULT_PING_MS);
    avg_ping <= MAX_PING_MS
        && stats.ping_std_dev() <= MAX_PING_STD_DEV_MS
        && stats.declared_speed() >= MIN_CONNECTION_SPEED
        && stats.lag_reports <= MAX_LAG_REPORTS
}

/// Whether the current authority should hand over, and why.
///
/// Peers without samples are never degraded on ping grounds.
pub fn is_degraded(stats: &PeerStats) -> Option<PauseReason> {
    if stats.average_ping().is_some_and(|avg| avg > MAX_PING_MS) {
        Some(PauseReason::HighPing)
    } else if stats.ping_std_dev() > MAX_PING_STD_DEV_MS {
        Some(PauseReason::UnstablePing)
    } else if stats.lag_reports > MAX_LAG_REPORTS {
        Some(PauseReason::LagReports)
    } else {
        None
    }
}

/// Candidates scored and sorted best first. Equal scores keep id order.
pub fn rank<'a>(candidates: impl IntoIterator<Item = (PeerId, &'a PeerStats)>) -> Vec<(PeerId, f32)> {
    let mut ranked: Vec<(PeerId, f32)> = candidates
        .into_iter()
        .map(|(id, stats)| (id, score(stats)))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked
}

/// Picks the best authority among `candidates`, `None` if there are none.
pub fn select_best_host<'a>(
    candidates: impl IntoIterator<Item = (PeerId, &'a PeerStats)>,
) -> Option<PeerId> {
    let all: Vec<(PeerId, &PeerStats)> = candidates.into_iter().collect();
    let eligible: Vec<(PeerId, &PeerStats)> = all
        .iter()
        .copied()
        .filter(|(_, stats)| passes_thresholds(stats))
        .collect();

    let pool = if eligible.is_empty() { all } else { eligible };
    rank(pool).first().map(|(id, _)| *id)
}
