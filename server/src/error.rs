use shared::{PeerId, RoomId, TeamParseError};

/// Why the relay refused a peer request.
///
/// Every variant is recoverable: the request is dropped, the peer gets a
/// `Rejected` packet carrying the message and the room carries on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("room {0} does not exist")]
    UnknownRoom(RoomId),

    #[error("peer {0} is not in this room")]
    NotInRoom(PeerId),

    #[error(transparent)]
    InvalidTeam(#[from] TeamParseError),

    #[error("peer {0} is not the match authority")]
    NotAuthority(PeerId),

    #[error("each team needs at least one player to start")]
    NotEnoughPlayers,

    #[error("the match is already running")]
    MatchAlreadyRunning,

    #[error("no match is running")]
    MatchNotRunning,

    #[error("room is full ({0} players)")]
    RoomFull(usize),

    #[error("unexpected packet from peer {0}")]
    UnexpectedPacket(PeerId),
}
