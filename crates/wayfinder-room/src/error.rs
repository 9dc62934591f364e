//! Error types for the room layer.

/// Errors that can occur while resolving or talking to rooms.
///
/// None of these are fatal to the pod: an unreachable room degrades to
/// SICK, a failed resolution degrades to EMPTY, and the session layer
/// turns both into a user-visible narrative message plus a safe
/// fallback.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// Every candidate endpoint for a remote room refused the dial.
    /// The room stays known; retries continue on the sick schedule.
    #[error("room {0} is unreachable")]
    RoomUnreachable(String),

    /// Exit resolution was attempted from a SICK or EMPTY room, which
    /// has no trustworthy exit table.
    #[error("exits are unavailable from room {0}")]
    ExitsUnavailable(String),

    /// The directory itself failed (not "no such room" — that is a
    /// `None` result, not an error).
    #[error("directory lookup failed: {0}")]
    DirectoryFailed(String),
}
