//! Unified error type for the Wayfinder meta crate.

use wayfinder_protocol::ProtocolError;
use wayfinder_room::RoomError;
use wayfinder_session::SessionError;
use wayfinder_transport::TransportError;

/// Top-level error that wraps the layer-specific errors.
///
/// Users of the `wayfinder` meta crate deal with this single type; the
/// `#[from]` attributes let `?` convert layer errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum WayfinderError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// The ready handshake did not happen: the device closed, timed
    /// out, or sent something other than a ready frame first.
    #[error("handshake failed: {0}")]
    Handshake(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let wrapped: WayfinderError = err.into();
        assert!(matches!(wrapped, WayfinderError::Transport(_)));
        assert!(wrapped.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::MalformedEnvelope("no comma".into());
        let wrapped: WayfinderError = err.into();
        assert!(matches!(wrapped, WayfinderError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::AuthFailed("nope".into());
        let wrapped: WayfinderError = err.into();
        assert!(matches!(wrapped, WayfinderError::Session(_)));
    }

    #[test]
    fn test_from_room_error() {
        let err = RoomError::RoomUnreachable("attic".into());
        let wrapped: WayfinderError = err.into();
        assert!(matches!(wrapped, WayfinderError::Room(_)));
    }
}
