//! Error types for the session layer.

/// Errors that can occur while managing client sessions.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The credentials presented at the handshake were rejected.
    #[error("authentication failed for {0}")]
    AuthFailed(String),

    /// An operation referenced a user with no pod.
    #[error("no active pod for user {0}")]
    NoSuchPod(String),
}
