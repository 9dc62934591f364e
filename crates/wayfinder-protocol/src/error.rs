//! Error types for the protocol layer.
//!
//! Each crate in Wayfinder defines its own error enum. A `ProtocolError`
//! always means the problem is in the envelope itself, not in networking
//! or session state.

/// Errors that can occur while decoding or building routed messages.
///
/// Decoding failures are terminal for the message: callers drop it and
/// log, they never retry a malformed envelope.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The wire text is not a valid envelope: fewer than three
    /// comma-delimited segments, an unknown flow target, or a body that
    /// is not a JSON object.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The body text failed to parse as JSON at all.
    #[error("envelope body is not valid JSON: {0}")]
    BodyNotJson(#[source] serde_json::Error),

    /// A programmatically built body could not be serialized.
    #[error("encode failed: {0}")]
    Encode(#[source] serde_json::Error),
}
