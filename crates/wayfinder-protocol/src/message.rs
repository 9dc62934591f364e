//! The routed-message envelope.
//!
//! Every frame on every socket is a `RoutedMessage`:
//!
//! ```text
//! flowTarget,destination,{...json body...}
//! ```
//!
//! Three comma-delimited top-level segments; the body is opaque JSON from
//! the third comma onward (the body itself may contain commas). The body
//! is kept both raw and parsed so that decode → encode is byte-for-byte
//! identical — the mediator routes messages it did not author and must
//! not reformat them in flight.

use serde_json::Value;

use crate::{ExitDirection, FlowTarget, LocationHint, ProtocolError, WILDCARD};

/// An immutable routed-message envelope.
///
/// Constructed from wire text ([`decode`](Self::decode)) or
/// programmatically ([`new`](Self::new)); never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutedMessage {
    flow_target: FlowTarget,
    destination: String,
    /// The body exactly as it appeared on the wire.
    raw_body: String,
    /// The parsed form of `raw_body`, for field access.
    body: Value,
}

impl RoutedMessage {
    /// Builds an envelope from a JSON body, serializing it once.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedEnvelope`] if `body` is not a
    /// JSON object, or [`ProtocolError::Encode`] if serialization fails.
    pub fn new(
        flow_target: FlowTarget,
        destination: impl Into<String>,
        body: Value,
    ) -> Result<Self, ProtocolError> {
        if !body.is_object() {
            return Err(ProtocolError::MalformedEnvelope(
                "body must be a JSON object".into(),
            ));
        }
        let raw_body =
            serde_json::to_string(&body).map_err(ProtocolError::Encode)?;
        Ok(Self {
            flow_target,
            destination: destination.into(),
            raw_body,
            body,
        })
    }

    /// Parses wire text into an envelope.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedEnvelope`] when fewer than three
    /// comma-delimited segments are present, the flow target is unknown,
    /// or the body is not a JSON object, and
    /// [`ProtocolError::BodyNotJson`] when the body does not parse at
    /// all. Callers drop such messages and log; they are never retried.
    pub fn decode(wire: &str) -> Result<Self, ProtocolError> {
        let mut segments = wire.splitn(3, ',');
        let flow = segments.next().unwrap_or_default();
        let destination = segments.next().ok_or_else(|| {
            ProtocolError::MalformedEnvelope(
                "expected 3 comma-delimited segments, got 1".into(),
            )
        })?;
        let raw_body = segments.next().ok_or_else(|| {
            ProtocolError::MalformedEnvelope(
                "expected 3 comma-delimited segments, got 2".into(),
            )
        })?;

        let flow_target: FlowTarget = flow.parse()?;
        let body: Value = serde_json::from_str(raw_body)
            .map_err(ProtocolError::BodyNotJson)?;
        if !body.is_object() {
            return Err(ProtocolError::MalformedEnvelope(
                "body must be a JSON object".into(),
            ));
        }

        Ok(Self {
            flow_target,
            destination: destination.to_string(),
            raw_body: raw_body.to_string(),
            body,
        })
    }

    /// Renders the envelope back to wire text.
    ///
    /// The raw body is emitted verbatim, so decoding and re-encoding the
    /// same input yields the identical string.
    pub fn encode(&self) -> String {
        format!(
            "{},{},{}",
            self.flow_target.as_str(),
            self.destination,
            self.raw_body
        )
    }

    // -- Envelope fields --------------------------------------------------

    pub fn flow_target(&self) -> FlowTarget {
        self.flow_target
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    /// True if the destination is this user id or the pod wildcard.
    pub fn is_for_user(&self, user_id: &str) -> bool {
        self.destination == user_id || self.destination == WILDCARD
    }

    /// True if the destination is this room id.
    pub fn is_for_room(&self, room_id: &str) -> bool {
        self.destination == room_id
    }

    /// True iff the flow target is the emergency recall.
    pub fn is_sos(&self) -> bool {
        self.flow_target == FlowTarget::Sos
    }

    // -- Recognized body fields -------------------------------------------

    /// The body's `type` discriminator, if present.
    pub fn msg_type(&self) -> Option<&str> {
        self.body.get("type").and_then(Value::as_str)
    }

    /// The body's `content` field, if present.
    pub fn content(&self) -> Option<&Value> {
        self.body.get("content")
    }

    /// The body's `exitId` field, if present. Carries an exit direction,
    /// or a destination room id when the teleport flag is set.
    pub fn exit_id(&self) -> Option<&str> {
        self.body.get("exitId").and_then(Value::as_str)
    }

    /// True if the body's `teleport` flag is set.
    pub fn teleport(&self) -> bool {
        self.body
            .get("teleport")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// The body's `bookmark` sequence marker, if present.
    pub fn bookmark(&self) -> Option<i64> {
        self.body.get("bookmark").and_then(Value::as_i64)
    }

    pub fn username(&self) -> Option<&str> {
        self.body.get("username").and_then(Value::as_str)
    }

    pub fn user_id(&self) -> Option<&str> {
        self.body.get("userId").and_then(Value::as_str)
    }

    /// The body's `roomId` field, if present (ready/resume payloads).
    pub fn room_id(&self) -> Option<&str> {
        self.body.get("roomId").and_then(Value::as_str)
    }

    /// Classifies this body as a routing destination.
    ///
    /// Teleport takes precedence when both the flag and an exit id are
    /// present; an unparseable direction is treated as no destination.
    pub fn location_hint(&self) -> LocationHint {
        match self.exit_id() {
            Some(exit) if self.teleport() => LocationHint::Teleport {
                room_id: exit.to_string(),
            },
            Some(exit) => match ExitDirection::parse(exit) {
                Some(direction) => LocationHint::Exit { direction },
                None => LocationHint::None,
            },
            None => LocationHint::None,
        }
    }
}
