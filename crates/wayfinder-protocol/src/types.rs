//! Core protocol types: flow targets, directions, and location hints.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Destination wildcard: "every device in the user's pod".
pub const WILDCARD: &str = "*";

// ---------------------------------------------------------------------------
// FlowTarget
// ---------------------------------------------------------------------------

/// The first segment of every envelope: which handler interprets the
/// body, and which queueing discipline applies.
///
/// The wire tokens are fixed by the routing protocol and must survive a
/// parse/render round trip exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowTarget {
    /// Device → room traffic (commands, chat).
    Room,
    /// Mediator → room: a user entered the room.
    RoomHello,
    /// Mediator → room: a user left the room.
    RoomGoodbye,
    /// Room → device traffic (events, chat, location content).
    Player,
    /// Room → mediator: the player moved; drives a transition.
    PlayerLocation,
    /// Device → mediator handshake.
    Ready,
    /// Mediator → device acknowledgement (`mediatorId`, `roomId`, `roomName`).
    Ack,
    /// Emergency recall: unconditional return to the first room.
    Sos,
}

impl FlowTarget {
    /// The exact token used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Room => "room",
            Self::RoomHello => "roomHello",
            Self::RoomGoodbye => "roomGoodbye",
            Self::Player => "player",
            Self::PlayerLocation => "playerLocation",
            Self::Ready => "ready",
            Self::Ack => "ack",
            Self::Sos => "sos",
        }
    }
}

impl FromStr for FlowTarget {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "room" => Ok(Self::Room),
            "roomHello" => Ok(Self::RoomHello),
            "roomGoodbye" => Ok(Self::RoomGoodbye),
            "player" => Ok(Self::Player),
            "playerLocation" => Ok(Self::PlayerLocation),
            "ready" => Ok(Self::Ready),
            "ack" => Ok(Self::Ack),
            "sos" => Ok(Self::Sos),
            other => Err(ProtocolError::MalformedEnvelope(format!(
                "unknown flow target: {other}"
            ))),
        }
    }
}

impl fmt::Display for FlowTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExitDirection
// ---------------------------------------------------------------------------

/// A direction out of a room.
///
/// The directory and the rooms speak in single letters (`N`, `S`, `E`,
/// `W`, `U`, `D`); parsing also accepts the full word, case-insensitively,
/// because devices send whatever the player typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitDirection {
    North,
    South,
    East,
    West,
    Up,
    Down,
}

impl ExitDirection {
    /// All directions, in the order exits are conventionally listed.
    pub const ALL: [ExitDirection; 6] = [
        Self::North,
        Self::South,
        Self::East,
        Self::West,
        Self::Up,
        Self::Down,
    ];

    /// The single-letter wire form.
    pub fn letter(&self) -> &'static str {
        match self {
            Self::North => "N",
            Self::South => "S",
            Self::East => "E",
            Self::West => "W",
            Self::Up => "U",
            Self::Down => "D",
        }
    }

    /// The human-readable name used in `/exits` listings.
    pub fn word(&self) -> &'static str {
        match self {
            Self::North => "North",
            Self::South => "South",
            Self::East => "East",
            Self::West => "West",
            Self::Up => "Up",
            Self::Down => "Down",
        }
    }

    /// Parses a direction from a letter or full word. Returns `None` for
    /// anything else — an unrecognized direction is not an error at the
    /// protocol level, it just isn't a direction.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "N" | "NORTH" => Some(Self::North),
            "S" | "SOUTH" => Some(Self::South),
            "E" | "EAST" => Some(Self::East),
            "W" | "WEST" => Some(Self::West),
            "U" | "UP" => Some(Self::Up),
            "D" | "DOWN" => Some(Self::Down),
            _ => None,
        }
    }
}

impl fmt::Display for ExitDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.letter())
    }
}

// ---------------------------------------------------------------------------
// LocationHint
// ---------------------------------------------------------------------------

/// How a `playerLocation` body resolves to a destination.
///
/// A body carries either an exit direction to walk, or a teleport flag
/// plus a destination room id — never meaningfully both. When both are
/// present anyway, teleport wins: a directed move must not depend on a
/// possibly stale exit table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationHint {
    /// Go directly to this room id, bypassing exit resolution.
    Teleport { room_id: String },
    /// Walk the current room's exit in this direction.
    Exit { direction: ExitDirection },
    /// No usable destination; the message is a no-op for routing.
    None,
}
