//! Wire protocol for Wayfinder.
//!
//! This crate defines the envelope that every message between devices,
//! mediators, and room backends travels in:
//!
//! - **[`RoutedMessage`]** — the three-segment `flow,destination,json`
//!   envelope, kept both raw and parsed.
//! - **[`FlowTarget`]** — which handler a message is for, and how it is
//!   queued.
//! - **[`ExitDirection`] / [`LocationHint`]** — how a `playerLocation`
//!   body resolves to a destination.
//! - **[`ProtocolError`]** — what can go wrong while decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between transport (raw text frames) and the
//! session layer (mediators, pods). It doesn't know about connections or
//! rooms — it only knows how to parse and re-emit envelopes.
//!
//! ```text
//! Transport (frames) → Protocol (RoutedMessage) → Session (mediators)
//! ```

mod error;
mod message;
mod types;

pub use error::ProtocolError;
pub use message::RoutedMessage;
pub use types::{ExitDirection, FlowTarget, LocationHint, WILDCARD};
