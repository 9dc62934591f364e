//! Room-side mediation for Wayfinder.
//!
//! A pod (one user's set of connected devices) holds exactly one
//! [`RoomMediator`]: the connection handle to wherever that user
//! currently is. The mediator is a small state machine over a closed
//! variant set — first room, remote, connecting, sick, empty — so the
//! session layer never holds a null room and remote failures degrade in
//! place instead of tearing the pod down.
//!
//! # Key types
//!
//! - [`RoomMediator`] — the per-pod room handle and its state machine
//! - [`RoomType`] — the variant tag the session layer dispatches on
//! - [`RoomResolver`] — builds mediators from room ids or exits
//! - [`SiteDirectory`] — the room-directory ("concierge") interface
//! - [`Fanout`] — per-pod delivery hub from room to devices

#![allow(async_fn_in_trait)]

mod directory;
mod error;
mod fanout;
mod first_room;
mod mediator;
mod resolver;

pub use directory::{SiteDirectory, SiteExit, SiteInfo};
pub use error::RoomError;
pub use fanout::Fanout;
pub use mediator::{
    RoomMediator, RoomSettings, RoomType, EMPTY_ROOM_ID, FIRST_ROOM_ID,
    FIRST_ROOM_NAME,
};
pub use resolver::RoomResolver;
