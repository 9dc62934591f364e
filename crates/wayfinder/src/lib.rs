//! # Wayfinder
//!
//! Multi-device session mediation and room routing over WebSockets.
//!
//! Wayfinder sits between a user's devices and the rooms they wander
//! through. Every device socket gets a session mediator; all of one
//! user's mediators share a pod with a single room connection, so chat
//! and events reach every device while joins, leaves, and room-to-room
//! transitions happen exactly once per user. Rooms are external
//! WebSocket backends found through a pluggable directory; unreachable
//! ones degrade in place and keep retrying instead of dropping the user.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wayfinder::WayfinderServerBuilder;
//! # async fn run(directory: Arc<impl wayfinder::SiteDirectory>,
//! #              auth: impl wayfinder::Authenticator) -> Result<(), wayfinder::WayfinderError> {
//! let server = WayfinderServerBuilder::new()
//!     .bind("0.0.0.0:9001")
//!     .build(directory, auth)
//!     .await?;
//! server.run().await
//! # }
//! ```

mod config;
mod error;
mod feed;
mod handler;
mod server;

pub use config::WayfinderConfig;
pub use error::WayfinderError;
pub use feed::{EventFeed, FeedOp, FeedRecord};
pub use server::{WayfinderServer, WayfinderServerBuilder};

// The types integrators implement or hold, re-exported so the meta
// crate is enough for most uses.
pub use wayfinder_protocol::{
    ExitDirection, FlowTarget, LocationHint, RoutedMessage,
};
pub use wayfinder_room::{
    RoomError, RoomSettings, SiteDirectory, SiteExit, SiteInfo,
};
pub use wayfinder_session::{
    AuthClaims, Authenticator, ClientMediator, MediatorNexus, NexusSettings,
    SessionError,
};
