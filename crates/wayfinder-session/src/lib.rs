//! Session layer for Wayfinder.
//!
//! Two pieces cooperate here. The [`ClientMediator`] is the per-device
//! session handle: it owns the device's outbound queue and survives the
//! socket, so a dropped connection can be resumed by presenting the
//! mediator id. The [`MediatorNexus`] coordinates across devices: all of
//! a user's mediators share one pod, one room, and one transition
//! pipeline, so joining, leaving, and moving rooms happen exactly once
//! per user regardless of how many devices are along for the ride.

#![allow(async_fn_in_trait)]

mod auth;
mod client;
mod error;
mod nexus;

pub use auth::{AuthClaims, Authenticator};
pub use client::ClientMediator;
pub use error::SessionError;
pub use nexus::{MediatorNexus, NexusSettings};
