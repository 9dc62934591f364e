//! The room-directory ("concierge") interface.
//!
//! The directory is an external collaborator: given a room id it returns
//! site metadata — names, description, exits, and the connection
//! endpoints of the backend hosting it. Wayfinder consumes it through
//! this narrow trait; the real HTTP client lives outside this crate, and
//! tests inject in-memory implementations.

use std::collections::HashMap;
use std::future::Future;

use serde::{Deserialize, Serialize};
use wayfinder_protocol::ExitDirection;

use crate::RoomError;

/// One exit out of a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteExit {
    /// The door label shown to players ("A heavy oak door").
    pub door: String,
    /// The room id on the other side, when the directory knows it.
    pub target_id: Option<String>,
}

/// Site metadata returned by the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteInfo {
    /// The room id.
    pub id: String,
    /// Short name.
    pub name: String,
    /// Long display name.
    pub full_name: String,
    /// Room description, shown on entry and `/look`.
    pub description: String,
    /// The owning user, if registered.
    pub owner: Option<String>,
    /// Exits by direction.
    pub exits: HashMap<ExitDirection, SiteExit>,
    /// Candidate WebSocket endpoints for the hosting backend, in
    /// preference order. Empty when the room has no live backend.
    pub endpoints: Vec<String>,
}

/// Looks up rooms and their connection endpoints.
///
/// The methods return named `Send` futures because lookups happen inside
/// spawned tasks (sick-room retries, exit refreshes).
pub trait SiteDirectory: Send + Sync + 'static {
    /// Returns the site for a room id, or `None` if the directory has
    /// never heard of it.
    fn site(
        &self,
        room_id: &str,
    ) -> impl Future<Output = Result<Option<SiteInfo>, RoomError>> + Send;

    /// Returns every site owned by the given user (backs `/listmyrooms`
    /// and `/teleport`).
    fn sites_for_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<SiteInfo>, RoomError>> + Send;
}
