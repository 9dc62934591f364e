//! Turns room ids and exits into mediators.
//!
//! Resolution never fails outright: whatever the directory says (or
//! fails to say), the caller gets a mediator back. Unknown or
//! backendless targets come back as EMPTY, known remote targets as
//! CONNECTING. Only exit resolution can error, and only because SICK and
//! EMPTY rooms have no exit table to resolve from.

use std::sync::Arc;

use wayfinder_protocol::ExitDirection;

use crate::mediator::{EMPTY_ROOM_ID, FIRST_ROOM_ID};
use crate::{Fanout, RoomError, RoomMediator, RoomSettings, RoomType, SiteDirectory};

/// Builds [`RoomMediator`]s for the session layer.
pub struct RoomResolver<D> {
    directory: Arc<D>,
    settings: RoomSettings,
}

impl<D: SiteDirectory> RoomResolver<D> {
    pub fn new(directory: Arc<D>, settings: RoomSettings) -> Self {
        Self {
            directory,
            settings,
        }
    }

    /// Resolves a room id to a mediator bound to `fanout`.
    ///
    /// A blank id or the first-room id yields the built-in first room; a
    /// directory hit with endpoints yields a CONNECTING remote; anything
    /// else (no endpoints, unknown id, directory failure) yields EMPTY.
    pub async fn for_room(
        &self,
        fanout: &Arc<Fanout>,
        room_id: &str,
    ) -> Arc<RoomMediator<D>> {
        if room_id.is_empty() || room_id == FIRST_ROOM_ID {
            return RoomMediator::first_room(
                Arc::clone(&self.directory),
                Arc::clone(fanout),
                self.settings.clone(),
            );
        }

        match self.directory.site(room_id).await {
            Ok(Some(site)) if !site.endpoints.is_empty() => {
                RoomMediator::remote(
                    site.id,
                    site.full_name,
                    site.endpoints,
                    Arc::clone(&self.directory),
                    Arc::clone(fanout),
                    self.settings.clone(),
                )
            }
            Ok(Some(site)) => {
                tracing::debug!(
                    room_id,
                    "room has no live backend, resolving as empty"
                );
                RoomMediator::empty(
                    site.id,
                    site.full_name,
                    Arc::clone(&self.directory),
                    Arc::clone(fanout),
                    self.settings.clone(),
                )
            }
            Ok(None) => {
                tracing::debug!(room_id, "unknown room, resolving as empty");
                self.empty_room(fanout, room_id)
            }
            Err(e) => {
                tracing::warn!(
                    room_id,
                    error = %e,
                    "directory lookup failed, resolving as empty"
                );
                self.empty_room(fanout, room_id)
            }
        }
    }

    /// Resolves the room on the far side of `direction` from `current`.
    ///
    /// # Errors
    /// Returns [`RoomError::ExitsUnavailable`] when `current` is SICK or
    /// EMPTY. A missing or doorless exit is not an error; it resolves to
    /// the EMPTY sink so the traveler lands somewhere.
    pub async fn for_exit(
        &self,
        fanout: &Arc<Fanout>,
        current: &RoomMediator<D>,
        direction: ExitDirection,
    ) -> Result<Arc<RoomMediator<D>>, RoomError> {
        match current.room_type().await {
            RoomType::Sick | RoomType::Empty => {
                return Err(RoomError::ExitsUnavailable(
                    current.id().to_string(),
                ));
            }
            _ => {}
        }
        let exits = current.exits().await?;
        let target = exits.get(&direction).and_then(|e| e.target_id.clone());
        match target {
            Some(room_id) => Ok(self.for_room(fanout, &room_id).await),
            None => {
                tracing::debug!(
                    room_id = %current.id(),
                    direction = %direction,
                    "no exit that way, resolving as empty"
                );
                Ok(self.empty_room(fanout, EMPTY_ROOM_ID))
            }
        }
    }

    fn empty_room(
        &self,
        fanout: &Arc<Fanout>,
        room_id: &str,
    ) -> Arc<RoomMediator<D>> {
        RoomMediator::empty(
            room_id,
            "A formless void",
            Arc::clone(&self.directory),
            Arc::clone(fanout),
            self.settings.clone(),
        )
    }
}
