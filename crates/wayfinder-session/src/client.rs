//! The client mediator: one connected device's session handle.
//!
//! Every WebSocket a user's device opens gets exactly one
//! [`ClientMediator`]. The mediator owns the device's outbound queue and
//! its drain, and forwards everything room-bound to the
//! [`MediatorNexus`](crate::MediatorNexus), which decides what the user's
//! pod as a whole should do with it.
//!
//! A mediator survives the socket it was created for: when the socket
//! drops, the mediator is suspended and can be resumed by a reconnecting
//! device that presents the same mediator id. The reaper destroys it if
//! nobody comes back.

use std::sync::{Arc, Mutex as StdMutex, Weak};

use rand::Rng;
use tokio::sync::Mutex;
use wayfinder_protocol::RoutedMessage;
use wayfinder_room::SiteDirectory;
use wayfinder_transport::{Connection, Drain, MessageQueue};

use crate::{MediatorNexus, SessionError};

struct DeviceLink {
    drain: Option<Drain>,
}

/// One device's session handle.
pub struct ClientMediator<D> {
    mediator_id: String,
    user_id: String,
    username: StdMutex<String>,
    queue: Arc<MessageQueue>,
    nexus: Weak<MediatorNexus<D>>,
    link: Mutex<DeviceLink>,
}

impl<D: SiteDirectory> ClientMediator<D> {
    pub(crate) fn new(
        nexus: Weak<MediatorNexus<D>>,
        user_id: &str,
        username: &str,
        queue_capacity: usize,
    ) -> Arc<Self> {
        let mediator_id = generate_mediator_id();
        let queue = Arc::new(MessageQueue::new(
            format!("client-{mediator_id}"),
            queue_capacity,
        ));
        tracing::info!(%mediator_id, user_id, "client mediator created");
        Arc::new(Self {
            mediator_id,
            user_id: user_id.to_string(),
            username: StdMutex::new(username.to_string()),
            queue,
            nexus,
            link: Mutex::new(DeviceLink { drain: None }),
        })
    }

    /// The session id a reconnecting device presents to resume.
    pub fn mediator_id(&self) -> &str {
        &self.mediator_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn username(&self) -> String {
        self.username.lock().expect("username lock poisoned").clone()
    }

    pub(crate) fn set_username(&self, username: &str) {
        *self.username.lock().expect("username lock poisoned") =
            username.to_string();
    }

    /// The outbound queue toward this device.
    pub fn queue(&self) -> Arc<MessageQueue> {
        Arc::clone(&self.queue)
    }

    /// Attaches a device socket: everything queued for this mediator now
    /// drains onto `conn`. A previous drain (resumed session) is stopped
    /// first; messages queued while suspended are preserved and flushed.
    pub async fn attach<C: Connection>(&self, conn: Arc<C>) {
        let mut link = self.link.lock().await;
        if let Some(old) = link.drain.take() {
            old.stop();
        }
        link.drain = Some(Drain::start(
            format!("client-{}-drain", self.mediator_id),
            Arc::clone(&self.queue),
            conn,
        ));
    }

    /// Joins this device to the user's pod, landing the pod in
    /// `resume_room_id` if it wasn't in a room yet. Ends with a per-device
    /// ack carrying the mediator id.
    pub async fn ready(
        self: &Arc<Self>,
        resume_room_id: &str,
        bookmark: i64,
    ) -> Result<(), SessionError> {
        let nexus = self
            .nexus
            .upgrade()
            .ok_or_else(|| SessionError::NoSuchPod(self.user_id.clone()))?;
        nexus.join(self, resume_room_id, bookmark).await;
        Ok(())
    }

    /// Routes one device-originated frame. Room-bound flows go to the
    /// pod's room; transition-driving flows (sos, playerLocation) move
    /// the whole pod.
    pub async fn send_to_room(
        &self,
        msg: &RoutedMessage,
    ) -> Result<(), SessionError> {
        let nexus = self
            .nexus
            .upgrade()
            .ok_or_else(|| SessionError::NoSuchPod(self.user_id.clone()))?;
        nexus.route_from_device(&self.user_id, msg).await;
        Ok(())
    }

    /// The device socket dropped. Stops the drain and parks this
    /// mediator with the nexus for possible resumption; the queue keeps
    /// accumulating so a resumed device catches up.
    pub async fn suspend(self: &Arc<Self>) {
        {
            let mut link = self.link.lock().await;
            if let Some(drain) = link.drain.take() {
                drain.stop();
            }
        }
        if let Some(nexus) = self.nexus.upgrade() {
            nexus.suspend(self);
        }
        tracing::info!(mediator_id = %self.mediator_id, "client suspended");
    }

    /// Permanently ends this session: leaves the pod, drops whatever
    /// was still queued, and forgets the mediator id. A device
    /// presenting the id afterwards starts fresh.
    pub async fn destroy(self: &Arc<Self>) {
        {
            let mut link = self.link.lock().await;
            if let Some(drain) = link.drain.take() {
                drain.stop();
            }
        }
        self.queue.clear();
        if let Some(nexus) = self.nexus.upgrade() {
            nexus.forget(self).await;
        }
        tracing::info!(mediator_id = %self.mediator_id, "client destroyed");
    }
}

/// Random 32-character hex id (128 bits). Unguessable, so presenting a
/// valid id is proof the device held the original session.
fn generate_mediator_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_mediator_id_is_32_hex_chars() {
        let id = generate_mediator_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generate_mediator_id_is_unique() {
        assert_ne!(generate_mediator_id(), generate_mediator_id());
    }
}
