//! The room mediator: one pod's connection handle to wherever its user
//! currently is.
//!
//! A mediator is a small state machine over a closed variant set:
//!
//! ```text
//!            ┌────────────┐  dial ok   ┌────────┐
//!            │ Connecting ├───────────→│ Remote │←──┐
//!            └─────┬──────┘            └───┬────┘   │ retry ok
//!                  │ dial failed           │ closed │
//!                  ▼                       ▼        │
//!              ┌──────┐               ┌──────┐      │
//!              │ Sick │←──────────────┤ Sick ├──────┘
//!              └──────┘  reconnect    └──────┘
//!   FirstRoom / Empty: no network, terminal for this binding
//! ```
//!
//! Transitions happen in place behind one mutex, so the pod's `Arc` to
//! the mediator stays valid across degradation — a dead backend never
//! costs the user their room membership.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use wayfinder_protocol::{ExitDirection, FlowTarget, RoutedMessage};
use wayfinder_transport::{
    ws_connect, ClientWsConnection, Connection, Drain, MessageQueue,
};

use crate::{first_room, Fanout, RoomError, SiteDirectory, SiteExit};

/// Room id of the built-in fallback/tutorial room.
pub const FIRST_ROOM_ID: &str = "firstroom";

/// Display name of the built-in fallback/tutorial room.
pub const FIRST_ROOM_NAME: &str = "The First Room";

/// Room id used when resolution produced nothing usable at all.
pub const EMPTY_ROOM_ID: &str = "empty";

/// The variant tag. The session layer dispatches fallback decisions on
/// this, never on the variants themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomType {
    FirstRoom,
    Remote,
    Connecting,
    Sick,
    Empty,
}

/// Tunables for room connections.
#[derive(Debug, Clone)]
pub struct RoomSettings {
    /// Per-endpoint dial timeout during a connect attempt.
    pub connect_timeout: Duration,
    /// How often a sick room retries its endpoints.
    pub sick_retry_interval: Duration,
    /// How stale the cached exit table may get before a directory refresh.
    pub exit_cache_ttl: Duration,
    /// Capacity of the outbound-to-room message queue.
    pub queue_capacity: usize,
}

impl Default for RoomSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            sick_retry_interval: Duration::from_secs(30),
            exit_cache_ttl: Duration::from_secs(300),
            queue_capacity: 64,
        }
    }
}

/// The user this pod-room binding is for. Recorded at `hello` so a
/// revived connection can replay the hello without asking anyone.
#[derive(Debug, Clone)]
pub(crate) struct Occupant {
    pub user_id: String,
    pub username: String,
    pub bookmark: i64,
}

/// A live link to a remote room backend.
struct RemoteLink {
    endpoints: Vec<String>,
    conn: Arc<ClientWsConnection>,
    queue: Arc<MessageQueue>,
    drain: Drain,
    listener: JoinHandle<()>,
}

enum RoomVariant {
    FirstRoom,
    Remote(RemoteLink),
    Connecting { endpoints: Vec<String> },
    Sick { endpoints: Vec<String> },
    Empty,
}

impl RoomVariant {
    fn tag(&self) -> RoomType {
        match self {
            Self::FirstRoom => RoomType::FirstRoom,
            Self::Remote(_) => RoomType::Remote,
            Self::Connecting { .. } => RoomType::Connecting,
            Self::Sick { .. } => RoomType::Sick,
            Self::Empty => RoomType::Empty,
        }
    }
}

/// One pod's handle to a room. Created by the
/// [`RoomResolver`](crate::RoomResolver), shared as an `Arc`.
pub struct RoomMediator<D> {
    id: String,
    name: StdMutex<String>,
    pub(crate) directory: Arc<D>,
    pub(crate) fanout: Arc<Fanout>,
    settings: RoomSettings,
    pub(crate) occupant: StdMutex<Option<Occupant>>,
    variant: Mutex<RoomVariant>,
    exits: StdMutex<Option<(HashMap<ExitDirection, SiteExit>, Instant)>>,
    /// Sequence marker for locally synthesized messages.
    bookmark: AtomicI64,
}

impl<D: SiteDirectory> RoomMediator<D> {
    fn build(
        id: impl Into<String>,
        name: impl Into<String>,
        variant: RoomVariant,
        directory: Arc<D>,
        fanout: Arc<Fanout>,
        settings: RoomSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            name: StdMutex::new(name.into()),
            directory,
            fanout,
            settings,
            occupant: StdMutex::new(None),
            variant: Mutex::new(variant),
            exits: StdMutex::new(None),
            bookmark: AtomicI64::new(1),
        })
    }

    /// The built-in fallback room. No network, always connectable.
    pub fn first_room(
        directory: Arc<D>,
        fanout: Arc<Fanout>,
        settings: RoomSettings,
    ) -> Arc<Self> {
        Self::build(
            FIRST_ROOM_ID,
            FIRST_ROOM_NAME,
            RoomVariant::FirstRoom,
            directory,
            fanout,
            settings,
        )
    }

    /// A remote room, initially CONNECTING until [`connect`](Self::connect)
    /// resolves it.
    pub fn remote(
        id: impl Into<String>,
        name: impl Into<String>,
        endpoints: Vec<String>,
        directory: Arc<D>,
        fanout: Arc<Fanout>,
        settings: RoomSettings,
    ) -> Arc<Self> {
        Self::build(
            id,
            name,
            RoomVariant::Connecting { endpoints },
            directory,
            fanout,
            settings,
        )
    }

    /// The last-resort sink when resolution produced nothing usable.
    pub fn empty(
        id: impl Into<String>,
        name: impl Into<String>,
        directory: Arc<D>,
        fanout: Arc<Fanout>,
        settings: RoomSettings,
    ) -> Arc<Self> {
        Self::build(
            id,
            name,
            RoomVariant::Empty,
            directory,
            fanout,
            settings,
        )
    }

    /// The room id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The display name (updated from directory metadata as it is seen).
    pub fn name(&self) -> String {
        self.name.lock().expect("name lock poisoned").clone()
    }

    pub(crate) fn set_name(&self, name: &str) {
        *self.name.lock().expect("name lock poisoned") = name.to_string();
    }

    /// The current variant tag.
    pub async fn room_type(&self) -> RoomType {
        self.variant.lock().await.tag()
    }

    /// Next sequence marker for a locally synthesized message.
    pub(crate) fn next_bookmark(&self) -> i64 {
        self.bookmark.fetch_add(1, Ordering::Relaxed)
    }

    // -- Connection lifecycle ---------------------------------------------

    /// Brings the mediator to a live state.
    ///
    /// FIRST_ROOM, EMPTY, and an already-live REMOTE succeed immediately.
    /// CONNECTING and SICK dial each candidate endpoint once, in order;
    /// the first success wins. A failed attempt leaves the mediator SICK
    /// with its retry schedule running and returns
    /// [`RoomError::RoomUnreachable`].
    ///
    /// Boxed: the inbound listener re-enters `connect` after a remote
    /// close, and the recursive opaque future defeats `Send` inference.
    pub fn connect(
        self: &Arc<Self>,
    ) -> Pin<Box<dyn Future<Output = Result<(), RoomError>> + Send + '_>> {
        Box::pin(self.connect_inner())
    }

    async fn connect_inner(self: &Arc<Self>) -> Result<(), RoomError> {
        let mut variant = self.variant.lock().await;
        let (endpoints, was_sick) = match &*variant {
            RoomVariant::FirstRoom
            | RoomVariant::Empty
            | RoomVariant::Remote(_) => return Ok(()),
            RoomVariant::Connecting { endpoints } => {
                (endpoints.clone(), false)
            }
            RoomVariant::Sick { endpoints } => (endpoints.clone(), true),
        };

        if endpoints.is_empty() {
            // Nothing to dial; behave as the degraded sink.
            *variant = RoomVariant::Empty;
            return Ok(());
        }

        match self.dial(&endpoints).await {
            Ok(link) => {
                tracing::info!(room_id = %self.id, "room connected");
                // Replay the hello before anything else can queue, so
                // the backend learns who this binding is for.
                if let Some(occupant) = self
                    .occupant
                    .lock()
                    .expect("occupant lock poisoned")
                    .clone()
                {
                    link.queue.push(self.hello_message(&occupant).encode());
                }
                *variant = RoomVariant::Remote(link);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(
                    room_id = %self.id,
                    error = %e,
                    "room unreachable, degrading to sick"
                );
                *variant = RoomVariant::Sick { endpoints };
                if !was_sick {
                    spawn_retry(
                        Arc::downgrade(self),
                        self.settings.sick_retry_interval,
                    );
                }
                Err(e)
            }
        }
    }

    /// Dials each endpoint once; first success wins.
    async fn dial(
        self: &Arc<Self>,
        endpoints: &[String],
    ) -> Result<RemoteLink, RoomError> {
        for url in endpoints {
            let attempt = tokio::time::timeout(
                self.settings.connect_timeout,
                ws_connect(url),
            )
            .await;
            match attempt {
                Ok(Ok(conn)) => {
                    let conn = Arc::new(conn);
                    let queue = Arc::new(MessageQueue::new(
                        format!("room-{}-out", self.id),
                        self.settings.queue_capacity,
                    ));
                    let drain = Drain::start(
                        format!("room-{}-drain", self.id),
                        Arc::clone(&queue),
                        Arc::clone(&conn),
                    );
                    let listener = tokio::spawn(listen(
                        Arc::downgrade(self),
                        Arc::clone(&conn),
                    ));
                    return Ok(RemoteLink {
                        endpoints: endpoints.to_vec(),
                        conn,
                        queue,
                        drain,
                        listener,
                    });
                }
                Ok(Err(e)) => {
                    tracing::debug!(
                        room_id = %self.id, url, error = %e, "dial failed"
                    );
                }
                Err(_) => {
                    tracing::debug!(
                        room_id = %self.id, url, "dial timed out"
                    );
                }
            }
        }
        Err(RoomError::RoomUnreachable(self.id.clone()))
    }

    /// Reacts to the remote socket closing: one immediate reconnect
    /// attempt, then SICK.
    async fn handle_remote_closed(
        self: Arc<Self>,
        closed: wayfinder_transport::ConnectionId,
    ) {
        {
            let mut variant = self.variant.lock().await;
            match &*variant {
                RoomVariant::Remote(link) if link.conn.id() == closed => {
                    tracing::info!(
                        room_id = %self.id,
                        "room connection closed, attempting reconnect"
                    );
                    let endpoints = link.endpoints.clone();
                    *variant = RoomVariant::Connecting { endpoints };
                }
                // A newer link already replaced the closed one.
                _ => return,
            }
        }
        let _ = self.connect().await;
    }

    /// Tears down any live connection. Membership bookkeeping is the
    /// nexus's business; this only releases the socket and its tasks.
    pub async fn disconnect(&self) {
        let mut variant = self.variant.lock().await;
        match std::mem::replace(&mut *variant, RoomVariant::Empty) {
            RoomVariant::Remote(link) => {
                link.drain.stop();
                link.listener.abort();
                let _ = link.conn.close().await;
                *variant = RoomVariant::Connecting {
                    endpoints: link.endpoints,
                };
                tracing::debug!(room_id = %self.id, "room disconnected");
            }
            RoomVariant::Sick { endpoints } => {
                // The retry task sees the tag change and exits.
                *variant = RoomVariant::Connecting { endpoints };
            }
            other => *variant = other,
        }
    }

    // -- Room-facing operations -------------------------------------------

    /// Announces the user to the room. Exactly one hello per pod per
    /// room occupancy — the nexus enforces that; this just delivers it.
    pub async fn hello(&self, user_id: &str, username: &str, bookmark: i64) {
        let occupant = Occupant {
            user_id: user_id.to_string(),
            username: username.to_string(),
            bookmark,
        };
        *self.occupant.lock().expect("occupant lock poisoned") =
            Some(occupant.clone());

        let variant = self.variant.lock().await;
        match &*variant {
            RoomVariant::Remote(link) => {
                link.queue.push(self.hello_message(&occupant).encode());
            }
            RoomVariant::FirstRoom => {
                drop(variant);
                first_room::intro(self, user_id).await;
            }
            RoomVariant::Empty => {
                drop(variant);
                self.synth_event(
                    user_id,
                    "You have arrived... nowhere in particular. There is \
                     nothing here, and nobody to ask about it.",
                );
            }
            RoomVariant::Sick { .. } => {
                drop(variant);
                self.out_of_service(user_id);
            }
            RoomVariant::Connecting { .. } => {
                // The occupant is recorded; connect() replays the hello.
                tracing::debug!(
                    room_id = %self.id,
                    "hello while connecting, deferred"
                );
            }
        }
    }

    /// Announces the user's departure. Exactly-once is the nexus's job.
    ///
    /// Ends outbound delivery for this link: the queue is flushed and
    /// the goodbye sent directly, so it cannot be lost to the teardown
    /// that always follows. Call [`disconnect`](Self::disconnect) next.
    pub async fn goodbye(&self, user_id: &str, username: &str) {
        let variant = self.variant.lock().await;
        if let RoomVariant::Remote(link) = &*variant {
            link.drain.stop();
            while !link.queue.is_empty() {
                let frame = link.queue.pop().await;
                if link.conn.send(&frame).await.is_err() {
                    break;
                }
            }
            let msg = RoutedMessage::new(
                FlowTarget::RoomGoodbye,
                self.id.clone(),
                json!({ "username": username, "userId": user_id }),
            )
            .expect("goodbye body is a valid object");
            if let Err(e) = link.conn.send(&msg.encode()).await {
                tracing::debug!(
                    room_id = %self.id,
                    error = %e,
                    "goodbye not delivered"
                );
            }
        }
        drop(variant);
        *self.occupant.lock().expect("occupant lock poisoned") = None;
    }

    /// Routes one device-originated message to the room.
    pub async fn send(&self, msg: &RoutedMessage) {
        let variant = self.variant.lock().await;
        match &*variant {
            RoomVariant::Remote(link) => {
                link.queue.push(msg.encode());
            }
            RoomVariant::FirstRoom => {
                drop(variant);
                first_room::handle(self, msg).await;
            }
            RoomVariant::Sick { .. } => {
                drop(variant);
                let dest = self.occupant_user_id(msg);
                self.out_of_service(&dest);
            }
            RoomVariant::Empty => {
                drop(variant);
                // Chat gets a hollow echo; everything else is swallowed.
                if msg.content().is_some() {
                    let dest = self.occupant_user_id(msg);
                    self.synth_event(
                        &dest,
                        "Your words echo into the void. Nothing answers.",
                    );
                }
            }
            RoomVariant::Connecting { .. } => {
                // Policy: no buffering while a dial is in flight.
                tracing::warn!(
                    room_id = %self.id,
                    "message to connecting room dropped"
                );
            }
        }
    }

    /// The exit table, refreshed from the directory when stale.
    ///
    /// # Errors
    /// SICK and EMPTY rooms have no trustworthy exits; resolution from
    /// them is rejected with [`RoomError::ExitsUnavailable`].
    pub async fn exits(
        &self,
    ) -> Result<HashMap<ExitDirection, SiteExit>, RoomError> {
        match self.room_type().await {
            RoomType::Sick | RoomType::Empty => {
                return Err(RoomError::ExitsUnavailable(self.id.clone()));
            }
            _ => {}
        }

        if let Some((map, checked)) = self
            .exits
            .lock()
            .expect("exits lock poisoned")
            .clone()
        {
            if checked.elapsed() < self.settings.exit_cache_ttl {
                return Ok(map);
            }
        }

        match self.directory.site(&self.id).await {
            Ok(Some(site)) => {
                self.set_name(&site.full_name);
                *self.exits.lock().expect("exits lock poisoned") =
                    Some((site.exits.clone(), Instant::now()));
                Ok(site.exits)
            }
            Ok(None) => {
                let empty = HashMap::new();
                *self.exits.lock().expect("exits lock poisoned") =
                    Some((empty.clone(), Instant::now()));
                Ok(empty)
            }
            Err(e) => {
                // A stale table beats no table.
                if let Some((map, _)) = self
                    .exits
                    .lock()
                    .expect("exits lock poisoned")
                    .clone()
                {
                    tracing::debug!(
                        room_id = %self.id,
                        error = %e,
                        "directory refresh failed, using stale exits"
                    );
                    return Ok(map);
                }
                Err(e)
            }
        }
    }

    // -- Synthesized content ----------------------------------------------

    fn hello_message(&self, occupant: &Occupant) -> RoutedMessage {
        RoutedMessage::new(
            FlowTarget::RoomHello,
            self.id.clone(),
            json!({
                "username": occupant.username,
                "userId": occupant.user_id,
                "bookmark": occupant.bookmark,
            }),
        )
        .expect("hello body is a valid object")
    }

    /// The user this binding is for, falling back to the message's own
    /// `userId` field during the window before hello.
    fn occupant_user_id(&self, msg: &RoutedMessage) -> String {
        self.occupant
            .lock()
            .expect("occupant lock poisoned")
            .as_ref()
            .map(|o| o.user_id.clone())
            .or_else(|| msg.user_id().map(str::to_string))
            .unwrap_or_else(|| "*".to_string())
    }

    /// Fans out a locally synthesized narrative event.
    pub(crate) fn synth_event(&self, dest: &str, text: &str) {
        let msg = RoutedMessage::new(
            FlowTarget::Player,
            dest,
            json!({
                "type": "event",
                "content": { dest: text },
                "bookmark": self.next_bookmark(),
            }),
        )
        .expect("event body is a valid object");
        self.fanout.deliver(&msg);
    }

    fn out_of_service(&self, dest: &str) {
        self.synth_event(
            dest,
            "The room is out of service at the moment. It is being \
             looked at; give it a little while and try again.",
        );
    }
}

/// Inbound listener: decodes frames from the room backend and fans them
/// out to the pod. On close it hands control back to the mediator for
/// the reconnect-once-then-sick dance.
async fn listen<D: SiteDirectory>(
    room: Weak<RoomMediator<D>>,
    conn: Arc<ClientWsConnection>,
) {
    let conn_id = conn.id();
    loop {
        match conn.recv().await {
            Ok(Some(frame)) => {
                let Some(room) = room.upgrade() else { return };
                match RoutedMessage::decode(&frame) {
                    Ok(msg) => room.fanout.deliver(&msg),
                    Err(e) => {
                        tracing::debug!(
                            room_id = %room.id(),
                            error = %e,
                            "dropping malformed frame from room"
                        );
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                if let Some(room) = room.upgrade() {
                    tracing::debug!(
                        room_id = %room.id(),
                        error = %e,
                        "room receive failed"
                    );
                }
                break;
            }
        }
    }
    if let Some(room) = room.upgrade() {
        room.handle_remote_closed(conn_id).await;
    }
}

/// The sick-room retry schedule. Self-terminating: it exits as soon as
/// the mediator is no longer SICK (revived, disconnected, or dropped).
fn spawn_retry<D: SiteDirectory>(
    room: Weak<RoomMediator<D>>,
    interval: Duration,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(room) = room.upgrade() else { break };
            if room.room_type().await != RoomType::Sick {
                break;
            }
            tracing::debug!(room_id = %room.id(), "sick room retrying");
            if room.connect().await.is_ok() {
                break;
            }
        }
    });
}
