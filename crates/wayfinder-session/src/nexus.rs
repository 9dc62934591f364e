//! The mediator nexus: cross-device session coordination.
//!
//! All of a user's connected devices share one *pod*. The pod holds the
//! single room mediator the user occupies and the fanout that copies
//! room traffic to every device. The nexus owns the pods and serializes
//! everything that changes where a pod is: joins, parts, and room
//! transitions all run under the pod's lock, which is what makes the
//! room hello/goodbye pair fire exactly once per occupancy no matter how
//! many devices race.
//!
//! Suspended sessions (device socket dropped, mediator parked for
//! resumption) are swept by a reaper task that destroys them after a
//! configurable number of sweeps. The reaper only runs while there is
//! something to reap.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use wayfinder_protocol::{
    ExitDirection, FlowTarget, LocationHint, RoutedMessage,
};
use wayfinder_room::{
    Fanout, RoomMediator, RoomResolver, RoomSettings, SiteDirectory,
    FIRST_ROOM_ID,
};

use crate::{ClientMediator, SessionError};

/// Tunables for the session layer.
#[derive(Debug, Clone)]
pub struct NexusSettings {
    /// Capacity of each device's outbound queue.
    pub queue_capacity: usize,
    /// How often the reaper sweeps suspended sessions.
    pub reaper_sweep_interval: Duration,
    /// How many sweeps a suspended session survives before it is
    /// destroyed.
    pub reaper_threshold: u32,
}

impl Default for NexusSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            reaper_sweep_interval: Duration::from_secs(60),
            reaper_threshold: 5,
        }
    }
}

struct PodState<D> {
    members: HashMap<String, Arc<ClientMediator<D>>>,
    room: Option<Arc<RoomMediator<D>>>,
    /// Set when the last member leaves; a racing join re-fetches the
    /// pod map instead of resurrecting a removed pod.
    retired: bool,
}

/// One user's set of connected devices and their shared room.
pub(crate) struct Pod<D> {
    user_id: String,
    username: StdMutex<String>,
    fanout: Arc<Fanout>,
    inner: Mutex<PodState<D>>,
}

impl<D> Pod<D> {
    fn username(&self) -> String {
        self.username.lock().expect("username lock poisoned").clone()
    }

    fn set_username(&self, username: &str) {
        *self.username.lock().expect("username lock poisoned") =
            username.to_string();
    }
}

struct SuspendedEntry<D> {
    client: Arc<ClientMediator<D>>,
    sweeps: u32,
}

struct SuspendedTable<D> {
    entries: HashMap<String, SuspendedEntry<D>>,
    reaper_running: bool,
}

enum RoomTarget<D> {
    Id(String),
    Resolved(Arc<RoomMediator<D>>),
}

/// The cross-device session coordinator.
pub struct MediatorNexus<D> {
    resolver: RoomResolver<D>,
    settings: NexusSettings,
    pods: Mutex<HashMap<String, Arc<Pod<D>>>>,
    suspended: StdMutex<SuspendedTable<D>>,
}

impl<D: SiteDirectory> MediatorNexus<D> {
    pub fn new(
        directory: Arc<D>,
        room_settings: RoomSettings,
        settings: NexusSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            resolver: RoomResolver::new(directory, room_settings),
            settings,
            pods: Mutex::new(HashMap::new()),
            suspended: StdMutex::new(SuspendedTable {
                entries: HashMap::new(),
                reaper_running: false,
            }),
        })
    }

    /// Creates a fresh session for a newly authenticated device.
    pub fn create_session(
        self: &Arc<Self>,
        user_id: &str,
        username: &str,
    ) -> Arc<ClientMediator<D>> {
        ClientMediator::new(
            Arc::downgrade(self),
            user_id,
            username,
            self.settings.queue_capacity,
        )
    }

    /// Resumes a suspended session, if the presented mediator id is held
    /// for this user. Anything else (unknown id, someone else's id)
    /// yields `None` and the caller starts fresh.
    pub fn resume_session(
        &self,
        mediator_id: &str,
        user_id: &str,
    ) -> Option<Arc<ClientMediator<D>>> {
        let mut table =
            self.suspended.lock().expect("suspended lock poisoned");
        match table.entries.get(mediator_id) {
            Some(entry) if entry.client.user_id() == user_id => {
                let client = table
                    .entries
                    .remove(mediator_id)
                    .map(|e| e.client)
                    .expect("entry was just matched");
                tracing::info!(%mediator_id, user_id, "session resumed");
                Some(client)
            }
            Some(_) => {
                tracing::warn!(
                    %mediator_id,
                    user_id,
                    "resume refused, mediator belongs to another user"
                );
                None
            }
            None => None,
        }
    }

    // -- Pod membership ---------------------------------------------------

    /// Adds a device to its user's pod. The first device in lands the
    /// pod in `resume_room_id` (or wherever the fallback ladder ends);
    /// later devices join wherever the pod already is. Ends with a
    /// per-device ack carrying the mediator id.
    pub(crate) async fn join(
        self: &Arc<Self>,
        client: &Arc<ClientMediator<D>>,
        resume_room_id: &str,
        bookmark: i64,
    ) {
        loop {
            let pod =
                self.pod_for(client.user_id(), &client.username()).await;
            let mut inner = pod.inner.lock().await;
            if inner.retired {
                // Let the parting task finish removing the pod before we
                // fetch a fresh one.
                drop(inner);
                tokio::task::yield_now().await;
                continue;
            }

            let mediator_id = client.mediator_id();
            inner
                .members
                .insert(mediator_id.to_string(), Arc::clone(client));
            pod.fanout.subscribe(
                mediator_id,
                client.user_id(),
                bookmark,
                client.queue(),
            );

            if inner.room.is_none() {
                let landed = self
                    .land(
                        &pod,
                        None,
                        RoomTarget::Id(resume_room_id.to_string()),
                        bookmark,
                    )
                    .await;
                inner.room = Some(landed);
            }
            let room = inner
                .room
                .clone()
                .expect("pod was just landed in a room");

            // A device resuming into a pod that moved on without it gets
            // told before the ack corrects its record.
            if !resume_room_id.is_empty() && room.id() != resume_room_id {
                client.queue().push(self.device_event(
                    client,
                    &format!(
                        "The rest of you is already in {}. Reuniting.",
                        room.name()
                    ),
                ));
            }
            client
                .queue()
                .push(self.device_ack(client, &room, bookmark));
            tracing::info!(
                %mediator_id,
                user_id = client.user_id(),
                room_id = room.id(),
                "device joined pod"
            );
            return;
        }
    }

    /// Removes a device from its pod. The last device out triggers the
    /// room goodbye and retires the pod. Idempotent.
    ///
    /// The pod map lock is only held for the lookup and the final
    /// removal; the goodbye's network sends happen under the pod lock
    /// alone so other users' pods stay reachable throughout.
    pub(crate) async fn part(&self, client: &Arc<ClientMediator<D>>) {
        let Some(pod) = self.pod(client.user_id()).await else {
            return;
        };
        let mut inner = pod.inner.lock().await;
        if inner.members.remove(client.mediator_id()).is_none() {
            return;
        }
        pod.fanout.unsubscribe(client.mediator_id());
        tracing::info!(
            mediator_id = %client.mediator_id(),
            user_id = client.user_id(),
            "device left pod"
        );

        if !inner.members.is_empty() {
            return;
        }
        inner.retired = true;
        let room = inner.room.take();
        drop(inner);

        if let Some(room) = room {
            room.goodbye(client.user_id(), &pod.username()).await;
            room.disconnect().await;
        }

        let mut pods = self.pods.lock().await;
        // A racing join may already have replaced the retired pod.
        if pods
            .get(client.user_id())
            .is_some_and(|p| Arc::ptr_eq(p, &pod))
        {
            pods.remove(client.user_id());
        }
        tracing::info!(user_id = client.user_id(), "pod retired");
    }

    // -- Transitions ------------------------------------------------------

    /// Moves the whole pod to `room_id`. A transition to the room the
    /// pod is already in is a no-op.
    pub async fn transition(
        self: &Arc<Self>,
        user_id: &str,
        room_id: &str,
    ) -> Result<(), SessionError> {
        let pod = self
            .pod(user_id)
            .await
            .ok_or_else(|| SessionError::NoSuchPod(user_id.to_string()))?;
        let mut inner = pod.inner.lock().await;
        if let Some(current) = &inner.room {
            if current.id() == room_id {
                tracing::debug!(user_id, room_id, "already there");
                return Ok(());
            }
        }
        let old = inner.room.take();
        let landed = self
            .land(&pod, old, RoomTarget::Id(room_id.to_string()), 0)
            .await;
        self.ack_members(&inner, &landed);
        inner.room = Some(landed);
        Ok(())
    }

    /// Walks the pod through an exit of its current room.
    pub async fn transition_via_exit(
        self: &Arc<Self>,
        user_id: &str,
        direction: ExitDirection,
    ) -> Result<(), SessionError> {
        let pod = self
            .pod(user_id)
            .await
            .ok_or_else(|| SessionError::NoSuchPod(user_id.to_string()))?;
        let mut inner = pod.inner.lock().await;
        let Some(current) = inner.room.clone() else {
            return Err(SessionError::NoSuchPod(user_id.to_string()));
        };
        match self
            .resolver
            .for_exit(&pod.fanout, &current, direction)
            .await
        {
            Ok(next) => {
                if next.id() == current.id() {
                    return Ok(());
                }
                let old = inner.room.take();
                let landed = self
                    .land(&pod, old, RoomTarget::Resolved(next), 0)
                    .await;
                self.ack_members(&inner, &landed);
                inner.room = Some(landed);
            }
            Err(e) => {
                tracing::debug!(user_id, error = %e, "exit refused");
                self.notice(
                    &pod,
                    "You cannot find a way out from here. Maybe shout /sos?",
                );
            }
        }
        Ok(())
    }

    /// The part/find/connect/join dance, shared by every way a pod can
    /// change rooms. Runs under the pod lock held by the caller.
    ///
    /// Fallback ladder on connect failure: back into `old`, and failing
    /// that, the first room. The returned mediator is always live and
    /// has been helloed. `bookmark` seeds the hello on a resume; mid-flight
    /// transitions pass 0 since the devices already hold their floors.
    async fn land(
        &self,
        pod: &Arc<Pod<D>>,
        old: Option<Arc<RoomMediator<D>>>,
        target: RoomTarget<D>,
        bookmark: i64,
    ) -> Arc<RoomMediator<D>> {
        let username = pod.username();
        if let Some(old) = &old {
            self.notice(pod, &format!("You head out of {}.", old.name()));
            old.goodbye(&pod.user_id, &username).await;
            old.disconnect().await;
        }
        self.notice(pod, "Finding your way...");
        let room = match target {
            RoomTarget::Id(id) => {
                self.resolver.for_room(&pod.fanout, &id).await
            }
            RoomTarget::Resolved(room) => room,
        };
        self.notice(pod, &format!("Connecting you to {}...", room.name()));

        let landed = match room.connect().await {
            Ok(()) => room,
            Err(e) => {
                tracing::warn!(
                    user_id = %pod.user_id,
                    room_id = room.id(),
                    error = %e,
                    "landing failed, walking the fallback ladder"
                );
                self.notice(
                    pod,
                    "Well, that was a bad ride. Looking for somewhere \
                     safe to put you down.",
                );
                let mut fallback = None;
                if let Some(old) = old {
                    if old.connect().await.is_ok() {
                        fallback = Some(old);
                    }
                }
                match fallback {
                    Some(old) => old,
                    None => {
                        let first = self
                            .resolver
                            .for_room(&pod.fanout, FIRST_ROOM_ID)
                            .await;
                        // The first room is in-process; this cannot fail.
                        let _ = first.connect().await;
                        first
                    }
                }
            }
        };
        landed.hello(&pod.user_id, &username, bookmark).await;
        self.notice(
            pod,
            &format!("You have joined {}.", landed.name()),
        );
        landed
    }

    // -- Device-originated routing ----------------------------------------

    /// Routes one frame from a device: room-bound flows to the pod's
    /// room, transition-driving flows through the transition machinery.
    pub(crate) async fn route_from_device(
        self: &Arc<Self>,
        user_id: &str,
        msg: &RoutedMessage,
    ) {
        match msg.flow_target() {
            FlowTarget::Sos => {
                if let Some(pod) = self.pod(user_id).await {
                    self.notice(
                        &pod,
                        "Received your SOS! Hold tight, rescue is on the \
                         way.",
                    );
                }
                let _ = self.transition(user_id, FIRST_ROOM_ID).await;
            }
            FlowTarget::PlayerLocation => {
                self.follow_hint(user_id, msg).await;
            }
            FlowTarget::Room
            | FlowTarget::RoomHello
            | FlowTarget::RoomGoodbye => {
                let room = match self.pod(user_id).await {
                    Some(pod) => pod.inner.lock().await.room.clone(),
                    None => None,
                };
                match room {
                    Some(room) => room.send(msg).await,
                    None => tracing::debug!(
                        user_id,
                        "room-bound frame from a device with no pod"
                    ),
                }
            }
            other => {
                tracing::debug!(
                    user_id,
                    flow = %other,
                    "unroutable device frame dropped"
                );
            }
        }
    }

    /// Applies a location message's destination. Teleport wins over an
    /// exit when both are present.
    async fn follow_hint(
        self: &Arc<Self>,
        user_id: &str,
        msg: &RoutedMessage,
    ) {
        match msg.location_hint() {
            LocationHint::Teleport { room_id } => {
                let _ = self.transition(user_id, &room_id).await;
            }
            LocationHint::Exit { direction } => {
                let _ = self.transition_via_exit(user_id, direction).await;
            }
            LocationHint::None => {
                tracing::debug!(
                    user_id,
                    "location message with no usable destination"
                );
            }
        }
    }

    // -- Suspension and the reaper ----------------------------------------

    /// Parks a disconnected device's session for possible resumption
    /// and makes sure the reaper is running.
    pub(crate) fn suspend(
        self: &Arc<Self>,
        client: &Arc<ClientMediator<D>>,
    ) {
        let mut table =
            self.suspended.lock().expect("suspended lock poisoned");
        table.entries.insert(
            client.mediator_id().to_string(),
            SuspendedEntry {
                client: Arc::clone(client),
                sweeps: 0,
            },
        );
        if !table.reaper_running {
            table.reaper_running = true;
            spawn_reaper(
                Arc::downgrade(self),
                self.settings.reaper_sweep_interval,
                self.settings.reaper_threshold,
            );
        }
    }

    /// Permanently forgets a session: unparks it and removes it from
    /// its pod.
    pub(crate) async fn forget(&self, client: &Arc<ClientMediator<D>>) {
        self.suspended
            .lock()
            .expect("suspended lock poisoned")
            .entries
            .remove(client.mediator_id());
        self.part(client).await;
    }

    // -- External identity updates ----------------------------------------

    /// Applies a username change to the user's pod and every member.
    pub async fn rename_user(&self, user_id: &str, username: &str) {
        if let Some(pod) = self.pod(user_id).await {
            pod.set_username(username);
            let inner = pod.inner.lock().await;
            for member in inner.members.values() {
                member.set_username(username);
            }
            tracing::info!(user_id, username, "user renamed");
        }
    }

    /// Destroys every session the user has, live or suspended. Used when
    /// the account itself goes away.
    pub async fn destroy_user(&self, user_id: &str) {
        let mut doomed: Vec<Arc<ClientMediator<D>>> = Vec::new();
        {
            let mut table =
                self.suspended.lock().expect("suspended lock poisoned");
            table.entries.retain(|_, entry| {
                if entry.client.user_id() == user_id {
                    doomed.push(Arc::clone(&entry.client));
                    false
                } else {
                    true
                }
            });
        }
        if let Some(pod) = self.pod(user_id).await {
            let inner = pod.inner.lock().await;
            doomed.extend(inner.members.values().cloned());
        }
        for client in doomed {
            client.destroy().await;
        }
        tracing::info!(user_id, "all sessions destroyed");
    }

    // -- Introspection -----------------------------------------------------

    /// Number of live pods.
    pub async fn pod_count(&self) -> usize {
        self.pods.lock().await.len()
    }

    /// Number of parked sessions awaiting resumption or reaping.
    pub fn suspended_count(&self) -> usize {
        self.suspended
            .lock()
            .expect("suspended lock poisoned")
            .entries
            .len()
    }

    /// The room id the user's pod currently occupies.
    pub async fn current_room_id(&self, user_id: &str) -> Option<String> {
        let pod = self.pod(user_id).await?;
        let inner = pod.inner.lock().await;
        inner.room.as_ref().map(|r| r.id().to_string())
    }

    // -- Internals ---------------------------------------------------------

    async fn pod(&self, user_id: &str) -> Option<Arc<Pod<D>>> {
        self.pods.lock().await.get(user_id).cloned()
    }

    /// Gets or creates the user's pod. Creation wires the fanout's
    /// transition channel to a listener that drives pod moves.
    async fn pod_for(
        self: &Arc<Self>,
        user_id: &str,
        username: &str,
    ) -> Arc<Pod<D>> {
        let mut pods = self.pods.lock().await;
        if let Some(pod) = pods.get(user_id) {
            return Arc::clone(pod);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let pod = Arc::new(Pod {
            user_id: user_id.to_string(),
            username: StdMutex::new(username.to_string()),
            fanout: Arc::new(Fanout::new(tx)),
            inner: Mutex::new(PodState {
                members: HashMap::new(),
                room: None,
                retired: false,
            }),
        });
        pods.insert(user_id.to_string(), Arc::clone(&pod));
        spawn_transition_loop(
            Arc::downgrade(self),
            user_id.to_string(),
            rx,
        );
        tracing::info!(user_id, "pod created");
        pod
    }

    /// Narrates to every device in the pod.
    fn notice(&self, pod: &Pod<D>, text: &str) {
        let msg = RoutedMessage::new(
            FlowTarget::Player,
            pod.user_id.as_str(),
            json!({
                "type": "event",
                "content": { (pod.user_id.as_str()): text },
            }),
        )
        .expect("event body is a valid object");
        pod.fanout.deliver(&msg);
    }

    /// Acks a room change to every member device. Each device gets its
    /// own ack so the mediator id is always present for resumes.
    fn ack_members(&self, state: &PodState<D>, room: &RoomMediator<D>) {
        for member in state.members.values() {
            member.queue().push(self.device_ack(member, room, 0));
        }
    }

    /// Per-device ack, the only message that carries the mediator id.
    fn device_ack(
        &self,
        client: &ClientMediator<D>,
        room: &RoomMediator<D>,
        bookmark: i64,
    ) -> String {
        RoutedMessage::new(
            FlowTarget::Ack,
            client.user_id(),
            json!({
                "type": "ack",
                "mediatorId": client.mediator_id(),
                "roomId": room.id(),
                "roomName": room.name(),
                "bookmark": bookmark,
            }),
        )
        .expect("ack body is a valid object")
        .encode()
    }

    fn device_event(&self, client: &ClientMediator<D>, text: &str) -> String {
        RoutedMessage::new(
            FlowTarget::Player,
            client.user_id(),
            json!({
                "type": "event",
                "content": { (client.user_id()): text },
            }),
        )
        .expect("event body is a valid object")
        .encode()
    }
}

/// Consumes a pod's transition channel: location messages and SOS calls
/// from the room (or from the first room's /teleport) drive pod moves.
/// Ends when the pod's fanout is dropped or the nexus goes away.
fn spawn_transition_loop<D: SiteDirectory>(
    nexus: Weak<MediatorNexus<D>>,
    user_id: String,
    mut rx: mpsc::UnboundedReceiver<RoutedMessage>,
) {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let Some(nexus) = nexus.upgrade() else { break };
            if msg.is_sos() {
                if let Some(pod) = nexus.pod(&user_id).await {
                    nexus.notice(
                        &pod,
                        "Received your SOS! Hold tight, rescue is on the \
                         way.",
                    );
                }
                let _ = nexus.transition(&user_id, FIRST_ROOM_ID).await;
            } else {
                nexus.follow_hint(&user_id, &msg).await;
            }
        }
        tracing::debug!(user_id, "transition listener finished");
    });
}

/// Sweeps suspended sessions, destroying any that sat through
/// `threshold` sweeps. Self-terminating: exits when the table empties
/// and is respawned by the next suspension.
fn spawn_reaper<D: SiteDirectory>(
    nexus: Weak<MediatorNexus<D>>,
    interval: Duration,
    threshold: u32,
) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let Some(nexus) = nexus.upgrade() else { break };
            let (doomed, done) = {
                let mut table = nexus
                    .suspended
                    .lock()
                    .expect("suspended lock poisoned");
                let mut doomed = Vec::new();
                table.entries.retain(|_, entry| {
                    entry.sweeps += 1;
                    if entry.sweeps >= threshold {
                        doomed.push(Arc::clone(&entry.client));
                        false
                    } else {
                        true
                    }
                });
                let done = table.entries.is_empty();
                if done {
                    table.reaper_running = false;
                }
                (doomed, done)
            };
            for client in doomed {
                tracing::info!(
                    mediator_id = %client.mediator_id(),
                    "reaping abandoned session"
                );
                nexus.part(&client).await;
            }
            if done {
                break;
            }
        }
    });
}
