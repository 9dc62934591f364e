//! Integration tests for the mediator nexus: pod membership, the
//! exactly-once hello/goodbye pair, transitions, fallbacks, suspension,
//! and the reaper.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use wayfinder_protocol::{FlowTarget, RoutedMessage};
use wayfinder_room::{
    RoomError, RoomSettings, SiteDirectory, SiteExit, SiteInfo,
    FIRST_ROOM_ID,
};
use wayfinder_session::{ClientMediator, MediatorNexus, NexusSettings};
use wayfinder_transport::{Connection, MessageQueue, WebSocketTransport};

struct InMemoryDirectory {
    sites: HashMap<String, SiteInfo>,
}

impl InMemoryDirectory {
    fn new(sites: Vec<SiteInfo>) -> Arc<Self> {
        Arc::new(Self {
            sites: sites.into_iter().map(|s| (s.id.clone(), s)).collect(),
        })
    }
}

impl SiteDirectory for InMemoryDirectory {
    fn site(
        &self,
        room_id: &str,
    ) -> impl Future<Output = Result<Option<SiteInfo>, RoomError>> + Send {
        let site = self.sites.get(room_id).cloned();
        async move { Ok(site) }
    }

    fn sites_for_owner(
        &self,
        owner: &str,
    ) -> impl Future<Output = Result<Vec<SiteInfo>, RoomError>> + Send {
        let sites: Vec<SiteInfo> = self
            .sites
            .values()
            .filter(|s| s.owner.as_deref() == Some(owner))
            .cloned()
            .collect();
        async move { Ok(sites) }
    }
}

fn site(id: &str, endpoints: Vec<String>) -> SiteInfo {
    SiteInfo {
        id: id.to_string(),
        name: id.to_string(),
        full_name: format!("The {id}"),
        description: "A perfectly ordinary room.".to_string(),
        owner: None,
        exits: HashMap::new(),
        endpoints,
    }
}

fn room_settings() -> RoomSettings {
    RoomSettings {
        connect_timeout: Duration::from_secs(2),
        sick_retry_interval: Duration::from_secs(3600),
        ..RoomSettings::default()
    }
}

/// A WebSocket room backend that records every frame it receives, across
/// any number of connections.
async fn room_backend() -> (String, mpsc::UnboundedReceiver<String>) {
    let mut transport =
        WebSocketTransport::bind("127.0.0.1:0").await.unwrap();
    let addr = transport.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok(conn) = transport.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let conn = Arc::new(conn);
                while let Ok(Some(frame)) = conn.recv().await {
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
            });
        }
    });
    (format!("ws://{addr}"), rx)
}

async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> RoutedMessage {
    let wire = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a backend frame")
        .expect("backend channel closed");
    RoutedMessage::decode(&wire).expect("backend frame decodes")
}

async fn next_device_msg(queue: &MessageQueue) -> RoutedMessage {
    let wire = tokio::time::timeout(Duration::from_secs(5), queue.pop())
        .await
        .expect("timed out waiting for a device message");
    RoutedMessage::decode(&wire).expect("device message decodes")
}

/// Pops device messages until one of the given body type arrives.
async fn device_msg_of_type(
    queue: &MessageQueue,
    msg_type: &str,
) -> RoutedMessage {
    loop {
        let msg = next_device_msg(queue).await;
        if msg.msg_type() == Some(msg_type) {
            return msg;
        }
    }
}

fn chat(room_id: &str, content: &str) -> RoutedMessage {
    RoutedMessage::new(
        FlowTarget::Room,
        room_id,
        json!({"username": "ada", "userId": "u1", "content": content}),
    )
    .unwrap()
}

#[tokio::test]
async fn test_concurrent_ready_sends_exactly_one_hello() {
    let (url, mut backend) = room_backend().await;
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site("attic", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    let c2 = nexus.create_session("u1", "ada");

    let (r1, r2) = tokio::join!(c1.ready("attic", 0), c2.ready("attic", 0));
    r1.unwrap();
    r2.unwrap();

    assert_eq!(nexus.pod_count().await, 1);
    assert_eq!(
        nexus.current_room_id("u1").await.as_deref(),
        Some("attic")
    );

    let hello = next_frame(&mut backend).await;
    assert_eq!(hello.flow_target(), FlowTarget::RoomHello);

    // The very next frame is this command, not a second hello.
    c1.send_to_room(&chat("attic", "anyone here?")).await.unwrap();
    let relayed = next_frame(&mut backend).await;
    assert_eq!(relayed.flow_target(), FlowTarget::Room);
}

#[tokio::test]
async fn test_each_device_gets_an_ack_with_its_own_mediator_id() {
    let (url, _backend) = room_backend().await;
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site("attic", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    let c2 = nexus.create_session("u1", "ada");
    c1.ready("attic", 0).await.unwrap();
    c2.ready("attic", 0).await.unwrap();

    let ack1 = device_msg_of_type(&c1.queue(), "ack").await;
    let ack2 = device_msg_of_type(&c2.queue(), "ack").await;

    assert_eq!(
        ack1.body()["mediatorId"].as_str(),
        Some(c1.mediator_id())
    );
    assert_eq!(
        ack2.body()["mediatorId"].as_str(),
        Some(c2.mediator_id())
    );
    assert_eq!(ack1.body()["roomId"], "attic");
}

#[tokio::test]
async fn test_resume_bookmark_reaches_the_room_hello() {
    let (url, mut backend) = room_backend().await;
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site("attic", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");

    c1.ready("attic", 42).await.unwrap();

    let hello = next_frame(&mut backend).await;
    assert_eq!(hello.flow_target(), FlowTarget::RoomHello);
    assert_eq!(hello.bookmark(), Some(42));
}

#[tokio::test]
async fn test_transition_acks_every_device_with_its_mediator_id() {
    let (url, mut backend) = room_backend().await;
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site("attic", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    let c2 = nexus.create_session("u1", "ada");
    c1.ready("", 0).await.unwrap();
    c2.ready("", 0).await.unwrap();
    let _join_ack1 = device_msg_of_type(&c1.queue(), "ack").await;
    let _join_ack2 = device_msg_of_type(&c2.queue(), "ack").await;

    nexus.transition("u1", "attic").await.unwrap();
    let hello = next_frame(&mut backend).await;
    assert_eq!(hello.flow_target(), FlowTarget::RoomHello);

    // Both devices hear about the move, each under its own mediator id.
    let ack1 = device_msg_of_type(&c1.queue(), "ack").await;
    let ack2 = device_msg_of_type(&c2.queue(), "ack").await;
    assert_eq!(
        ack1.body()["mediatorId"].as_str(),
        Some(c1.mediator_id())
    );
    assert_eq!(
        ack2.body()["mediatorId"].as_str(),
        Some(c2.mediator_id())
    );
    assert_eq!(ack1.body()["roomId"], "attic");
    assert_eq!(ack2.body()["roomId"], "attic");
}

#[tokio::test]
async fn test_join_racing_the_last_part_lands_in_a_pod() {
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("", 0).await.unwrap();

    // The last device leaves while a new one joins. Whichever order the
    // race resolves in, the new device must end up in a live pod.
    let c2 = nexus.create_session("u1", "ada");
    let (_, joined) = tokio::join!(c1.destroy(), c2.ready("", 0));
    joined.unwrap();

    assert_eq!(nexus.pod_count().await, 1);
    let ack = device_msg_of_type(&c2.queue(), "ack").await;
    assert_eq!(
        ack.body()["mediatorId"].as_str(),
        Some(c2.mediator_id())
    );
    assert_eq!(
        nexus.current_room_id("u1").await.as_deref(),
        Some(FIRST_ROOM_ID)
    );
}

#[tokio::test]
async fn test_goodbye_fires_only_when_the_last_device_leaves() {
    let (url, mut backend) = room_backend().await;
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site("attic", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    let c2 = nexus.create_session("u1", "ada");
    c1.ready("attic", 0).await.unwrap();
    c2.ready("attic", 0).await.unwrap();
    let _hello = next_frame(&mut backend).await;

    c1.destroy().await;
    assert_eq!(nexus.pod_count().await, 1, "pod survives first part");

    c2.destroy().await;
    let goodbye = next_frame(&mut backend).await;
    assert_eq!(goodbye.flow_target(), FlowTarget::RoomGoodbye);
    assert_eq!(nexus.pod_count().await, 0);

    // Parting again is harmless.
    c2.destroy().await;
    assert_eq!(nexus.pod_count().await, 0);
}

#[tokio::test]
async fn test_sos_returns_the_pod_to_the_first_room() {
    let (url, mut backend) = room_backend().await;
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site("attic", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("attic", 0).await.unwrap();
    let _hello = next_frame(&mut backend).await;

    let sos =
        RoutedMessage::new(FlowTarget::Sos, "*", json!({"userId": "u1"}))
            .unwrap();
    c1.send_to_room(&sos).await.unwrap();

    assert_eq!(
        nexus.current_room_id("u1").await.as_deref(),
        Some(FIRST_ROOM_ID)
    );
    let goodbye = next_frame(&mut backend).await;
    assert_eq!(goodbye.flow_target(), FlowTarget::RoomGoodbye);
}

#[tokio::test]
async fn test_teleport_hint_wins_over_exit_resolution() {
    let (url, _backend) = room_backend().await;
    let mut attic = site("attic", vec![url.clone()]);
    attic.exits.insert(
        wayfinder_protocol::ExitDirection::North,
        SiteExit {
            door: "A trapdoor".to_string(),
            target_id: Some("roof".to_string()),
        },
    );
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![
            attic,
            site("roof", vec![url.clone()]),
            site("cellar", vec![url]),
        ]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("attic", 0).await.unwrap();

    // Both an exit id and the teleport flag: the flag wins and the exit
    // table is never consulted.
    let hint = RoutedMessage::new(
        FlowTarget::PlayerLocation,
        "u1",
        json!({"type": "exit", "exitId": "cellar", "teleport": true}),
    )
    .unwrap();
    c1.send_to_room(&hint).await.unwrap();

    assert_eq!(
        nexus.current_room_id("u1").await.as_deref(),
        Some("cellar")
    );
}

#[tokio::test]
async fn test_exit_hint_walks_the_exit_table() {
    let (url, _backend) = room_backend().await;
    let mut attic = site("attic", vec![url.clone()]);
    attic.exits.insert(
        wayfinder_protocol::ExitDirection::North,
        SiteExit {
            door: "A trapdoor".to_string(),
            target_id: Some("roof".to_string()),
        },
    );
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![attic, site("roof", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("attic", 0).await.unwrap();

    let hint = RoutedMessage::new(
        FlowTarget::PlayerLocation,
        "u1",
        json!({"type": "exit", "exitId": "N"}),
    )
    .unwrap();
    c1.send_to_room(&hint).await.unwrap();

    assert_eq!(
        nexus.current_room_id("u1").await.as_deref(),
        Some("roof")
    );
}

#[tokio::test]
async fn test_transition_to_the_current_room_is_a_noop() {
    let (url, mut backend) = room_backend().await;
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site("attic", vec![url])]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("attic", 0).await.unwrap();
    let _hello = next_frame(&mut backend).await;

    nexus.transition("u1", "attic").await.unwrap();

    // No goodbye, no second hello: the next frame is this command.
    c1.send_to_room(&chat("attic", "still here")).await.unwrap();
    let relayed = next_frame(&mut backend).await;
    assert_eq!(relayed.flow_target(), FlowTarget::Room);
}

#[tokio::test]
async fn test_unreachable_resume_room_falls_back_to_the_first_room() {
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![site(
            "attic",
            vec!["ws://127.0.0.1:9".to_string()],
        )]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");

    c1.ready("attic", 0).await.unwrap();

    assert_eq!(
        nexus.current_room_id("u1").await.as_deref(),
        Some(FIRST_ROOM_ID)
    );
    // The device heard about the detour before the ack corrected it.
    let mut saw_bad_ride = false;
    loop {
        let msg = next_device_msg(&c1.queue()).await;
        if msg.msg_type() == Some("ack") {
            assert_eq!(msg.body()["roomId"], FIRST_ROOM_ID);
            break;
        }
        if let Some(text) = msg.content().and_then(|c| c["u1"].as_str()) {
            if text.contains("bad ride") {
                saw_bad_ride = true;
            }
        }
    }
    assert!(saw_bad_ride, "fallback narration precedes the ack");
}

#[tokio::test]
async fn test_late_device_is_told_it_splinched_before_the_ack() {
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("", 0).await.unwrap(); // pod lands in the first room

    let c2 = nexus.create_session("u1", "ada");
    c2.ready("attic", 0).await.unwrap(); // expected somewhere else

    let first = next_device_msg(&c2.queue()).await;
    assert_eq!(first.msg_type(), Some("event"));
    assert!(first.content().unwrap()["u1"]
        .as_str()
        .unwrap()
        .contains("already in"));

    let second = next_device_msg(&c2.queue()).await;
    assert_eq!(second.msg_type(), Some("ack"));
    assert_eq!(second.body()["roomId"], FIRST_ROOM_ID);
}

#[tokio::test]
async fn test_resume_requires_a_matching_user() {
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("", 0).await.unwrap();
    c1.suspend().await;
    assert_eq!(nexus.suspended_count(), 1);

    assert!(nexus.resume_session(c1.mediator_id(), "someone-else").is_none());
    assert_eq!(nexus.suspended_count(), 1, "refused resume keeps the entry");

    let resumed = nexus.resume_session(c1.mediator_id(), "u1").unwrap();
    assert_eq!(resumed.mediator_id(), c1.mediator_id());
    assert_eq!(nexus.suspended_count(), 0);
}

#[tokio::test]
async fn test_reaper_destroys_sessions_nobody_resumed() {
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![]),
        room_settings(),
        NexusSettings {
            reaper_sweep_interval: Duration::from_millis(50),
            reaper_threshold: 2,
            ..NexusSettings::default()
        },
    );
    let c1 = nexus.create_session("u1", "ada");
    c1.ready("", 0).await.unwrap();
    assert_eq!(nexus.pod_count().await, 1);

    c1.suspend().await;
    assert_eq!(nexus.suspended_count(), 1);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(nexus.suspended_count(), 0, "reaper swept the session");
    assert_eq!(nexus.pod_count().await, 0, "pod retired with it");
}

#[tokio::test]
async fn test_destroy_user_removes_live_and_suspended_sessions() {
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    let c2 = nexus.create_session("u1", "ada");
    c1.ready("", 0).await.unwrap();
    c2.ready("", 0).await.unwrap();
    c2.suspend().await;
    assert!(!c1.queue().is_empty(), "the join ack is still queued");

    nexus.destroy_user("u1").await;

    assert_eq!(nexus.pod_count().await, 0);
    assert_eq!(nexus.suspended_count(), 0);
    // Full teardown, not just pod removal: nothing left queued.
    assert!(c1.queue().is_empty());
    assert!(c2.queue().is_empty());
}

#[tokio::test]
async fn test_rename_user_reaches_every_member() {
    let nexus = MediatorNexus::new(
        InMemoryDirectory::new(vec![]),
        room_settings(),
        NexusSettings::default(),
    );
    let c1 = nexus.create_session("u1", "ada");
    let c2 = nexus.create_session("u1", "ada");
    c1.ready("", 0).await.unwrap();
    c2.ready("", 0).await.unwrap();

    nexus.rename_user("u1", "countess").await;

    assert_eq!(c1.username(), "countess");
    assert_eq!(c2.username(), "countess");
}

// Keeps the generic parameter honest: mediators are shareable handles.
#[allow(dead_code)]
fn assert_send_sync<T: Send + Sync>() {}
#[allow(dead_code)]
fn mediator_handles_are_shareable() {
    assert_send_sync::<Arc<ClientMediator<InMemoryDirectory>>>();
}
