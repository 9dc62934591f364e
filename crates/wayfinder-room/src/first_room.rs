//! The built-in first room.
//!
//! No backend, no network: everything a user sees here is synthesized in
//! process and fanned out like any other room traffic. This is both the
//! tutorial room for new users and the safe harbor every fallback path
//! lands in.

use serde_json::{json, Map, Value};
use wayfinder_protocol::{FlowTarget, RoutedMessage, WILDCARD};

use crate::{RoomMediator, SiteDirectory};

const DESCRIPTION: &str = "A cozy room with a crackling fireplace, \
    a worn rug, and doors leading off in every direction. A sign on the \
    lectern reads: ask for /help and someone will oblige.";

const TELEPORT_NO_MATCH: &str = "You don't appear to have a room with \
    that id to teleport to.. maybe you should check `/listmyrooms`";

/// The full location payload, sent on entry and on `/look`.
pub(crate) async fn intro<D: SiteDirectory>(
    room: &RoomMediator<D>,
    user_id: &str,
) {
    let exits = room
        .exits()
        .await
        .unwrap_or_default()
        .into_iter()
        .map(|(dir, exit)| (dir.letter().to_string(), Value::from(exit.door)))
        .collect::<Map<String, Value>>();

    let msg = RoutedMessage::new(
        FlowTarget::Player,
        user_id,
        json!({
            "type": "location",
            "name": room.id(),
            "fullName": room.name(),
            "description": DESCRIPTION,
            "exits": exits,
            "commands": {
                "/look": "Look around the room",
                "/exits": "List the exits",
                "/listmyrooms": "List the rooms you own",
                "/teleport": "Teleport to a room you own: /teleport <room id>",
                "/sos": "Emergency recall to the first room",
            },
            "bookmark": room.next_bookmark(),
        }),
    )
    .expect("location body is a valid object");
    room.fanout.deliver(&msg);
}

/// Handles one device-originated message addressed to the first room.
pub(crate) async fn handle<D: SiteDirectory>(
    room: &RoomMediator<D>,
    msg: &RoutedMessage,
) {
    let Some(content) = msg.content().and_then(Value::as_str) else {
        return;
    };
    let user_id = msg
        .user_id()
        .map(str::to_string)
        .unwrap_or_else(|| WILDCARD.to_string());

    let content = content.trim();
    if let Some(command) = content.strip_prefix('/') {
        let mut parts = command.splitn(2, ' ');
        let verb = parts.next().unwrap_or_default();
        let argument = parts.next().unwrap_or_default().trim();
        match verb {
            "look" | "examine" => intro(room, &user_id).await,
            "exits" => exits_event(room, &user_id).await,
            "listmyrooms" => list_my_rooms(room, &user_id).await,
            "teleport" => teleport(room, &user_id, argument).await,
            _ => room.synth_event(
                &user_id,
                "Hmm. That doesn't seem to do anything here. Try /look.",
            ),
        }
    } else {
        chat(room, msg, content);
    }
}

async fn exits_event<D: SiteDirectory>(
    room: &RoomMediator<D>,
    user_id: &str,
) {
    let exits = room.exits().await.unwrap_or_default();
    if exits.is_empty() {
        room.synth_event(user_id, "Oddly, there are no exits at all.");
        return;
    }
    let mut lines: Vec<String> = exits
        .into_iter()
        .map(|(dir, exit)| format!("{}: {}", dir.word(), exit.door))
        .collect();
    lines.sort();
    room.synth_event(user_id, &lines.join("\n"));
}

async fn list_my_rooms<D: SiteDirectory>(
    room: &RoomMediator<D>,
    user_id: &str,
) {
    match room.directory.sites_for_owner(user_id).await {
        Ok(sites) if sites.is_empty() => {
            room.synth_event(
                user_id,
                "You don't have any rooms of your own yet.",
            );
        }
        Ok(sites) => {
            let mut lines: Vec<String> = sites
                .iter()
                .map(|s| format!("{} : {}", s.id, s.full_name))
                .collect();
            lines.sort();
            room.synth_event(user_id, &lines.join("\n"));
        }
        Err(e) => {
            tracing::warn!(error = %e, "room listing failed");
            room.synth_event(
                user_id,
                "The room directory is not answering right now.",
            );
        }
    }
}

async fn teleport<D: SiteDirectory>(
    room: &RoomMediator<D>,
    user_id: &str,
    target: &str,
) {
    if target.is_empty() {
        room.synth_event(user_id, "Teleport where? Try /teleport <room id>.");
        return;
    }
    let sites = match room.directory.sites_for_owner(user_id).await {
        Ok(sites) => sites,
        Err(e) => {
            tracing::warn!(error = %e, "teleport lookup failed");
            room.synth_event(
                user_id,
                "The room directory is not answering right now.",
            );
            return;
        }
    };
    let Some(site) = sites
        .iter()
        .find(|s| s.id == target || s.name == target || s.full_name == target)
    else {
        room.synth_event(user_id, TELEPORT_NO_MATCH);
        return;
    };

    // Rides the same path as a room-driven move: through the fanout to
    // the pod's transition channel, exactly once per pod.
    let msg = RoutedMessage::new(
        FlowTarget::PlayerLocation,
        user_id,
        json!({
            "type": "exit",
            "content": "You feel a strange tug, and the world rearranges \
                        itself around you.",
            "exitId": site.id,
            "teleport": true,
        }),
    )
    .expect("teleport body is a valid object");
    room.fanout.deliver(&msg);
}

fn chat<D: SiteDirectory>(
    room: &RoomMediator<D>,
    msg: &RoutedMessage,
    content: &str,
) {
    let username = msg.username().unwrap_or("ghost");
    let echo = RoutedMessage::new(
        FlowTarget::Player,
        WILDCARD,
        json!({
            "type": "chat",
            "username": username,
            "content": content,
            "bookmark": room.next_bookmark(),
        }),
    )
    .expect("chat body is a valid object");
    room.fanout.deliver(&echo);
}
