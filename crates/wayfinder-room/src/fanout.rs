//! Per-pod fan-out from the room to the user's devices.
//!
//! Every message a room produces goes through its pod's `Fanout`.
//! Ordinary flows are copied to each subscribed device queue; the two
//! transition-driving flows (`playerLocation`, `sos`) instead go exactly
//! once to the pod's transition channel, so a room-driven move fires one
//! transition per pod no matter how many devices the user has connected.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use wayfinder_protocol::{FlowTarget, RoutedMessage};
use wayfinder_transport::MessageQueue;

struct Subscriber {
    mediator_id: String,
    user_id: String,
    /// Messages with a bookmark below this floor are skipped — the
    /// device already saw them before it reconnected.
    from_bookmark: i64,
    queue: Arc<MessageQueue>,
}

/// The delivery hub between one pod's room and its devices.
pub struct Fanout {
    subscribers: Mutex<Vec<Subscriber>>,
    transitions: mpsc::UnboundedSender<RoutedMessage>,
}

impl Fanout {
    /// Creates a fanout whose transition-driving messages go to `transitions`.
    pub fn new(transitions: mpsc::UnboundedSender<RoutedMessage>) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            transitions,
        }
    }

    /// Subscribes a device queue from `from_bookmark` onward. A second
    /// subscription for the same mediator replaces the first (reconnect
    /// with a new bookmark).
    pub fn subscribe(
        &self,
        mediator_id: &str,
        user_id: &str,
        from_bookmark: i64,
        queue: Arc<MessageQueue>,
    ) {
        let mut subs =
            self.subscribers.lock().expect("fanout lock poisoned");
        subs.retain(|s| s.mediator_id != mediator_id);
        subs.push(Subscriber {
            mediator_id: mediator_id.to_string(),
            user_id: user_id.to_string(),
            from_bookmark,
            queue,
        });
    }

    /// Removes a device's subscription. Idempotent.
    pub fn unsubscribe(&self, mediator_id: &str) {
        self.subscribers
            .lock()
            .expect("fanout lock poisoned")
            .retain(|s| s.mediator_id != mediator_id);
    }

    /// Delivers one room-originated message.
    pub fn deliver(&self, msg: &RoutedMessage) {
        match msg.flow_target() {
            FlowTarget::PlayerLocation | FlowTarget::Sos => {
                // Exactly once per pod; the transition listener decides
                // where everyone goes.
                if self.transitions.send(msg.clone()).is_err() {
                    tracing::debug!(
                        "transition channel closed, dropping location message"
                    );
                }
            }
            _ => {
                let wire = msg.encode();
                let subs =
                    self.subscribers.lock().expect("fanout lock poisoned");
                for sub in subs.iter() {
                    if !msg.is_for_user(&sub.user_id) {
                        continue;
                    }
                    if let Some(bookmark) = msg.bookmark() {
                        if bookmark < sub.from_bookmark {
                            continue;
                        }
                    }
                    sub.queue.push(wire.clone());
                }
            }
        }
    }

    /// Number of subscribed devices.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .expect("fanout lock poisoned")
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wayfinder_protocol::FlowTarget;

    fn player_msg(dest: &str, bookmark: Option<i64>) -> RoutedMessage {
        let body = match bookmark {
            Some(b) => json!({"type": "chat", "bookmark": b}),
            None => json!({"type": "chat"}),
        };
        RoutedMessage::new(FlowTarget::Player, dest, body).unwrap()
    }

    fn fanout_with_sink() -> (Fanout, mpsc::UnboundedReceiver<RoutedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Fanout::new(tx), rx)
    }

    #[tokio::test]
    async fn test_deliver_copies_to_each_matching_subscriber() {
        let (fanout, _rx) = fanout_with_sink();
        let q1 = Arc::new(MessageQueue::new("d1", 8));
        let q2 = Arc::new(MessageQueue::new("d2", 8));
        fanout.subscribe("m1", "u1", 0, Arc::clone(&q1));
        fanout.subscribe("m2", "u1", 0, Arc::clone(&q2));

        fanout.deliver(&player_msg("*", None));

        assert_eq!(q1.len(), 1);
        assert_eq!(q2.len(), 1);
    }

    #[tokio::test]
    async fn test_deliver_skips_other_users() {
        let (fanout, _rx) = fanout_with_sink();
        let q = Arc::new(MessageQueue::new("d1", 8));
        fanout.subscribe("m1", "u1", 0, Arc::clone(&q));

        fanout.deliver(&player_msg("someone-else", None));

        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_deliver_honors_bookmark_floor() {
        let (fanout, _rx) = fanout_with_sink();
        let q = Arc::new(MessageQueue::new("d1", 8));
        fanout.subscribe("m1", "u1", 10, Arc::clone(&q));

        fanout.deliver(&player_msg("u1", Some(5))); // already seen
        fanout.deliver(&player_msg("u1", Some(10))); // at the floor
        fanout.deliver(&player_msg("u1", None)); // unbookmarked

        assert_eq!(q.len(), 2);
    }

    #[tokio::test]
    async fn test_location_goes_once_to_transition_channel() {
        let (fanout, mut rx) = fanout_with_sink();
        let q1 = Arc::new(MessageQueue::new("d1", 8));
        let q2 = Arc::new(MessageQueue::new("d2", 8));
        fanout.subscribe("m1", "u1", 0, Arc::clone(&q1));
        fanout.subscribe("m2", "u1", 0, Arc::clone(&q2));

        let location = RoutedMessage::new(
            FlowTarget::PlayerLocation,
            "u1",
            json!({"exitId": "N"}),
        )
        .unwrap();
        fanout.deliver(&location);

        // One copy on the transition channel, none on device queues.
        assert_eq!(rx.recv().await.unwrap(), location);
        assert!(rx.try_recv().is_err());
        assert!(q1.is_empty());
        assert!(q2.is_empty());
    }

    #[tokio::test]
    async fn test_resubscribe_replaces_previous_floor() {
        let (fanout, _rx) = fanout_with_sink();
        let q = Arc::new(MessageQueue::new("d1", 8));
        fanout.subscribe("m1", "u1", 10, Arc::clone(&q));
        fanout.subscribe("m1", "u1", 0, Arc::clone(&q));

        assert_eq!(fanout.subscriber_count(), 1);
        fanout.deliver(&player_msg("u1", Some(5)));
        assert_eq!(q.len(), 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (fanout, _rx) = fanout_with_sink();
        let q = Arc::new(MessageQueue::new("d1", 8));
        fanout.subscribe("m1", "u1", 0, q);

        fanout.unsubscribe("m1");
        fanout.unsubscribe("m1");

        assert_eq!(fanout.subscriber_count(), 0);
    }
}
