//! Outbound delivery: the per-connection message queue and its drain.
//!
//! Every mediator owns one [`MessageQueue`] per outbound direction. While
//! a connection is live, a [`Drain`] task pops the queue and writes to
//! the socket; when the connection drops, the drain stops but the queue
//! survives, so a suspended session keeps its pending output until it is
//! either resumed or destroyed.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::Connection;

/// A bounded FIFO of wire-encoded messages.
///
/// Overflow policy: when the queue is full, the **oldest** entry is
/// dropped to make room and a warning is logged. A device that stops
/// draining must never back-pressure the room listener, and for a text
/// client the newest output is worth more than the oldest.
pub struct MessageQueue {
    name: String,
    inner: Mutex<VecDeque<String>>,
    notify: Notify,
    capacity: usize,
}

impl MessageQueue {
    /// Creates an empty queue holding at most `capacity` messages.
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        }
    }

    /// Enqueues a message. Returns `false` if an older entry was dropped
    /// to make room.
    pub fn push(&self, text: String) -> bool {
        let dropped = {
            let mut queue = self.inner.lock().expect("queue lock poisoned");
            let dropped = if queue.len() >= self.capacity {
                queue.pop_front();
                true
            } else {
                false
            };
            queue.push_back(text);
            dropped
        };
        if dropped {
            tracing::warn!(
                queue = %self.name,
                capacity = self.capacity,
                "queue full, dropped oldest message"
            );
        }
        self.notify.notify_one();
        !dropped
    }

    /// Waits for and removes the oldest message.
    pub async fn pop(&self) -> String {
        loop {
            // Register interest before checking, so a push between the
            // check and the await still wakes us.
            let notified = self.notify.notified();
            if let Some(msg) =
                self.inner.lock().expect("queue lock poisoned").pop_front()
            {
                return msg;
            }
            notified.await;
        }
    }

    /// Discards all pending messages.
    pub fn clear(&self) {
        self.inner.lock().expect("queue lock poisoned").clear();
    }

    /// Number of pending messages.
    pub fn len(&self) -> usize {
        self.inner.lock().expect("queue lock poisoned").len()
    }

    /// Returns `true` if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The delivery loop: pops a [`MessageQueue`] onto a live connection.
///
/// Owned by whichever mediator created it. [`stop`](Self::stop) (or drop)
/// aborts the task without touching the queue; a message that fails to
/// send ends the drain, and the connection's owner decides what happens
/// next.
pub struct Drain {
    name: String,
    task: JoinHandle<()>,
}

impl Drain {
    /// Spawns the delivery task for `queue` onto `conn`.
    pub fn start<C: Connection>(
        name: impl Into<String>,
        queue: Arc<MessageQueue>,
        conn: Arc<C>,
    ) -> Self {
        let name = name.into();
        let task_name = name.clone();
        let task = tokio::spawn(async move {
            tracing::debug!(drain = %task_name, "drain started");
            loop {
                let msg = queue.pop().await;
                if let Err(e) = conn.send(&msg).await {
                    tracing::debug!(
                        drain = %task_name,
                        error = %e,
                        "send failed, drain stopping"
                    );
                    break;
                }
            }
        });
        Self { name, task }
    }

    /// Stops the delivery loop. Pending messages stay in the queue.
    pub fn stop(&self) {
        tracing::debug!(drain = %self.name, "drain stopped");
        self.task.abort();
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        self.task.abort();
    }
}
