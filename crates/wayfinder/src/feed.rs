//! External event feed integration.
//!
//! User accounts live outside Wayfinder. When the system of record
//! changes one (a rename, a location rewrite, a deletion), the change
//! arrives on an event feed and must reach any live sessions. The
//! [`EventFeed`] trait abstracts the feed itself (Kafka consumer, HTTP
//! poller, test fixture); this module applies its records to the nexus.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use wayfinder_room::SiteDirectory;
use wayfinder_session::MediatorNexus;

/// What happened to the user record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOp {
    /// Profile fields changed (currently the username matters).
    Update,
    /// The user's recorded location was rewritten out-of-band.
    UpdateLocation,
    /// The account was deleted.
    Delete,
}

/// One record from the feed.
#[derive(Debug, Clone)]
pub struct FeedRecord {
    /// Position in the feed, for logging and resume bookkeeping.
    pub offset: u64,
    /// The user id the record is about.
    pub user_id: String,
    pub op: FeedOp,
    /// The record payload. `Update` reads `username`, `UpdateLocation`
    /// reads `roomId`.
    pub value: Value,
}

/// A source of user-record change events.
pub trait EventFeed: Send + 'static {
    /// The next record, or `None` when the feed ends.
    fn next(&mut self) -> impl Future<Output = Option<FeedRecord>> + Send;
}

/// Consumes the feed until it ends, applying each record.
pub(crate) async fn run_feed<D: SiteDirectory, F: EventFeed>(
    nexus: Arc<MediatorNexus<D>>,
    mut feed: F,
) {
    while let Some(record) = feed.next().await {
        apply(&nexus, record).await;
    }
    tracing::info!("event feed ended");
}

async fn apply<D: SiteDirectory>(
    nexus: &Arc<MediatorNexus<D>>,
    record: FeedRecord,
) {
    tracing::debug!(
        offset = record.offset,
        user_id = %record.user_id,
        op = ?record.op,
        "applying feed record"
    );
    match record.op {
        FeedOp::Update => {
            if let Some(username) =
                record.value.get("username").and_then(Value::as_str)
            {
                nexus.rename_user(&record.user_id, username).await;
            }
        }
        FeedOp::UpdateLocation => {
            if let Some(room_id) =
                record.value.get("roomId").and_then(Value::as_str)
            {
                if let Err(e) =
                    nexus.transition(&record.user_id, room_id).await
                {
                    tracing::debug!(
                        user_id = %record.user_id,
                        error = %e,
                        "location update for a user with no pod"
                    );
                }
            }
        }
        FeedOp::Delete => {
            nexus.destroy_user(&record.user_id).await;
        }
    }
}
