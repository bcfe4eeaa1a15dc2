//! Session event channel and its subscribers.
//!
//! The connector pushes [`SessionEvent`]s on an unbounded channel. A single
//! dispatcher task hands every event, in arrival order, to each registered
//! [`EventSubscriber`]. Subscribers do not know about each other.

use std::{collections::HashMap, sync::Arc};

use log::{debug, trace, warn};
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};

/// Room id to member user ids.
pub(crate) type MembersMap = Arc<RwLock<HashMap<String, Vec<String>>>>;

/// Sending half of the session event channel.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// State of the sync stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// The initial sync has been fully processed.
    Prepared,
    /// An incremental sync has been processed.
    Syncing,
    /// A sync request failed.
    Error,
    /// The sync stream ended.
    Stopped,
}

/// Event published by a connected client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The sync stream changed state.
    Sync(SyncState),
    /// Full member list of a room after a membership change.
    RoomMembers {
        /// Room the members belong to
        room_id: String,
        /// User ids of the members
        members: Vec<String>,
    },
}

/// Consumer of session events.
pub(crate) trait EventSubscriber: Send {
    fn on_event(&mut self, event: &SessionEvent);
}

/// Keeps the room membership cache up to date.
///
/// Each [`SessionEvent::RoomMembers`] replaces the cached list of its room.
pub(crate) struct MembershipTracker {
    members: MembersMap,
}

impl MembershipTracker {
    pub(crate) fn new(members: MembersMap) -> Self {
        MembershipTracker { members }
    }
}

impl EventSubscriber for MembershipTracker {
    fn on_event(&mut self, event: &SessionEvent) {
        let SessionEvent::RoomMembers { room_id, members } = event else {
            return;
        };

        trace!("room {} has {} members", room_id, members.len());
        self.members
            .write()
            .insert(room_id.clone(), members.clone());
    }
}

/// Resolves once, when the initial sync is done.
///
/// The first [`SyncState::Prepared`] sends `Ok(())`. A [`SyncState::Stopped`]
/// seen before it sends `Err(())`. Anything after that is ignored.
pub(crate) struct ReadinessSignal {
    ready: Option<oneshot::Sender<Result<(), ()>>>,
}

impl ReadinessSignal {
    pub(crate) fn new(ready: oneshot::Sender<Result<(), ()>>) -> Self {
        ReadinessSignal { ready: Some(ready) }
    }
}

impl EventSubscriber for ReadinessSignal {
    fn on_event(&mut self, event: &SessionEvent) {
        let SessionEvent::Sync(state) = event else {
            return;
        };
        debug!("sync state {:?}", state);

        let outcome = match state {
            SyncState::Prepared => Ok(()),
            SyncState::Stopped => Err(()),
            SyncState::Syncing | SyncState::Error => return,
        };

        if let Some(ready) = self.ready.take()
            && ready.send(outcome).is_err()
        {
            warn!("nobody is waiting for the session to be ready");
        }
    }
}

/// Hands every received event to all subscribers until the channel closes.
pub(crate) async fn dispatch(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut subscribers: Vec<Box<dyn EventSubscriber>>,
) {
    while let Some(event) = events.recv().await {
        for subscriber in subscribers.iter_mut() {
            subscriber.on_event(&event);
        }
    }

    debug!("session event channel closed");
}
