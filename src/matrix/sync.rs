//! Matrix client synchronization and event publishing.
//!
//! This module drives the sync loop of a puppet client and turns what it sees
//! into [`SessionEvent`]s:
//! - every membership change publishes the full active member list of its room
//! - the sync loop publishes its state transitions
//!
//! # Overview
//!
//! [`MatrixSync::start`]:
//! 1. Registers the membership handler, so the initial sync is observed too
//! 2. Performs an initial sync and publishes [`SyncState::Prepared`]
//! 3. Spawns the continuous sync loop, publishing [`SyncState::Syncing`] after
//!    each response and [`SyncState::Stopped`] when it ends

use log::{debug, error, info, warn};
use matrix_sdk::{
    Client, LoopCtrl, Room, RoomMemberships, config::SyncSettings,
    ruma::events::room::member::SyncRoomMemberEvent,
};
use tokio::task::JoinHandle;

use crate::puppet::{EventSender, SessionEvent, SyncState};

/// Publishes the events of a Matrix client on a session event channel.
pub struct MatrixSync {
    /// The matrix client
    client: Client,
    /// Session event channel
    events: EventSender,
}

impl MatrixSync {
    /// Creates a new MatrixSync instance.
    ///
    /// This does not start the synchronization, call [`MatrixSync::start`].
    ///
    /// # Arguments
    ///
    /// * `client` - Authenticated Matrix client
    /// * `events` - Channel receiving the session events
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let (events, receiver) = tokio::sync::mpsc::unbounded_channel();
    /// let sync_task = MatrixSync::new(&client, events).start();
    /// ```
    pub fn new(client: &Client, events: EventSender) -> Self {
        MatrixSync {
            client: client.to_owned(),
            events,
        }
    }

    /// Registers the event handlers and spawns the sync loop.
    ///
    /// Returns the handle of the spawned task. The task runs until the sync
    /// loop fails or the handle is aborted.
    pub fn start(self) -> JoinHandle<()> {
        info!("start syncing");

        self.client.add_event_handler({
            let events = self.events.clone();
            move |_event: SyncRoomMemberEvent, room: Room| {
                let events = events.clone();
                async move { publish_room_members(room, &events).await }
            }
        });

        tokio::spawn(async move { self.run().await })
    }

    /// Runs the initial sync then the sync loop.
    async fn run(self) {
        let sync_settings = SyncSettings::default();

        let response = match self.client.sync_once(sync_settings.clone()).await {
            Ok(response) => response,
            Err(e) => {
                error!("initial sync failed: {}", e);
                self.publish(SyncState::Error);
                self.publish(SyncState::Stopped);
                return;
            }
        };
        self.publish(SyncState::Prepared);

        // Since we called `sync_once` before we entered our sync loop we must pass
        // that sync token to `sync_with_result_callback`
        let sync_settings = sync_settings.token(response.next_batch);

        let result = self
            .client
            .sync_with_result_callback(sync_settings, |sync_result| {
                let events = self.events.clone();
                async move {
                    match sync_result {
                        Ok(_) => {
                            let _ = events.send(SessionEvent::Sync(SyncState::Syncing));
                            Ok(LoopCtrl::Continue)
                        }
                        Err(e) => {
                            let _ = events.send(SessionEvent::Sync(SyncState::Error));
                            Err(e)
                        }
                    }
                }
            })
            .await;

        match result {
            Ok(_) => info!("matrix sync ended successfully"),
            Err(e) => error!("matrix sync ended with error: {:?}", e),
        }
        self.publish(SyncState::Stopped);
    }

    fn publish(&self, state: SyncState) {
        if self.events.send(SessionEvent::Sync(state)).is_err() {
            debug!("session event channel closed, dropping {:?}", state);
        }
    }
}

/// Publishes the joined and invited members of a room.
///
/// Member lists are read from the local store, without requesting the server.
async fn publish_room_members(room: Room, events: &EventSender) {
    let members = match room.members_no_sync(RoomMemberships::ACTIVE).await {
        Ok(members) => members,
        Err(e) => {
            warn!("failed to read members of room {}: {:?}", room.room_id(), e);
            return;
        }
    };

    let event = SessionEvent::RoomMembers {
        room_id: room.room_id().to_string(),
        members: members
            .iter()
            .map(|member| member.user_id().to_string())
            .collect(),
    };

    if events.send(event).is_err() {
        debug!("session event channel closed");
    }
}
