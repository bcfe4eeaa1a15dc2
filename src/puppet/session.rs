//! Puppet lifecycle and room operations.
//!
//! [`Puppet::start`] connects to the homeserver and returns a [`PuppetSession`]
//! once the initial sync is done. All room operations live on the session, so
//! they can not be called before the puppet is started.

use std::sync::Arc;

use futures::future::try_join_all;
use log::{debug, error, info, warn};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    config::Config,
    error::{JoinErrorKind, PuppetError, classify_join_error},
    puppet::{
        Connector, Homeserver,
        events::{EventSubscriber, MembersMap, MembershipTracker, ReadinessSignal, dispatch},
    },
};

/// Unstarted puppet.
///
/// Holds the configuration and the [`Connector`] used to build clients.
pub struct Puppet<C: Connector> {
    /// Puppet and bridge configuration
    pub(crate) config: Config,
    /// Factory of homeserver clients
    pub(crate) connector: C,
}

impl<C: Connector> Puppet<C> {
    /// Creates a puppet from its configuration and a connector.
    ///
    /// Nothing is contacted until [`Puppet::start`] or
    /// [`Puppet::associate_account`] is called.
    ///
    /// # Arguments
    ///
    /// * `config` - Bridge configuration, with the `puppet` record if the
    ///   account is already associated
    /// * `connector` - Factory of authenticated homeserver clients
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let config = Config::load("config.json")?;
    /// let puppet = Puppet::new(config, MatrixConnector::new("./puppet-data"));
    /// ```
    pub fn new(config: Config, connector: C) -> Self {
        Puppet { config, connector }
    }

    /// Returns the current configuration.
    ///
    /// Reflects a successful [`Puppet::associate_account`] right away.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Connects as the puppet account and waits for the initial sync.
    ///
    /// Every call builds a fresh session with an empty membership cache. The
    /// returned future resolves on the first [`SyncState::Prepared`]; later
    /// sync state changes have no effect on it. Membership events received
    /// before and after that point are all recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - no puppet account is configured
    /// - the connector fails to build or authenticate the client
    /// - the sync stream stops before the initial sync completed
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let session = puppet.start().await?;
    /// println!("puppet {} is ready", session.user_id());
    /// ```
    ///
    /// [`SyncState::Prepared`]: crate::puppet::SyncState::Prepared
    pub async fn start(&self) -> Result<PuppetSession<C::Client>, PuppetError> {
        let credentials = self.config.puppet_credentials()?;
        info!("starting puppet {}", credentials.user_id);

        let members = MembersMap::default();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let subscribers: Vec<Box<dyn EventSubscriber>> = vec![
            Box::new(MembershipTracker::new(Arc::clone(&members))),
            Box::new(ReadinessSignal::new(ready_tx)),
        ];
        let dispatcher = tokio::spawn(dispatch(events_rx, subscribers));

        let client = match self.connector.connect(&credentials, events_tx).await {
            Ok(client) => client,
            Err(e) => {
                error!("failed to connect puppet {}: {}", credentials.user_id, e);
                dispatcher.abort();
                return Err(e);
            }
        };

        // A dropped sender means the channel closed before the initial sync
        if !matches!(ready_rx.await, Ok(Ok(()))) {
            error!("sync of puppet {} stopped before being ready", credentials.user_id);
            dispatcher.abort();
            return Err(PuppetError::SyncAborted);
        }

        info!("puppet {} is ready", credentials.user_id);

        Ok(PuppetSession {
            client,
            user_id: credentials.user_id,
            members,
            dispatcher,
        })
    }
}

/// Started puppet session.
///
/// Dropping the session stops the processing of its events.
pub struct PuppetSession<H: Homeserver> {
    /// Authenticated client
    client: H,
    /// User id of the puppet account
    user_id: String,
    /// Room id to member user ids, fed by the event dispatcher
    members: MembersMap,
    /// Task dispatching session events
    dispatcher: JoinHandle<()>,
}

impl<H: Homeserver> PuppetSession<H> {
    /// Returns the user id of the puppet account.
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Returns the underlying client, for anything not wrapped here.
    pub fn client(&self) -> &H {
        &self.client
    }

    /// Returns the members seen so far in a room.
    ///
    /// # Arguments
    ///
    /// * `room_id` - Room id, e.g. `!abc:example.org`
    ///
    /// # Returns
    ///
    /// The user ids of the joined and invited members from the last membership
    /// event of the room. An unknown room yields an empty list.
    pub fn room_members(&self, room_id: &str) -> Vec<String> {
        self.members
            .read()
            .get(room_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Resolves a room alias to a room id.
    ///
    /// # Arguments
    ///
    /// * `alias` - Room alias, e.g. `#room:example.org`
    ///
    /// # Returns
    ///
    /// The room id, or `None` if the alias can not be resolved, whatever the
    /// reason. Failures are only logged at debug level.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// if let Some(room_id) = session.resolve_room_alias("#room:example.org").await {
    ///     session.join_room(&room_id).await;
    /// }
    /// ```
    pub async fn resolve_room_alias(&self, alias: &str) -> Option<String> {
        match self.client.resolve_room_alias(alias).await {
            Ok(room_id) => {
                debug!("alias {} resolved to {}", alias, room_id);
                Some(room_id)
            }
            Err(e) => {
                debug!("room not found for alias {}: {}", alias, e);
                None
            }
        }
    }

    /// Returns the aliases of a room the client knows about, `None` otherwise.
    ///
    /// The canonical alias comes first, followed by the alternative ones.
    pub fn room_aliases(&self, room_id: &str) -> Option<Vec<String>> {
        self.client.room_aliases(room_id)
    }

    /// Joins a room as the puppet.
    ///
    /// # Arguments
    ///
    /// * `room_id` - Room id to join
    ///
    /// # Returns
    ///
    /// `true` when the room can never be joined again (no server in it is
    /// known anymore) and has to be recreated and re-aliased. `false` on
    /// success, and on any other failure, which is only logged.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// if session.join_room("!abc:example.org").await {
    ///     // create a new room and move the alias to it
    /// }
    /// ```
    pub async fn join_room(&self, room_id: &str) -> bool {
        let Err(e) = self.client.join_room(room_id).await else {
            info!("joined room {}", room_id);
            return false;
        };

        match classify_join_error(&e) {
            JoinErrorKind::NeedsRealias => {
                warn!("room {} has no known servers, it needs to be re-aliased", room_id);
                true
            }
            JoinErrorKind::Recoverable => {
                warn!("failed to join room {}, may succeed later: {}", room_id, e);
                false
            }
            JoinErrorKind::Other => {
                warn!("failed to join room {}: {}", room_id, e);
                false
            }
        }
    }

    /// Invites users to a room, all at once.
    ///
    /// Nothing is sent for an empty list.
    ///
    /// # Arguments
    ///
    /// * `room_id` - Room to invite the users to
    /// * `user_ids` - Users to invite
    ///
    /// # Errors
    ///
    /// Returns the first invite failure. Invites that already succeeded are not
    /// rolled back.
    pub async fn invite_users(&self, room_id: &str, user_ids: &[String]) -> Result<(), PuppetError> {
        if user_ids.is_empty() {
            debug!("all members already in room {}", room_id);
            return Ok(());
        }

        try_join_all(user_ids.iter().map(|user_id| async move {
            self.client.invite_user(room_id, user_id).await?;
            info!("invited {} to room {}", user_id, room_id);
            Ok::<(), PuppetError>(())
        }))
        .await?;

        Ok(())
    }

    /// Translates an `mxc://` URL to an HTTP URL, `None` if it is not one.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// assert_eq!(
    ///     session.resolve_media_url("mxc://example.org/abc").as_deref(),
    ///     Some("https://hs.example/_matrix/media/v3/download/example.org/abc")
    /// );
    /// ```
    pub fn resolve_media_url(&self, mxc_url: &str) -> Option<String> {
        self.client.media_url(mxc_url)
    }
}

impl<H: Homeserver> Drop for PuppetSession<H> {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Bridge, PuppetAccount},
        puppet::{EventSender, MockConnector, MockHomeserver, SessionEvent, SyncState},
    };
    use std::{sync::Mutex, time::Duration};

    type SenderSlot = Arc<Mutex<Option<EventSender>>>;

    fn create_test_config() -> Config {
        Config {
            bridge: Bridge {
                homeserver_url: "https://hs.example".to_owned(),
                domain: "example.org".to_owned(),
            },
            puppet: Some(PuppetAccount {
                id: "@bob:example.org".to_owned(),
                localpart: None,
                token: "tok".to_owned(),
            }),
        }
    }

    fn room_members(room_id: &str, members: &[&str]) -> SessionEvent {
        SessionEvent::RoomMembers {
            room_id: room_id.to_owned(),
            members: members.iter().map(|m| m.to_string()).collect(),
        }
    }

    // Connector publishing `events` during connect and keeping the sender
    fn create_connector(homeserver: MockHomeserver, events: Vec<SessionEvent>) -> (MockConnector, SenderSlot) {
        let slot: SenderSlot = Arc::new(Mutex::new(None));
        let mut connector = MockConnector::new();

        let connect_slot = Arc::clone(&slot);
        connector
            .expect_connect()
            .withf(|credentials, _| {
                credentials.homeserver_url == "https://hs.example"
                    && credentials.user_id == "@bob:example.org"
                    && credentials.access_token == "tok"
            })
            .times(1)
            .return_once(move |_, sender| {
                for event in events {
                    sender.send(event).unwrap();
                }
                *connect_slot.lock().unwrap() = Some(sender);
                Ok(homeserver)
            });

        (connector, slot)
    }

    async fn start_session(
        homeserver: MockHomeserver,
        events: Vec<SessionEvent>,
    ) -> (PuppetSession<MockHomeserver>, SenderSlot) {
        let (connector, slot) = create_connector(homeserver, events);
        let puppet = Puppet::new(create_test_config(), connector);
        let session = puppet.start().await.unwrap();
        (session, slot)
    }

    fn send(slot: &SenderSlot, event: SessionEvent) {
        slot.lock().unwrap().as_ref().unwrap().send(event).unwrap();
    }

    async fn wait_for_members(
        session: &PuppetSession<MockHomeserver>,
        room_id: &str,
        expected: &[&str],
    ) {
        let expected: Vec<String> = expected.iter().map(|m| m.to_string()).collect();
        tokio::time::timeout(Duration::from_secs(1), async {
            while session.room_members(room_id) != expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_start_then_track_room_members() {
        let (session, slot) =
            start_session(MockHomeserver::new(), vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        send(
            &slot,
            room_members("!abc:example.org", &["@bob:example.org", "@alice:example.org"]),
        );

        wait_for_members(
            &session,
            "!abc:example.org",
            &["@bob:example.org", "@alice:example.org"],
        )
        .await;
        assert_eq!(session.user_id(), "@bob:example.org");
    }

    #[tokio::test]
    async fn test_members_before_prepared_are_recorded() {
        let (session, _slot) = start_session(
            MockHomeserver::new(),
            vec![
                room_members("!abc:example.org", &["@bob:example.org"]),
                SessionEvent::Sync(SyncState::Prepared),
            ],
        )
        .await;

        assert_eq!(
            session.room_members("!abc:example.org"),
            vec!["@bob:example.org".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unknown_room_has_no_members() {
        let (session, _slot) =
            start_session(MockHomeserver::new(), vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert!(session.room_members("!unknown:example.org").is_empty());
    }

    #[tokio::test]
    async fn test_room_members_are_replaced() {
        let (session, slot) = start_session(
            MockHomeserver::new(),
            vec![
                room_members("!r:example.org", &["@a:x", "@b:x", "@c:x"]),
                SessionEvent::Sync(SyncState::Prepared),
            ],
        )
        .await;

        send(&slot, room_members("!r:example.org", &["@a:x", "@b:x"]));

        wait_for_members(&session, "!r:example.org", &["@a:x", "@b:x"]).await;
    }

    #[tokio::test]
    async fn test_second_prepared_is_ignored() {
        let (session, slot) = start_session(
            MockHomeserver::new(),
            vec![
                SessionEvent::Sync(SyncState::Prepared),
                SessionEvent::Sync(SyncState::Syncing),
                SessionEvent::Sync(SyncState::Prepared),
            ],
        )
        .await;

        // The dispatcher keeps running after the extra transition
        send(&slot, room_members("!r:example.org", &["@a:x"]));
        wait_for_members(&session, "!r:example.org", &["@a:x"]).await;
    }

    #[tokio::test]
    async fn test_start_fails_when_sync_stops_before_prepared() {
        let (connector, _slot) = create_connector(
            MockHomeserver::new(),
            vec![
                SessionEvent::Sync(SyncState::Error),
                SessionEvent::Sync(SyncState::Stopped),
            ],
        );
        let puppet = Puppet::new(create_test_config(), connector);

        assert!(matches!(puppet.start().await, Err(PuppetError::SyncAborted)));
    }

    #[tokio::test]
    async fn test_start_fails_when_event_channel_closes() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(|_, _sender| Ok(MockHomeserver::new()));
        let puppet = Puppet::new(create_test_config(), connector);

        assert!(matches!(puppet.start().await, Err(PuppetError::SyncAborted)));
    }

    #[tokio::test]
    async fn test_start_propagates_connect_error() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(1)
            .return_once(|_, _| Err(PuppetError::Api {
                status: 401,
                errcode: "M_UNKNOWN_TOKEN".to_owned(),
                message: "Invalid token".to_owned(),
            }));
        let puppet = Puppet::new(create_test_config(), connector);

        assert!(matches!(puppet.start().await, Err(PuppetError::Api { .. })));
    }

    #[tokio::test]
    async fn test_start_without_puppet_account() {
        let mut config = create_test_config();
        config.puppet = None;
        let mut connector = MockConnector::new();
        connector.expect_connect().never();
        let puppet = Puppet::new(config, connector);

        assert!(matches!(
            puppet.start().await,
            Err(PuppetError::MissingCredentials)
        ));
    }

    #[tokio::test]
    async fn test_restart_clears_room_members() {
        let slot: SenderSlot = Arc::new(Mutex::new(None));
        let mut connector = MockConnector::new();
        let mut first = true;
        let connect_slot = Arc::clone(&slot);
        connector.expect_connect().times(2).returning(move |_, sender| {
            if first {
                sender
                    .send(room_members("!r:example.org", &["@a:x"]))
                    .unwrap();
                first = false;
            }
            sender.send(SessionEvent::Sync(SyncState::Prepared)).unwrap();
            *connect_slot.lock().unwrap() = Some(sender);
            Ok(MockHomeserver::new())
        });
        let puppet = Puppet::new(create_test_config(), connector);

        let session = puppet.start().await.unwrap();
        assert_eq!(session.room_members("!r:example.org").len(), 1);
        drop(session);

        let session = puppet.start().await.unwrap();
        assert!(session.room_members("!r:example.org").is_empty());
    }

    #[tokio::test]
    async fn test_resolve_room_alias() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_resolve_room_alias()
            .with(mockall::predicate::eq("#room:example.org"))
            .times(1)
            .returning(|_| Ok("!abc:example.org".to_owned()));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert_eq!(
            session.resolve_room_alias("#room:example.org").await,
            Some("!abc:example.org".to_owned())
        );
    }

    #[tokio::test]
    async fn test_resolve_unknown_room_alias() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_resolve_room_alias()
            .times(1)
            .returning(|_| Err(PuppetError::Api {
                status: 404,
                errcode: "M_NOT_FOUND".to_owned(),
                message: "Room alias not found".to_owned(),
            }));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert_eq!(session.resolve_room_alias("#nope:example.org").await, None);
    }

    #[tokio::test]
    async fn test_room_aliases() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_room_aliases()
            .with(mockall::predicate::eq("!abc:example.org"))
            .returning(|_| Some(vec!["#room:example.org".to_owned()]));
        homeserver
            .expect_room_aliases()
            .with(mockall::predicate::eq("!unknown:example.org"))
            .returning(|_| None);
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert_eq!(
            session.room_aliases("!abc:example.org"),
            Some(vec!["#room:example.org".to_owned()])
        );
        assert_eq!(session.room_aliases("!unknown:example.org"), None);
    }

    #[tokio::test]
    async fn test_join_room_success() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_join_room()
            .with(mockall::predicate::eq("!abc:example.org"))
            .times(1)
            .returning(|_| Ok(()));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert!(!session.join_room("!abc:example.org").await);
    }

    #[tokio::test]
    async fn test_join_room_no_known_servers() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_join_room()
            .times(1)
            .returning(|_| Err(PuppetError::Api {
                status: 404,
                errcode: "M_UNKNOWN".to_owned(),
                message: "No known servers".to_owned(),
            }));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert!(session.join_room("!abc:example.org").await);
    }

    #[tokio::test]
    async fn test_join_room_message_only_ending_with_no_known_servers() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_join_room()
            .times(1)
            .returning(|_| Err(PuppetError::Api {
                status: 404,
                errcode: "M_UNKNOWN".to_owned(),
                message: "Room has No known servers".to_owned(),
            }));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert!(!session.join_room("!abc:example.org").await);
    }

    #[tokio::test]
    async fn test_join_room_other_failure_is_swallowed() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_join_room()
            .times(1)
            .returning(|_| Err(PuppetError::Api {
                status: 403,
                errcode: "M_FORBIDDEN".to_owned(),
                message: "You are banned".to_owned(),
            }));
        homeserver
            .expect_join_room()
            .times(1)
            .returning(|_| Err(PuppetError::Transport("connection reset".to_owned())));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert!(!session.join_room("!abc:example.org").await);
        assert!(!session.join_room("!abc:example.org").await);
    }

    #[tokio::test]
    async fn test_invite_no_users() {
        let mut homeserver = MockHomeserver::new();
        homeserver.expect_invite_user().never();
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert!(session.invite_users("!abc:example.org", &[]).await.is_ok());
    }

    #[tokio::test]
    async fn test_invite_users() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_invite_user()
            .withf(|room_id, user_id| room_id == "!abc:example.org" && user_id == "@u1:example.org")
            .times(1)
            .returning(|_, _| Ok(()));
        homeserver
            .expect_invite_user()
            .withf(|room_id, user_id| room_id == "!abc:example.org" && user_id == "@u2:example.org")
            .times(1)
            .returning(|_, _| Ok(()));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        let users = vec!["@u1:example.org".to_owned(), "@u2:example.org".to_owned()];
        assert!(session.invite_users("!abc:example.org", &users).await.is_ok());
    }

    #[tokio::test]
    async fn test_invite_users_fails_if_one_invite_fails() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_invite_user()
            .withf(|_, user_id| user_id == "@u1:example.org")
            .times(1)
            .returning(|_, _| Ok(()));
        homeserver
            .expect_invite_user()
            .withf(|_, user_id| user_id == "@u2:example.org")
            .times(1)
            .returning(|_, _| Err(PuppetError::Api {
                status: 403,
                errcode: "M_FORBIDDEN".to_owned(),
                message: "Not allowed".to_owned(),
            }));
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        let users = vec!["@u1:example.org".to_owned(), "@u2:example.org".to_owned()];
        assert!(matches!(
            session.invite_users("!abc:example.org", &users).await,
            Err(PuppetError::Api { .. })
        ));
    }

    #[tokio::test]
    async fn test_resolve_media_url() {
        let mut homeserver = MockHomeserver::new();
        homeserver
            .expect_media_url()
            .with(mockall::predicate::eq("mxc://example.org/abc"))
            .returning(|_| Some("https://hs.example/_matrix/media/v3/download/example.org/abc".to_owned()));
        homeserver
            .expect_media_url()
            .with(mockall::predicate::eq("not-a-media"))
            .returning(|_| None);
        let (session, _slot) =
            start_session(homeserver, vec![SessionEvent::Sync(SyncState::Prepared)]).await;

        assert_eq!(
            session.resolve_media_url("mxc://example.org/abc").as_deref(),
            Some("https://hs.example/_matrix/media/v3/download/example.org/abc")
        );
        assert_eq!(session.resolve_media_url("not-a-media"), None);
        // Escape hatch exposes the same client
        assert_eq!(session.client().media_url("not-a-media"), None);
    }
}
