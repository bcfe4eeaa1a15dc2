//! Seams between the puppet and the Matrix client library.
//!
//! The puppet never talks to the SDK directly: a [`Connector`] builds clients
//! and a [`Homeserver`] performs requests as the puppet account. This keeps the
//! session logic testable with mocks.

use mockall::automock;

use crate::{
    error::PuppetError,
    puppet::{EventSender, PuppetCredentials},
};

/// Authenticated client handle acting as the puppet account.
#[automock]
pub trait Homeserver {
    /// Resolves a room alias to a room id.
    async fn resolve_room_alias(&self, alias: &str) -> Result<String, PuppetError>;
    /// Returns the aliases of a room known to the local client, `None` if the
    /// room is not known.
    fn room_aliases(&self, room_id: &str) -> Option<Vec<String>>;
    /// Joins a room.
    async fn join_room(&self, room_id: &str) -> Result<(), PuppetError>;
    /// Invites a user to a room.
    async fn invite_user(&self, room_id: &str, user_id: &str) -> Result<(), PuppetError>;
    /// Translates an `mxc://` URL to a fetchable HTTP URL.
    fn media_url(&self, mxc_url: &str) -> Option<String>;
}

/// Factory of homeserver clients.
#[automock(type Client = MockHomeserver;)]
pub trait Connector {
    /// Client type produced by [`Connector::connect`].
    type Client: Homeserver;

    /// Builds a client authenticated with `credentials` and starts syncing.
    ///
    /// The client publishes sync state changes and room membership snapshots
    /// on `events` for as long as it lives.
    async fn connect(
        &self,
        credentials: &PuppetCredentials,
        events: EventSender,
    ) -> Result<Self::Client, PuppetError>;

    /// Logs in with a password on a fresh, unauthenticated client and returns
    /// the access token.
    async fn login(
        &self,
        homeserver_url: &str,
        user_id: &str,
        password: &str,
    ) -> Result<String, PuppetError>;
}
