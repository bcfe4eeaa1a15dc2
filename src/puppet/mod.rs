//! Puppet session acting as a real Matrix user.
//!
//! The puppet logs in with a user's own access token rather than as an
//! appservice, follows the live sync stream to know who is in which room, and
//! offers a few room operations on behalf of that user.
//!
//! # Architecture
//!
//! - [`Puppet`] holds the configuration and a [`Connector`]. It starts sessions
//!   and runs the one-time account association flow.
//! - [`PuppetSession`] is a started session, wrapping the authenticated
//!   [`Homeserver`] handle and the room membership cache.
//! - The connector publishes [`SessionEvent`]s on a channel; independent
//!   subscribers keep the membership cache up to date and detect the end of the
//!   initial sync.
//!
//! # Examples
//!
//! ```no_run
//! use matrix_puppet::{config::Config, matrix::MatrixConnector, puppet::Puppet};
//!
//! # async fn example() -> Result<(), anyhow::Error> {
//! let config = Config::load("config.json")?;
//! let puppet = Puppet::new(config, MatrixConnector::new("./puppet-data"));
//!
//! let session = puppet.start().await?;
//! println!("members: {:?}", session.room_members("!abc:example.org"));
//! # Ok(())
//! # }
//! ```

mod association;
mod events;
mod homeserver;
mod session;

pub use crate::puppet::events::{EventSender, SessionEvent, SyncState};
#[cfg(test)]
pub use crate::puppet::homeserver::{MockConnector, MockHomeserver};
pub use crate::puppet::homeserver::{Connector, Homeserver};
pub use crate::puppet::session::{Puppet, PuppetSession};

/// Credentials of an already associated puppet account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PuppetCredentials {
    /// Base URL of the homeserver
    pub homeserver_url: String,
    /// User id of the puppet account
    pub user_id: String,
    /// Access token of the puppet account
    pub access_token: String,
}
