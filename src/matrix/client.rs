//! matrix-sdk backed [`Connector`] and [`Homeserver`].
//!
//! [`MatrixConnector`] restores a puppet session from a bare access token and
//! starts its sync loop, or logs in with a password. [`MatrixHomeserver`] wraps
//! the resulting [`Client`].
//!
//! # Storage
//!
//! Each device of the puppet gets its own SQLite store under the data
//! directory, `data_dir/<device id>/`. The store keeps the device's encryption
//! keys, so a restarted puppet keeps the identity it uploaded to the homeserver.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use matrix_sdk::{
    Client, SessionMeta, SessionTokens,
    authentication::matrix::MatrixSession,
    ruma::{
        DeviceId, OwnedDeviceId, OwnedRoomId, OwnedUserId, RoomAliasId, RoomId, UserId,
        api::client::membership::invite_user::{self, v3::InvitationRecipient},
    },
};
use tokio::task::JoinHandle;

use crate::{
    error::PuppetError,
    matrix::{media::mxc_to_http, sync::MatrixSync, whoami::WhoAmIRequester},
    puppet::{Connector, EventSender, Homeserver, PuppetCredentials},
};

/// Device display name used when logging in with a password.
const DEVICE_DISPLAY_NAME: &str = "matrix puppet";

/// Builds matrix-sdk clients for the puppet.
#[derive(Debug, Clone)]
pub struct MatrixConnector {
    /// Directory holding one SQLite store per device
    data_dir: PathBuf,
}

impl MatrixConnector {
    /// Creates a new connector.
    ///
    /// # Arguments
    ///
    /// * `data_dir` - Directory where the device stores are kept. It holds
    ///   encryption keys and must stay private.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// let connector = MatrixConnector::new("./puppet-data");
    /// ```
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        MatrixConnector {
            data_dir: data_dir.into(),
        }
    }

    /// Returns the store directory of a device.
    fn store_path(&self, device_id: &DeviceId) -> PathBuf {
        self.data_dir.join(device_id.as_str())
    }
}

impl Connector for MatrixConnector {
    type Client = MatrixHomeserver;

    /// Restores the session bound to the access token and starts syncing.
    ///
    /// The device of the token is looked up first, since a session can not be
    /// restored without it. The device store is reopened, or created if the
    /// token comes from another client.
    async fn connect(
        &self,
        credentials: &PuppetCredentials,
        events: EventSender,
    ) -> Result<MatrixHomeserver, PuppetError> {
        let user_id = parse_user_id(&credentials.user_id)?;

        let who_am_i = WhoAmIRequester::new(&credentials.homeserver_url)
            .whoami(&credentials.access_token)
            .await?;
        if who_am_i.user_id != credentials.user_id {
            warn!(
                "access token belongs to {}, not {}",
                who_am_i.user_id, credentials.user_id
            );
        }
        let device_id: OwnedDeviceId = who_am_i
            .device_id
            .ok_or(PuppetError::MissingDevice)?
            .as_str()
            .into();
        debug!("access token bound to device {}", device_id);

        let client = restore_client(
            &credentials.homeserver_url,
            &self.store_path(&device_id),
            MatrixSession {
                meta: SessionMeta { user_id, device_id },
                tokens: SessionTokens {
                    access_token: credentials.access_token.clone(),
                    refresh_token: None,
                },
            },
        )
        .await?;
        info!("matrix session restored for {}", credentials.user_id);

        let sync_task = MatrixSync::new(&client, events).start();

        Ok(MatrixHomeserver { client, sync_task })
    }

    /// Logs in on a fresh client, distinct from any running session.
    ///
    /// The device id is chosen before logging in, so the store of the new
    /// device is the one [`MatrixConnector::connect`] reopens later.
    async fn login(
        &self,
        homeserver_url: &str,
        user_id: &str,
        password: &str,
    ) -> Result<String, PuppetError> {
        let user_id = parse_user_id(user_id)?;
        let device_id = DeviceId::new();

        let client = Client::builder()
            .homeserver_url(homeserver_url)
            .sqlite_store(self.store_path(&device_id), None)
            .build()
            .await?;
        debug!("matrix client created for device {}", device_id);

        let response = client
            .matrix_auth()
            .login_username(&user_id, password)
            .device_id(device_id.as_str())
            .initial_device_display_name(DEVICE_DISPLAY_NAME)
            .send()
            .await?;

        info!("logged in as {} on device {}", user_id, response.device_id);
        Ok(response.access_token)
    }
}

/// Builds a client on a device store and restores its session.
///
/// # Arguments
///
/// * `homeserver_url` - Base URL of the homeserver
/// * `store_path` - SQLite store directory of the device
/// * `session` - User, device and access token to restore
///
/// # Returns
///
/// An authenticated client, not syncing yet.
async fn restore_client(
    homeserver_url: &str,
    store_path: &Path,
    session: MatrixSession,
) -> Result<Client, PuppetError> {
    debug!("opening matrix store at {}", store_path.display());

    let client = Client::builder()
        .homeserver_url(homeserver_url)
        .sqlite_store(store_path, None)
        .build()
        .await?;

    client.restore_session(session).await?;
    Ok(client)
}

/// Authenticated puppet client.
///
/// Dropping it stops its sync loop.
pub struct MatrixHomeserver {
    /// Underlying Matrix SDK client
    client: Client,
    /// Task running the sync loop
    sync_task: JoinHandle<()>,
}

impl MatrixHomeserver {
    /// Returns the underlying Matrix SDK client.
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

impl Homeserver for MatrixHomeserver {
    async fn resolve_room_alias(&self, alias: &str) -> Result<String, PuppetError> {
        let alias = RoomAliasId::parse(alias)
            .map_err(|_| PuppetError::InvalidIdentifier(alias.to_owned()))?;

        let response = self.client.resolve_room_alias(&alias).await?;
        Ok(response.room_id.to_string())
    }

    /// Canonical alias first, then the alternative aliases.
    fn room_aliases(&self, room_id: &str) -> Option<Vec<String>> {
        let room_id = RoomId::parse(room_id).ok()?;
        let room = self.client.get_room(&room_id)?;

        let aliases = room
            .canonical_alias()
            .into_iter()
            .chain(room.alt_aliases())
            .map(|alias| alias.to_string())
            .collect();
        Some(aliases)
    }

    async fn join_room(&self, room_id: &str) -> Result<(), PuppetError> {
        let room_id = parse_room_id(room_id)?;

        self.client.join_room_by_id(&room_id).await?;
        Ok(())
    }

    /// Sends the invite directly, the room does not have to be synced yet.
    async fn invite_user(&self, room_id: &str, user_id: &str) -> Result<(), PuppetError> {
        let room_id = parse_room_id(room_id)?;
        let user_id = parse_user_id(user_id)?;

        let request =
            invite_user::v3::Request::new(room_id, InvitationRecipient::UserId { user_id });
        self.client.send(request).await?;
        Ok(())
    }

    fn media_url(&self, mxc_url: &str) -> Option<String> {
        mxc_to_http(self.client.homeserver().as_str(), mxc_url)
    }
}

impl Drop for MatrixHomeserver {
    fn drop(&mut self) {
        self.sync_task.abort();
    }
}

fn parse_user_id(user_id: &str) -> Result<OwnedUserId, PuppetError> {
    UserId::parse(user_id).map_err(|_| PuppetError::InvalidIdentifier(user_id.to_owned()))
}

fn parse_room_id(room_id: &str) -> Result<OwnedRoomId, PuppetError> {
    RoomId::parse(room_id).map_err(|_| PuppetError::InvalidIdentifier(room_id.to_owned()))
}
