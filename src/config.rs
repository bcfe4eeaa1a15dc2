//! Configuration file structures and persistence for the puppet.
//!
//! The configuration is a JSON file shared with the bridge it belongs to. The
//! puppet only reads the `bridge` and `puppet` sections; every other key is left
//! untouched, including when the association flow rewrites the file.
//!
//! # Configuration File Format
//!
//! ```json
//! {
//!   "bridge": {
//!     "homeserverUrl": "https://matrix.example.org",
//!     "domain": "example.org"
//!   },
//!   "puppet": {
//!     "id": "@bob:example.org",
//!     "localpart": "bob",
//!     "token": "syt_access_token"
//!   }
//! }
//! ```
//!
//! # Environment Variable Overrides
//!
//! Any value can be overridden with a `PUPPET_` prefixed variable, sections
//! being separated by `__`:
//!
//! ```bash
//! export PUPPET_BRIDGE__HOMESERVER_URL="https://matrix.example.org"
//! export PUPPET_PUPPET__TOKEN="syt_access_token"
//! ```

use figment::{
    Figment,
    providers::{Env, Format, Json},
};
use log::{debug, trace};
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

use crate::{error::PuppetError, puppet::PuppetCredentials};

/// Prefix of the environment variables overriding the configuration file.
const ENV_PREFIX: &str = "PUPPET_";

/// Key of the puppet record in the configuration file.
const PUPPET_KEY: &str = "puppet";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Bridge settings shared with the bridge process
    pub bridge: Bridge,
    /// Puppet account, absent until the association flow ran
    #[serde(default)]
    pub puppet: Option<PuppetAccount>,
}

/// Homeserver settings of the bridge.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bridge {
    /// Base URL of the homeserver, e.g. `https://matrix.example.org`.
    pub homeserver_url: String,

    /// Server name user ids are built with, e.g. `example.org`.
    pub domain: String,
}

/// Credentials of the puppeted account.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PuppetAccount {
    /// Fully qualified user id, e.g. `@bob:example.org`
    pub id: String,
    /// Localpart the id was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localpart: Option<String>,
    /// Access token obtained at association time
    pub token: String,
}

impl Config {
    /// Loads the configuration from a JSON file, applying `PUPPET_` environment
    /// overrides on top of it.
    ///
    /// A trailing slash on the homeserver URL is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, is not valid JSON, or lacks a
    /// required field.
    pub fn load(path: &str) -> Result<Config, figment::Error> {
        debug!("load config from {}", path);

        let mut config: Config = Figment::new()
            .merge(Json::file_exact(path))
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .split("__")
                    .map(|key| env_key(key.as_str()).into())
                    .lowercase(false),
            )
            .extract()?;

        while config.bridge.homeserver_url.ends_with('/') {
            config.bridge.homeserver_url.pop();
        }

        Ok(config)
    }

    /// Builds the credentials used to start a session.
    ///
    /// # Errors
    ///
    /// Returns [`PuppetError::MissingCredentials`] if no account was associated.
    pub fn puppet_credentials(&self) -> Result<PuppetCredentials, PuppetError> {
        let puppet = self
            .puppet
            .as_ref()
            .ok_or(PuppetError::MissingCredentials)?;

        Ok(PuppetCredentials {
            homeserver_url: self.bridge.homeserver_url.clone(),
            user_id: puppet.id.clone(),
            access_token: puppet.token.clone(),
        })
    }

    /// Builds the full user id of a localpart on the bridge domain.
    pub fn user_id_for(&self, localpart: &str) -> String {
        format!("@{}:{}", localpart, self.bridge.domain)
    }
}

/// Turns an environment key such as `BRIDGE.HOMESERVER_URL` into the
/// configuration key `bridge.homeserverUrl`.
fn env_key(key: &str) -> String {
    key.split('.')
        .map(|segment| {
            let mut camel = String::with_capacity(segment.len());
            let mut upper_next = false;
            for c in segment.chars() {
                if c == '_' {
                    upper_next = !camel.is_empty();
                } else if upper_next {
                    camel.push(c.to_ascii_uppercase());
                    upper_next = false;
                } else {
                    camel.push(c.to_ascii_lowercase());
                }
            }
            camel
        })
        .collect::<Vec<_>>()
        .join(".")
}

/// Inserts or replaces the puppet record of a raw configuration document.
///
/// All the other keys of the document are kept as they are.
///
/// # Errors
///
/// Returns [`PuppetError::InvalidConfigStore`] if the document is not an object.
pub fn merge_puppet_account(
    document: &mut Value,
    account: &PuppetAccount,
) -> Result<(), PuppetError> {
    let Some(object) = document.as_object_mut() else {
        return Err(PuppetError::InvalidConfigStore);
    };

    object.insert(PUPPET_KEY.to_owned(), serde_json::to_value(account)?);
    Ok(())
}

/// Persistent store of the raw configuration document.
///
/// Works on [`Value`] rather than [`Config`] so that keys the puppet does not
/// know about survive a rewrite.
#[automock]
pub trait ConfigStore {
    /// Reads the whole configuration document.
    async fn read(&self) -> Result<Value, PuppetError>;
    /// Overwrites the configuration document.
    async fn write(&self, document: &Value) -> Result<(), PuppetError>;
}

/// [`ConfigStore`] backed by a JSON file.
pub struct FileConfigStore {
    /// Path to the JSON configuration file
    path: String,
}

impl FileConfigStore {
    /// Creates a store for the file at `path`.
    pub fn new(path: &str) -> Self {
        FileConfigStore {
            path: path.to_owned(),
        }
    }
}

impl ConfigStore for FileConfigStore {
    async fn read(&self) -> Result<Value, PuppetError> {
        trace!("read config store {}", self.path);

        let serialized = fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&serialized)?)
    }

    /// Writes the document pretty-printed, with a trailing newline.
    async fn write(&self, document: &Value) -> Result<(), PuppetError> {
        trace!("write config store {}", self.path);

        let mut serialized = serde_json::to_string_pretty(document)?;
        serialized.push('\n');
        fs::write(&self.path, serialized).await?;

        debug!("config store {} written", self.path);
        Ok(())
    }
}
