//! Access token introspection.
//!
//! Restoring a Matrix session needs the device the access token belongs to,
//! which the configuration does not hold. This module asks the homeserver
//! through `GET /_matrix/client/v3/account/whoami`.

use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;

/// Identity bound to an access token.
#[derive(Debug, Clone, Deserialize)]
pub struct WhoAmI {
    /// User the token belongs to
    pub user_id: String,
    /// Device the token belongs to, absent for appservice tokens
    #[serde(default)]
    pub device_id: Option<String>,
}

/// HTTP client for the whoami endpoint.
///
/// # Examples
///
/// ```no_run
/// let requester = WhoAmIRequester::new("https://matrix.example.org");
/// let identity = requester.whoami("syt_access_token").await?;
/// println!("token of {} on {:?}", identity.user_id, identity.device_id);
/// ```
pub struct WhoAmIRequester {
    /// Homeserver base URL, without trailing slash
    url: String,
    /// HTTP client
    client: Client,
}

impl WhoAmIRequester {
    /// Create a new [WhoAmIRequester] for a homeserver.
    pub fn new(url: &str) -> Self {
        WhoAmIRequester {
            url: url.trim_end_matches('/').to_owned(),
            client: Client::new(),
        }
    }

    /// Returns the user and device an access token is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails, the homeserver rejects the token,
    /// or the response can not be decoded.
    pub async fn whoami(&self, access_token: &str) -> Result<WhoAmI, reqwest::Error> {
        let url = format!("{}/_matrix/client/v3/account/whoami", &self.url);
        info!("request token owner");
        debug!("request {}", &url);

        let who_am_i: WhoAmI = self
            .client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        debug!("response from {} -> {:?}", &url, &who_am_i);

        Ok(who_am_i)
    }
}
