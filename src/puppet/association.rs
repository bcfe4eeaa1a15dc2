//! One-time association of a Matrix account with the puppet.
//!
//! The flow asks for the account localpart and password, logs in on a fresh
//! client to obtain an access token, and stores the resulting credentials in
//! the `puppet` record of the configuration file.

use log::{error, info};

use crate::{
    config::{ConfigStore, PuppetAccount, merge_puppet_account},
    error::PuppetError,
    prompt::Prompter,
    puppet::{Connector, Puppet},
};

impl<C: Connector> Puppet<C> {
    /// Associates a Matrix account with the puppet.
    ///
    /// 1. Prompts for the localpart, then for the password (not echoed)
    /// 2. Logs in as `@localpart:domain` on a fresh client
    /// 3. Writes `{ id, localpart, token }` as the `puppet` record of the stored
    ///    configuration, keeping every other key
    ///
    /// The in-memory configuration is updated as well, so the puppet can be
    /// started right away.
    ///
    /// # Errors
    ///
    /// Returns the first failure among prompting, login, reading and writing
    /// the store. The store is not written if the login fails.
    pub async fn associate_account<S, P>(
        &mut self,
        store: &S,
        prompter: &P,
    ) -> Result<PuppetAccount, PuppetError>
    where
        S: ConfigStore,
        P: Prompter,
    {
        match self.try_associate_account(store, prompter).await {
            Ok(account) => {
                info!("puppet account {} associated", account.id);
                Ok(account)
            }
            Err(e) => {
                error!("failed to associate puppet account: {}", e);
                Err(e)
            }
        }
    }

    async fn try_associate_account<S, P>(
        &mut self,
        store: &S,
        prompter: &P,
    ) -> Result<PuppetAccount, PuppetError>
    where
        S: ConfigStore,
        P: Prompter,
    {
        let localpart = prompter.read_line("Username (localpart): ")?;
        let password = prompter.read_password("Password: ")?;
        let user_id = self.config.user_id_for(localpart.trim());

        info!("logging in as {}", user_id);
        let token = self
            .connector
            .login(&self.config.bridge.homeserver_url, &user_id, &password)
            .await?;

        let account = PuppetAccount {
            id: user_id,
            localpart: Some(localpart.trim().to_owned()),
            token,
        };

        let mut document = store.read().await?;
        merge_puppet_account(&mut document, &account)?;
        store.write(&document).await?;

        self.config.puppet = Some(account.clone());
        Ok(account)
    }
}
