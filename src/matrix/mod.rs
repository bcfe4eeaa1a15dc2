//! Matrix protocol integration for the puppet.
//!
//! This module implements the puppet seams on top of the Matrix SDK:
//! - Session restoration from an access token, and password login
//! - Real-time event synchronization published as session events
//! - Room alias, join, invite and media operations
//!
//! # Architecture
//!
//! The module is structured around [`client::MatrixConnector`] which builds
//! [`client::MatrixHomeserver`] clients:
//! - **WhoAmI**: finds the device an access token is bound to via the whoami submodule
//! - **Sync**: runs the sync loop and publishes events via the sync submodule
//! - **Media**: translates MXC URLs via the media submodule
//!
//! # Examples
//!
//! ```ignore
//! use matrix_puppet::{config::Config, matrix::MatrixConnector, puppet::Puppet};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::load("config.json")?;
//! let session = Puppet::new(config, MatrixConnector::new("./puppet-data")).start().await?;
//! let client = session.client().inner();
//! # Ok(())
//! # }
//! ```

mod client;
mod media;
mod sync;
mod whoami;

pub use crate::matrix::client::{MatrixConnector, MatrixHomeserver};
