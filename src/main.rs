//! matrix-puppet - A Matrix client acting as a real user.
//!
//! This is the entry point of the puppet, which logs into a Matrix homeserver
//! with a user's own credentials, follows room membership, and performs room
//! operations on that user's behalf.
//!
//! # Overview
//!
//! A puppet is a bridge-side client authenticated as a real end-user account
//! rather than as an appservice. The bridge uses it to act as that user: join
//! rooms, invite people, resolve aliases and media.
//!
//! # Features
//!
//! - **Account Association**: One-time interactive login storing an access token in the config
//! - **Membership Tracking**: Member lists of every room, kept up to date from the sync stream
//! - **Room Operations**: Alias resolution, alias listing, join and invite
//! - **Media URLs**: Translation of `mxc://` URLs into fetchable HTTP URLs
//! - **JSON Configuration**: Shared with the bridge, with environment variable overrides
//!
//! # Configuration
//!
//! ```json
//! {
//!   "bridge": {
//!     "homeserverUrl": "https://matrix.example.org",
//!     "domain": "example.org"
//!   }
//! }
//! ```
//!
//! The `puppet` record is added by the `associate` command.
//!
//! # Usage
//!
//! ```bash
//! matrix-puppet --config config.json --data ./puppet-data associate
//! matrix-puppet --config config.json --data ./puppet-data run
//! matrix-puppet --config config.json --data ./puppet-data join '!abc:example.org'
//! ```
//!
//! # Architecture
//!
//! - [`config`] - Configuration structures, loading and persistence
//! - [`error`] - Error types and join failure classification
//! - [`matrix`] - Matrix SDK implementation of the puppet seams
//! - [`prompt`] - Interactive terminal prompts
//! - [`puppet`] - Puppet lifecycle, membership tracking and room operations
//!
//! # Environment Variables
//!
//! - `RUST_LOG` - Controls logging level (default: `info`)
//! - `PUPPET_*` - Configuration overrides, see [`config`]

use anyhow::Context;
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};

use crate::{
    config::{Config, FileConfigStore},
    matrix::{MatrixConnector, MatrixHomeserver},
    prompt::TerminalPrompter,
    puppet::{Puppet, PuppetSession},
};

mod config;
mod error;
mod matrix;
mod prompt;
mod puppet;

/// Command-line arguments of the puppet.
///
/// # Examples
///
/// ```bash
/// matrix-puppet --config config.json --data ./puppet-data members '!abc:example.org'
/// ```
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the JSON configuration file.
    ///
    /// The file is shared with the bridge. Only its `puppet` record is ever
    /// rewritten, by the `associate` command.
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Path to the directory for storing the Matrix stores.
    ///
    /// It holds one SQLite store per puppet device, with its encryption keys.
    /// Keep it private:
    ///
    /// ```bash
    /// mkdir -p ./puppet-data
    /// chmod 700 ./puppet-data
    /// ```
    #[arg(short, long, default_value = "puppet-data")]
    data: String,

    #[command(subcommand)]
    command: Command,
}

/// Puppet commands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Log in with a password and store the access token in the configuration
    Associate,
    #[command(flatten)]
    Session(SessionCommand),
}

/// Commands run against a started session.
#[derive(Subcommand, Debug)]
enum SessionCommand {
    /// Start the puppet and stay synced until interrupted
    Run,
    /// List the members of a room
    Members { room_id: String },
    /// Resolve a room alias to a room id
    Resolve { alias: String },
    /// List the aliases of a room
    Aliases { room_id: String },
    /// Join a room
    Join { room_id: String },
    /// Invite users to a room
    Invite {
        room_id: String,
        user_ids: Vec<String>,
    },
    /// Translate an mxc:// URL to an HTTP URL
    Media { url: String },
}

/// Main entry point of the puppet.
///
/// 1. **Logging Setup**: `info` level by default, overridable with `RUST_LOG`
/// 2. **Argument Parsing**: Parses command-line arguments using `clap`
/// 3. **Configuration Loading**: Reads the JSON configuration with environment overrides
/// 4. **Command Execution**: Runs the requested command
///
/// Failures are logged and end the process with a non-zero exit code.
#[tokio::main]
async fn main() {
    // Put logger at info level by default
    let env = Env::default().filter_or("RUST_LOG", "info");
    env_logger::init_from_env(env);

    info!("Starting matrix-puppet {}...", env!("CARGO_PKG_VERSION"));

    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load config file: {}", e);
            std::process::exit(1);
        }
    };

    let mut puppet = Puppet::new(config, MatrixConnector::new(&args.data));

    if let Err(e) = run_command(&mut puppet, &args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Runs one command against the puppet.
async fn run_command(puppet: &mut Puppet<MatrixConnector>, args: &Args) -> anyhow::Result<()> {
    let command = match &args.command {
        Command::Associate => {
            let store = FileConfigStore::new(&args.config);
            let account = puppet
                .associate_account(&store, &TerminalPrompter)
                .await
                .context("account association failed")?;
            println!("Puppet associated as {}", account.id);
            return Ok(());
        }
        Command::Session(command) => command,
    };

    info!("connecting to {}", puppet.config().bridge.homeserver_url);
    let session = puppet.start().await.context("failed to start the puppet")?;

    match command {
        SessionCommand::Run => run_until_interrupted(&session).await?,
        SessionCommand::Members { room_id } => {
            for member in session.room_members(room_id) {
                println!("{}", member);
            }
        }
        SessionCommand::Resolve { alias } => match session.resolve_room_alias(alias).await {
            Some(room_id) => println!("{}", room_id),
            None => println!("No room found for {}", alias),
        },
        SessionCommand::Aliases { room_id } => match session.room_aliases(room_id) {
            Some(aliases) => {
                for alias in aliases {
                    println!("{}", alias);
                }
            }
            None => println!("Room {} is unknown", room_id),
        },
        SessionCommand::Join { room_id } => {
            if session.join_room(room_id).await {
                println!("Room {} can not be joined anymore, it needs a new alias", room_id);
            }
        }
        SessionCommand::Invite { room_id, user_ids } => {
            session
                .invite_users(room_id, user_ids)
                .await
                .context("failed to invite users")?;
        }
        SessionCommand::Media { url } => match session.resolve_media_url(url) {
            Some(http_url) => println!("{}", http_url),
            None => println!("{} is not a media URL", url),
        },
    }

    Ok(())
}

/// Keeps the session alive until Ctrl-C.
async fn run_until_interrupted(session: &PuppetSession<MatrixHomeserver>) -> anyhow::Result<()> {
    info!(
        "puppet {} running on {}, press Ctrl-C to stop",
        session.user_id(),
        session.client().inner().homeserver()
    );

    tokio::signal::ctrl_c().await?;

    info!("stopping puppet {}", session.user_id());
    Ok(())
}
