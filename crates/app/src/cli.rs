//! CLI argument definitions for the murmur binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use murmur_net::{RoomUrl, DEFAULT_PORT};

/// Chat in a murmur room from the terminal
#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to murmur.toml in the platform config dir)
    #[arg(long, global = true, env = "MURMUR_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start a relay, print its join URL and chat in it
    Host(HostArgs),
    /// Join a relay by URL and chat
    Join(JoinArgs),
}

/// Who to be in the room
#[derive(clap::Args, Debug, Clone)]
pub struct IdentityArgs {
    /// Participant identity (unique in the room)
    #[arg(long, env = "MURMUR_IDENTITY")]
    pub identity: Option<String>,

    /// Display name
    #[arg(long, env = "MURMUR_NAME")]
    pub name: Option<String>,
}

#[derive(clap::Args, Debug)]
pub struct HostArgs {
    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT, env = "MURMUR_PORT")]
    pub port: u16,

    /// Room name
    #[arg(long, default_value = "lounge")]
    pub room: String,

    /// Join token (generated when omitted)
    #[arg(long, env = "MURMUR_TOKEN")]
    pub token: Option<String>,

    #[command(flatten)]
    pub who: IdentityArgs,
}

#[derive(clap::Args, Debug)]
pub struct JoinArgs {
    /// murmur://host:port/room/token
    pub url: RoomUrl,

    #[command(flatten)]
    pub who: IdentityArgs,
}
