//! App error types

use std::io;

/// App result type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by the chat facade and the CLI
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] murmur_core::Error),

    #[error(transparent)]
    Net(#[from] murmur_net::Error),

    #[error("Invalid config: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Could not write config: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
