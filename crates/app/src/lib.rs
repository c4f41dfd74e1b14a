//! Murmur App Library
//!
//! Binds a room to a conversation: the [`Chat`] facade, input routing with a
//! selection cursor, a flat view model, and file configuration. The `murmur`
//! binary is a terminal front end over these.

pub mod chat;
pub mod config;
pub mod error;
pub mod input;
pub mod viewmodel;

pub use chat::Chat;
pub use config::AppConfig;
pub use error::{Error, Result};
pub use input::{ChatInput, InputOutcome};
pub use viewmodel::MessageRow;
