//! Data models for Murmur

mod message;

pub use message::*;
