//! Shared records and the chat color registry used across all shoal crates.

pub mod color;
pub mod types;

pub use {
    color::{ChatColor, ColorParseError},
    types::{BotRecord, ChannelRecord, Credentials, UserRecord, channel_key},
};
