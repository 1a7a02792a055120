use std::error::Error as StdError;

/// Crate-wide result type for fleet operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed failures surfaced at the synchronous API edges.
///
/// Failures inside scheduled work or inbound-event handlers never raise;
/// they flow through the event stream as [`crate::events::ErrorEvent`]s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The bot has no live connection to operate on.
    #[error("bot is not connected")]
    NotConnected,

    /// A wire operation against the chat transport failed.
    #[error("transport operation failed: {context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// A directory read or write failed.
    #[error("directory operation failed: {context}: {source}")]
    Directory {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn transport(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Transport {
            context: context.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn directory(context: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Directory {
            context: context.into(),
            source: source.into(),
        }
    }
}
