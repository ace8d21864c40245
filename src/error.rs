//! Error types for external-source media operations

use thiserror::Error;

use crate::types::{Cookie, MediaId};

/// Result type for external-source operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while binding, loading or unloading external-source media
#[derive(Debug, Error)]
pub enum Error {
    /// Media id is not present in the media directory
    #[error("unknown media id {media_id}")]
    UnknownMedia { media_id: MediaId },

    /// Media name is not present in the media directory
    #[error("unknown media name: {name}")]
    UnknownMediaName { name: String },

    /// Unload was requested more times than the cookie was loaded
    #[error("load count underflow for external source {cookie}")]
    LoadCountUnderflow { cookie: Cookie },

    /// The file-state factory or its storage acquisition failed
    #[error("file state construction failed for media {media_id}: {reason}")]
    Construction { media_id: MediaId, reason: String },

    /// No live file state is registered for the media id
    #[error("no file state registered for media {media_id}")]
    StateNotFound { media_id: MediaId },

    /// The coordinator worker is no longer running
    #[error("coordinator worker has shut down")]
    ChannelClosed,
}

impl Error {
    /// Create an unknown-media error
    pub fn unknown_media(media_id: MediaId) -> Self {
        Self::UnknownMedia { media_id }
    }

    /// Create an unknown-media-name error
    pub fn unknown_media_name(name: impl Into<String>) -> Self {
        Self::UnknownMediaName { name: name.into() }
    }

    /// Create a load-count underflow error
    pub fn underflow(cookie: Cookie) -> Self {
        Self::LoadCountUnderflow { cookie }
    }

    /// Create a file-state construction error
    pub fn construction(media_id: MediaId, reason: impl Into<String>) -> Self {
        Self::Construction {
            media_id,
            reason: reason.into(),
        }
    }

    /// Create a state-not-found error
    pub fn state_not_found(media_id: MediaId) -> Self {
        Self::StateNotFound { media_id }
    }
}
