//! Error types for the jail
//!
//! `Configuration`, `Permission` and `Usage` errors are meant for the person who ran the
//! command. Platform and storage failures are operational and get logged.

use crate::platform::PlatformError;
use crate::settings::DurationRejection;
use crate::storage::StorageError;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, UserId};
use thiserror::Error;

/// Errors that can occur while arresting or releasing a member
#[derive(Debug, Error)]
pub enum JailError {
    /// Guild settings are missing or point at something that does not exist
    #[error("{0}")]
    Configuration(String),

    /// The bot may not change the member's roles
    #[error("{0}")]
    Permission(String),

    /// The request itself was malformed
    #[error("{0}")]
    Usage(String),

    /// Chat platform failure
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// Durable storage failure
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl JailError {
    /// Whether the error should be shown to the requester instead of logged as a fault
    #[must_use]
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Permission(_) | Self::Usage(_)
        )
    }
}

impl From<DurationRejection> for JailError {
    fn from(rejection: DurationRejection) -> Self {
        Self::Usage(rejection.to_string())
    }
}

/// Reasons a persisted restriction could not be brought back
#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("Malformed record: {0}")]
    Malformed(String),

    #[error("Unreadable record: {0}")]
    Unreadable(String),

    #[error("Guild {0} is gone")]
    CommunityGone(GuildId),

    #[error("Member {user_id} left guild {guild_id}")]
    MemberGone { guild_id: GuildId, user_id: UserId },

    #[error("Channel {0} was deleted")]
    ChannelGone(ChannelId),

    #[error("Message {0} was deleted")]
    MessageGone(MessageId),
}

/// Result type for jail operations
pub type JailResult<T> = Result<T, JailError>;
