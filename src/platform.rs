//! Chat platform seam
//!
//! The jail core never talks to Discord directly. It resolves identifiers through a
//! [`Directory`], changes roles through a [`RoleMutator`] and posts through a
//! [`MessagingSink`]. `SerenityPlatform` implements all three for the real bot.

use async_trait::async_trait;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::collections::HashMap;
use thiserror::Error;

/// A resolved community (guild)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Community {
    pub id: GuildId,
    pub name: String,
}

/// A resolved member of a community, with the roles they hold right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub display_name: String,
    pub roles: Vec<RoleId>,
}

/// A resolved role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// A message about to be posted
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OutgoingMessage {
    pub content: String,
    /// Url of an image or file shown with the message
    pub attachment: Option<String>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            attachment: None,
        }
    }

    #[must_use]
    pub fn with_attachment(mut self, attachment: Option<String>) -> Self {
        self.attachment = attachment;
        self
    }
}

/// Errors reported by the chat platform
#[derive(Debug, Error)]
pub enum PlatformError {
    /// The bot lacks the permission for the request
    #[error("Missing permissions")]
    PermissionDenied,

    /// Any other API failure
    #[error("Platform API error: {0}")]
    Api(String),
}

/// Resolves identifiers into live handles. Every lookup answers `None` when the
/// referenced object no longer exists (or cannot be reached).
#[async_trait]
pub trait Directory: Send + Sync {
    async fn community(&self, id: GuildId) -> Option<Community>;

    async fn member(&self, community: &Community, id: UserId) -> Option<Member>;

    async fn role(&self, community: &Community, id: RoleId) -> Option<Role>;

    /// All roles of the community
    async fn roles(&self, community: &Community) -> Vec<Role>;

    async fn channel(&self, community: &Community, id: ChannelId) -> Option<ChannelId>;

    async fn message(&self, channel: ChannelId, id: MessageId) -> Option<MessageId>;
}

/// Replaces a member's role set
#[async_trait]
pub trait RoleMutator: Send + Sync {
    /// # Errors
    /// `PlatformError::PermissionDenied` when the bot may not edit this member.
    async fn set_roles(&self, member: &Member, roles: &[RoleId]) -> Result<(), PlatformError>;
}

/// Posts, reacts to, counts and deletes messages
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingSink: Send + Sync {
    async fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<MessageId, PlatformError>;

    async fn react(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<(), PlatformError>;

    /// Reaction counts keyed by emoji
    async fn reaction_counts(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<HashMap<String, u64>, PlatformError>;

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<(), PlatformError>;
}

/// Everything the jail needs from the chat platform
pub trait Platform: Directory + RoleMutator + MessagingSink {}

impl<T> Platform for T where T: Directory + RoleMutator + MessagingSink {}
