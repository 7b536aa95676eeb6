//! Discord implementation of the platform seam, over serenity's HTTP client

use crate::platform::{
    Community, Directory, Member, MessagingSink, OutgoingMessage, PlatformError, Role,
    RoleMutator,
};
use async_trait::async_trait;
use poise::serenity_prelude::{
    self as serenity, ChannelId, CreateEmbed, CreateMessage, EditMember, GuildId, Http, MessageId,
    ReactionType, RoleId, UserId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

impl From<&serenity::Member> for Member {
    fn from(member: &serenity::Member) -> Self {
        Self {
            guild_id: member.guild_id,
            user_id: member.user.id,
            display_name: member.display_name().to_string(),
            roles: member.roles.clone(),
        }
    }
}

impl From<serenity::Error> for PlatformError {
    fn from(error: serenity::Error) -> Self {
        match &error {
            serenity::Error::Http(http) if http.status_code().map(|s| s.as_u16()) == Some(403) => {
                Self::PermissionDenied
            }
            serenity::Error::Model(serenity::ModelError::InvalidPermissions { .. }) => {
                Self::PermissionDenied
            }
            _ => Self::Api(error.to_string()),
        }
    }
}

/// Talks to Discord through a shared HTTP client
#[derive(Clone)]
pub struct SerenityPlatform {
    http: Arc<Http>,
}

impl SerenityPlatform {
    #[must_use]
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Directory for SerenityPlatform {
    async fn community(&self, id: GuildId) -> Option<Community> {
        match id.to_partial_guild(&self.http).await {
            Ok(guild) => Some(Community {
                id: guild.id,
                name: guild.name,
            }),
            Err(e) => {
                debug!(guild_id = %id, error = %e, "Guild lookup failed");
                None
            }
        }
    }

    async fn member(&self, community: &Community, id: UserId) -> Option<Member> {
        match community.id.member(&self.http, id).await {
            Ok(member) => Some(Member::from(&member)),
            Err(e) => {
                debug!(guild_id = %community.id, user_id = %id, error = %e, "Member lookup failed");
                None
            }
        }
    }

    async fn role(&self, community: &Community, id: RoleId) -> Option<Role> {
        self.roles(community)
            .await
            .into_iter()
            .find(|role| role.id == id)
    }

    async fn roles(&self, community: &Community) -> Vec<Role> {
        match community.id.roles(&self.http).await {
            Ok(roles) => roles
                .into_values()
                .map(|role| Role {
                    id: role.id,
                    name: role.name,
                })
                .collect(),
            Err(e) => {
                debug!(guild_id = %community.id, error = %e, "Role lookup failed");
                Vec::new()
            }
        }
    }

    async fn channel(&self, community: &Community, id: ChannelId) -> Option<ChannelId> {
        let channel = id.to_channel(&self.http).await.ok()?.guild()?;
        (channel.guild_id == community.id).then_some(channel.id)
    }

    async fn message(&self, channel: ChannelId, id: MessageId) -> Option<MessageId> {
        channel
            .message(&self.http, id)
            .await
            .ok()
            .map(|message| message.id)
    }
}

#[async_trait]
impl RoleMutator for SerenityPlatform {
    async fn set_roles(&self, member: &Member, roles: &[RoleId]) -> Result<(), PlatformError> {
        member
            .guild_id
            .edit_member(
                &self.http,
                member.user_id,
                EditMember::new().roles(roles.iter().copied()),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MessagingSink for SerenityPlatform {
    async fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<MessageId, PlatformError> {
        let mut builder = CreateMessage::new().content(message.content);
        if let Some(url) = message.attachment {
            builder = builder.embed(CreateEmbed::new().image(url));
        }
        let sent = channel.send_message(&self.http, builder).await?;
        Ok(sent.id)
    }

    async fn react(
        &self,
        channel: ChannelId,
        message: MessageId,
        emoji: &str,
    ) -> Result<(), PlatformError> {
        channel
            .create_reaction(&self.http, message, ReactionType::Unicode(emoji.to_string()))
            .await?;
        Ok(())
    }

    async fn reaction_counts(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<HashMap<String, u64>, PlatformError> {
        let message = channel.message(&self.http, message).await?;
        Ok(message
            .reactions
            .into_iter()
            .map(|reaction| (reaction.reaction_type.to_string(), reaction.count))
            .collect())
    }

    async fn delete(&self, channel: ChannelId, message: MessageId) -> Result<(), PlatformError> {
        channel.delete_message(&self.http, message).await?;
        Ok(())
    }
}
