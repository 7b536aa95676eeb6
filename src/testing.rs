//! In-memory chat platform for tests

use crate::platform::{
    Community, Directory, Member, MessagingSink, OutgoingMessage, PlatformError, Role,
    RoleMutator,
};
use crate::settings::{GuildSettings, MaxDuration};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub fn member_role() -> RoleId {
    RoleId::new(11)
}

pub fn muted_role() -> RoleId {
    RoleId::new(12)
}

pub fn jail_role() -> RoleId {
    RoleId::new(13)
}

fn guild_roles() -> Vec<Role> {
    [(member_role(), "member"), (muted_role(), "muted"), (jail_role(), "jail")]
        .into_iter()
        .map(|(id, name)| Role {
            id,
            name: name.to_string(),
        })
        .collect()
}

/// Settings using the fake guild's roles; `None` means no duration limit
pub fn defined_settings(max_minutes: Option<f64>) -> GuildSettings {
    GuildSettings {
        jail_role: Some("jail".to_string()),
        save_roles: Some(vec!["muted".to_string()]),
        arrest_attachment: Some("https://example.com/arrest.gif".to_string()),
        release_attachment: Some("https://example.com/release.gif".to_string()),
        max_duration: Some(max_minutes.map_or(MaxDuration::Unbounded, MaxDuration::Minutes)),
    }
}

/// Guilds, members, channels and messages held in memory. Every guild has the
/// member, muted and jail roles.
#[derive(Default)]
pub struct FakePlatform {
    guilds: DashMap<GuildId, Vec<Role>>,
    members: DashMap<(GuildId, UserId), Member>,
    denied: DashSet<(GuildId, UserId)>,
    channels: DashSet<ChannelId>,
    messages: DashSet<(ChannelId, MessageId)>,
    sent: Mutex<Vec<(ChannelId, OutgoingMessage)>>,
    deleted: Mutex<Vec<MessageId>>,
    reactions: Mutex<HashMap<String, u64>>,
    set_roles_calls: AtomicUsize,
    role_change_latency: Mutex<Option<Duration>>,
    next_message: AtomicU64,
}

impl FakePlatform {
    pub fn with_guild(guild: u64) -> Self {
        let platform = Self {
            next_message: AtomicU64::new(10_000),
            ..Self::default()
        };
        platform.add_guild(guild);
        platform
    }

    pub fn add_guild(&self, guild: u64) {
        self.guilds.insert(GuildId::new(guild), guild_roles());
    }

    pub fn community_of(&self, guild: u64) -> Community {
        Community {
            id: GuildId::new(guild),
            name: format!("Guild {guild}"),
        }
    }

    pub fn add_member(&self, guild: u64, user: u64, roles: &[RoleId]) -> Member {
        let member = Member {
            guild_id: GuildId::new(guild),
            user_id: UserId::new(user),
            display_name: format!("Member {user}"),
            roles: roles.to_vec(),
        };
        self.members
            .insert((member.guild_id, member.user_id), member.clone());
        member
    }

    /// The member as the platform sees them now
    pub fn member_now(&self, guild: u64, user: u64) -> Member {
        self.members
            .get(&(GuildId::new(guild), UserId::new(user)))
            .map(|member| member.clone())
            .unwrap()
    }

    pub fn roles_of(&self, guild: u64, user: u64) -> Vec<RoleId> {
        self.member_now(guild, user).roles
    }

    pub fn remove_member(&self, guild: u64, user: u64) {
        self.members.remove(&(GuildId::new(guild), UserId::new(user)));
    }

    pub fn remove_role(&self, guild: u64, role: RoleId) {
        if let Some(mut roles) = self.guilds.get_mut(&GuildId::new(guild)) {
            roles.retain(|r| r.id != role);
        }
    }

    pub fn deny_role_changes(&self, guild: u64, user: u64) {
        self.denied.insert((GuildId::new(guild), UserId::new(user)));
    }

    pub fn allow_role_changes(&self, guild: u64, user: u64) {
        self.denied.remove(&(GuildId::new(guild), UserId::new(user)));
    }

    pub fn add_channel(&self, channel: u64) {
        self.channels.insert(ChannelId::new(channel));
    }

    pub fn add_message(&self, channel: u64, message: u64) {
        self.add_channel(channel);
        self.messages
            .insert((ChannelId::new(channel), MessageId::new(message)));
    }

    /// Every later role change takes `latency` to go through
    pub fn slow_role_changes(&self, latency: Duration) {
        *self.role_change_latency.lock().unwrap() = Some(latency);
    }

    pub fn set_roles_calls(&self) -> usize {
        self.set_roles_calls.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(ChannelId, OutgoingMessage)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<MessageId> {
        self.deleted.lock().unwrap().clone()
    }

    /// Counts reported by every later vote, bot reactions included
    pub fn set_reactions(&self, counts: &[(&str, u64)]) {
        *self.reactions.lock().unwrap() = counts
            .iter()
            .map(|(emoji, count)| ((*emoji).to_string(), *count))
            .collect();
    }
}

#[async_trait]
impl Directory for FakePlatform {
    async fn community(&self, id: GuildId) -> Option<Community> {
        self.guilds
            .contains_key(&id)
            .then(|| self.community_of(id.get()))
    }

    async fn member(&self, community: &Community, id: UserId) -> Option<Member> {
        self.members
            .get(&(community.id, id))
            .map(|member| member.clone())
    }

    async fn role(&self, community: &Community, id: RoleId) -> Option<Role> {
        self.guilds
            .get(&community.id)
            .and_then(|roles| roles.iter().find(|role| role.id == id).cloned())
    }

    async fn roles(&self, community: &Community) -> Vec<Role> {
        self.guilds
            .get(&community.id)
            .map(|roles| roles.clone())
            .unwrap_or_default()
    }

    async fn channel(&self, _community: &Community, id: ChannelId) -> Option<ChannelId> {
        self.channels.contains(&id).then_some(id)
    }

    async fn message(&self, channel: ChannelId, id: MessageId) -> Option<MessageId> {
        self.messages.contains(&(channel, id)).then_some(id)
    }
}

#[async_trait]
impl RoleMutator for FakePlatform {
    async fn set_roles(&self, member: &Member, roles: &[RoleId]) -> Result<(), PlatformError> {
        self.set_roles_calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.role_change_latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let key = (member.guild_id, member.user_id);
        if self.denied.contains(&key) {
            return Err(PlatformError::PermissionDenied);
        }
        match self.members.get_mut(&key) {
            Some(mut current) => {
                current.roles = roles.to_vec();
                Ok(())
            }
            None => Err(PlatformError::Api("Unknown member".to_string())),
        }
    }
}

#[async_trait]
impl MessagingSink for FakePlatform {
    async fn send(
        &self,
        channel: ChannelId,
        message: OutgoingMessage,
    ) -> Result<MessageId, PlatformError> {
        self.sent.lock().unwrap().push((channel, message));
        Ok(MessageId::new(
            self.next_message.fetch_add(1, Ordering::SeqCst),
        ))
    }

    async fn react(
        &self,
        _channel: ChannelId,
        _message: MessageId,
        _emoji: &str,
    ) -> Result<(), PlatformError> {
        Ok(())
    }

    async fn reaction_counts(
        &self,
        _channel: ChannelId,
        _message: MessageId,
    ) -> Result<HashMap<String, u64>, PlatformError> {
        Ok(self.reactions.lock().unwrap().clone())
    }

    async fn delete(&self, _channel: ChannelId, message: MessageId) -> Result<(), PlatformError> {
        self.deleted.lock().unwrap().push(message);
        Ok(())
    }
}
