//! Restriction records
//!
//! A [`RestrictionRecord`] is the live form of a restriction and owns its release
//! timer. A [`SerializedRestriction`] is the at-rest form: ids only, safe to write to
//! disk and to resolve again after a restart.

use crate::jail::timer::ReleaseTimer;
use crate::platform::{Member, Role};
use crate::settings::DefinedSettings;
use chrono::{DateTime, Utc};
use derive_more::Display;
use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serde::{Deserialize, Serialize};

/// Identifies at most one active restriction
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash)]
#[display("{guild_id}-{user_id}")]
pub struct RestrictionKey {
    pub guild_id: GuildId,
    pub user_id: UserId,
}

impl RestrictionKey {
    #[must_use]
    pub fn new(guild_id: GuildId, user_id: UserId) -> Self {
        Self { guild_id, user_id }
    }

    #[must_use]
    pub fn of(member: &Member) -> Self {
        Self::new(member.guild_id, member.user_id)
    }

    /// Key used in durable storage
    #[must_use]
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

/// Where status messages about a restriction go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplyTarget {
    pub channel_id: ChannelId,
    /// The message that asked for the restriction
    pub message_id: MessageId,
}

impl ReplyTarget {
    #[must_use]
    pub fn new(channel_id: ChannelId, message_id: MessageId) -> Self {
        Self {
            channel_id,
            message_id,
        }
    }
}

/// A live restriction
#[derive(Debug)]
pub struct RestrictionRecord {
    pub member: Member,
    /// Roles handed back on release, in order, without duplicates
    pub restate_roles: Vec<RoleId>,
    /// Settings in effect when the member was jailed
    pub config: DefinedSettings,
    pub reply: ReplyTarget,
    /// When the member is released automatically; `None` means never
    pub fire_time: Option<DateTime<Utc>>,
    pub timer: Option<ReleaseTimer>,
}

impl RestrictionRecord {
    #[must_use]
    pub fn key(&self) -> RestrictionKey {
        RestrictionKey::of(&self.member)
    }

    #[must_use]
    pub fn timer_id(&self) -> Option<uuid::Uuid> {
        self.timer.as_ref().map(ReleaseTimer::id)
    }

    #[must_use]
    pub fn to_serialized(&self) -> SerializedRestriction {
        SerializedRestriction {
            community_id: self.member.guild_id,
            member_id: self.member.user_id,
            role_ids: self.restate_roles.clone(),
            fire_time: self.fire_time.map(|time| time.timestamp_millis()),
            channel_id: self.reply.channel_id,
            message_id: self.reply.message_id,
            config: self.config.clone(),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> RestrictionSnapshot {
        RestrictionSnapshot {
            member: self.member.clone(),
            restate_roles: self.restate_roles.clone(),
            config: self.config.clone(),
            reply: self.reply,
            fire_time: self.fire_time,
            timer_armed: self.timer.is_some(),
        }
    }
}

/// Read-only copy of a record, without the timer
#[derive(Debug, Clone, PartialEq)]
pub struct RestrictionSnapshot {
    pub member: Member,
    pub restate_roles: Vec<RoleId>,
    pub config: DefinedSettings,
    pub reply: ReplyTarget,
    pub fire_time: Option<DateTime<Utc>>,
    pub timer_armed: bool,
}

/// At-rest form of a restriction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SerializedRestriction {
    pub community_id: GuildId,
    pub member_id: UserId,
    pub role_ids: Vec<RoleId>,
    /// Milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fire_time: Option<i64>,
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub config: DefinedSettings,
}

impl SerializedRestriction {
    #[must_use]
    pub fn key(&self) -> RestrictionKey {
        RestrictionKey::new(self.community_id, self.member_id)
    }

    #[must_use]
    pub fn fire_time(&self) -> Option<DateTime<Utc>> {
        self.fire_time.and_then(DateTime::from_timestamp_millis)
    }
}

/// Roles a member holds while jailed: the saved roles they already have, then the
/// jail role.
#[must_use]
pub fn restricted_role_set(
    current: &[RoleId],
    guild_roles: &[Role],
    save_roles: &[String],
    jail_role: RoleId,
) -> Vec<RoleId> {
    let kept = current.iter().copied().filter(|id| {
        guild_roles
            .iter()
            .any(|role| role.id == *id && save_roles.contains(&role.name))
    });
    dedup_roles(kept.chain(std::iter::once(jail_role)))
}

/// Remove duplicates, keeping first occurrences in order
pub fn dedup_roles(roles: impl IntoIterator<Item = RoleId>) -> Vec<RoleId> {
    let mut unique = Vec::new();
    for role in roles {
        if !unique.contains(&role) {
            unique.push(role);
        }
    }
    unique
}
