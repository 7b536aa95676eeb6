//! The jail registry
//!
//! Single authority over who is currently jailed. Every mutation of a key happens
//! under that key's async lock, and nothing runs before crash recovery has finished.

use crate::JAIL_TARGET;
use crate::jail::error::{JailError, JailResult};
use crate::jail::record::{
    ReplyTarget, RestrictionKey, RestrictionRecord, RestrictionSnapshot, dedup_roles,
    restricted_role_set,
};
use crate::jail::timer::ReleaseTimer;
use crate::jail::vote::VoteGate;
use crate::platform::{Community, Member, OutgoingMessage, Platform, PlatformError};
use crate::settings::{DefinedSettings, GuildSettings};
use crate::storage::DurableStore;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use poise::serenity_prelude::GuildId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, watch};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Registry lifecycle. Requests are only served once `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Recovering,
    Ready,
}

/// What an arrest did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrestOutcome {
    Jailed { fire_time: Option<DateTime<Utc>> },
    VoteFailed,
}

/// What a release did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// Nobody to release; nothing was sent
    NotRestricted,
    VoteFailed,
}

/// Clonable handle to the registry
#[derive(Clone)]
pub struct JailRegistry(Arc<RegistryInner>);

pub(super) struct RegistryInner {
    pub(super) platform: Arc<dyn Platform>,
    pub(super) store: Arc<dyn DurableStore>,
    pub(super) records: DashMap<RestrictionKey, RestrictionRecord>,
    locks: DashMap<RestrictionKey, Arc<Mutex<()>>>,
    pub(super) lifecycle: watch::Sender<Lifecycle>,
    vote: VoteGate,
}

impl std::fmt::Debug for JailRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JailRegistry")
            .field("records", &self.0.records.len())
            .field("lifecycle", &self.lifecycle())
            .field("vote", &self.0.vote)
            .finish()
    }
}

impl JailRegistry {
    /// Create an empty registry. Call [`JailRegistry::rebuild`] before use.
    pub fn new(platform: Arc<dyn Platform>, store: Arc<dyn DurableStore>, vote: VoteGate) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Uninitialized);
        Self(Arc::new(RegistryInner {
            platform,
            store,
            records: DashMap::new(),
            locks: DashMap::new(),
            lifecycle,
            vote,
        }))
    }

    pub(super) fn inner(&self) -> &RegistryInner {
        &self.0
    }

    #[must_use]
    pub fn platform(&self) -> Arc<dyn Platform> {
        Arc::clone(&self.0.platform)
    }

    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        *self.0.lifecycle.borrow()
    }

    /// Wait until crash recovery has finished
    pub async fn wait_ready(&self) {
        let mut rx = self.0.lifecycle.subscribe();
        // the sender lives as long as the registry, so this only ends when ready
        let _ = rx.wait_for(|state| *state == Lifecycle::Ready).await;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.records.is_empty()
    }

    #[must_use]
    pub fn snapshot(&self, key: &RestrictionKey) -> Option<RestrictionSnapshot> {
        self.0.records.get(key).map(|record| record.snapshot())
    }

    /// Everyone currently jailed in a guild
    #[must_use]
    pub fn active_in(&self, guild_id: GuildId) -> Vec<RestrictionSnapshot> {
        let mut active: Vec<_> = self
            .0
            .records
            .iter()
            .filter(|entry| entry.key().guild_id == guild_id)
            .map(|entry| entry.value().snapshot())
            .collect();
        active.sort_by(|a, b| a.member.display_name.cmp(&b.member.display_name));
        active
    }

    fn key_lock(&self, key: RestrictionKey) -> KeyLock<'_> {
        KeyLock {
            locks: &self.0.locks,
            key,
            lock: Arc::clone(self.0.locks.entry(key).or_default().value()),
        }
    }

    /// Jail `member`.
    ///
    /// # Errors
    /// Configuration errors for undefined settings or a missing jail role, usage errors
    /// for a bad duration, permission errors when roles cannot be changed. Nothing is
    /// recorded on error.
    pub async fn arrest(
        &self,
        member: &Member,
        community: &Community,
        reply: ReplyTarget,
        settings: &GuildSettings,
        requested_minutes: Option<f64>,
        require_vote: bool,
    ) -> JailResult<ArrestOutcome> {
        self.wait_ready().await;

        let config = settings.defined().ok_or_else(|| {
            JailError::Configuration(
                "This server has not been set up yet. An admin needs to run `init` first."
                    .to_string(),
            )
        })?;

        let guild_roles = self.0.platform.roles(community).await;
        let jail_role = guild_roles
            .iter()
            .find(|role| role.name == config.jail_role)
            .map(|role| role.id)
            .ok_or_else(|| {
                JailError::Configuration(format!(
                    "I can't find the {} role. Check your configuration.",
                    config.jail_role
                ))
            })?;

        let delay = config.max_duration.check(requested_minutes)?;

        if require_vote {
            let prompt = format!(
                "A vote to condemn {} has started. You have {} to react to this message to vote.",
                member.display_name,
                self.0.vote.describe_window()
            );
            let outcome = self
                .0
                .vote
                .run(self.0.platform.as_ref(), reply.channel_id, prompt)
                .await?;
            if !outcome.passed() {
                self.announce(
                    reply,
                    OutgoingMessage::text(format!(
                        "Vote has failed. {} will not be sent to {}",
                        member.display_name, config.jail_role
                    )),
                )
                .await;
                return Ok(ArrestOutcome::VoteFailed);
            }
        }

        let key = RestrictionKey::of(member);
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        // a repeat arrest keeps the roles saved the first time
        let restate_roles = self
            .0
            .records
            .get(&key)
            .map_or_else(|| member.roles.clone(), |record| record.restate_roles.clone());

        // taken after the vote so the window does not eat into the sentence
        let fire_time = delay.map(fire_time_after).transpose()?;
        let jailed_roles =
            restricted_role_set(&member.roles, &guild_roles, &config.save_roles, jail_role);
        self.0
            .platform
            .set_roles(member, &jailed_roles)
            .await
            .map_err(|e| match e {
                PlatformError::PermissionDenied => JailError::Permission(format!(
                    "I don't have the right permissions to condemn {}",
                    member.display_name
                )),
                other => JailError::Platform(other),
            })?;

        let timer = delay.map(|delay| self.arm(key, delay));
        let record = RestrictionRecord {
            member: member.clone(),
            restate_roles: dedup_roles(restate_roles),
            config: config.clone(),
            reply,
            fire_time,
            timer,
        };
        if let Some(previous) = self.0.records.insert(key, record) {
            if let Some(timer) = previous.timer {
                timer.cancel();
            }
        }

        info!(
            target: JAIL_TARGET,
            guild_id = %key.guild_id,
            user_id = %key.user_id,
            fire_time = ?fire_time,
            event = "arrest",
            "Member jailed"
        );

        let mut text = format!(
            "{} has been condemned to {}",
            member.display_name, config.jail_role
        );
        if let Some(minutes) = requested_minutes {
            text.push_str(&format!(
                " for {minutes} minute{}",
                if minutes > 1.0 { "s" } else { "" }
            ));
        }
        self.announce(
            reply,
            OutgoingMessage::text(text).with_attachment(config.arrest_attachment.clone()),
        )
        .await;

        Ok(ArrestOutcome::Jailed { fire_time })
    }

    /// Release `member`. A member who is not jailed is silently ignored.
    ///
    /// # Errors
    /// Permission errors when roles cannot be restored; the restriction stays in place
    /// so the release can be retried.
    pub async fn release(
        &self,
        member: &Member,
        reply: ReplyTarget,
        settings: &GuildSettings,
        require_vote: bool,
    ) -> JailResult<ReleaseOutcome> {
        self.wait_ready().await;

        let key = RestrictionKey::of(member);
        let Some(snapshot) = self.snapshot(&key) else {
            return Ok(ReleaseOutcome::NotRestricted);
        };
        let config = settings.defined().unwrap_or(snapshot.config);

        if require_vote {
            let prompt = format!(
                "Shall {} be released from {}? You have {} to react to this message to vote.",
                member.display_name,
                config.jail_role,
                self.0.vote.describe_window()
            );
            let outcome = self
                .0
                .vote
                .run(self.0.platform.as_ref(), reply.channel_id, prompt)
                .await?;
            if !outcome.passed() {
                self.announce(
                    reply,
                    OutgoingMessage::text(format!(
                        "Vote has failed. {} will not be released from {}",
                        member.display_name, config.jail_role
                    )),
                )
                .await;
                return Ok(ReleaseOutcome::VoteFailed);
            }
        }

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.release_locked(key, member, reply, &config, None).await
    }

    /// Restore roles and drop the record. Caller holds the key lock.
    ///
    /// `fired_by` is the id of the timer doing the release, if any. A timer only
    /// releases the record it was armed for.
    async fn release_locked(
        &self,
        key: RestrictionKey,
        member: &Member,
        reply: ReplyTarget,
        config: &DefinedSettings,
        fired_by: Option<Uuid>,
    ) -> JailResult<ReleaseOutcome> {
        let restate_roles = match self.0.records.get(&key) {
            Some(record) if fired_by.is_none() || record.timer_id() == fired_by => {
                record.restate_roles.clone()
            }
            _ => return Ok(ReleaseOutcome::NotRestricted),
        };

        self.0
            .platform
            .set_roles(member, &restate_roles)
            .await
            .map_err(|e| match e {
                PlatformError::PermissionDenied => JailError::Permission(format!(
                    "I don't have the right permissions to release {}",
                    member.display_name
                )),
                other => JailError::Platform(other),
            })?;

        if let Some((_, record)) = self.0.records.remove(&key) {
            if let Some(timer) = record.timer {
                if fired_by == Some(timer.id()) {
                    timer.detach();
                } else {
                    timer.cancel();
                }
            }
        }

        info!(
            target: JAIL_TARGET,
            guild_id = %key.guild_id,
            user_id = %key.user_id,
            timed = fired_by.is_some(),
            event = "release",
            "Member released"
        );

        self.announce(
            reply,
            OutgoingMessage::text(format!(
                "{} has been released from {}. I hope you have learned something...",
                member.display_name, config.jail_role
            ))
            .with_attachment(config.release_attachment.clone()),
        )
        .await;

        Ok(ReleaseOutcome::Released)
    }

    /// Schedule the automatic release of `key`
    pub(super) fn arm(&self, key: RestrictionKey, delay: Duration) -> ReleaseTimer {
        let registry = self.clone();
        ReleaseTimer::schedule(delay, move |timer_id| async move {
            registry.release_fired(key, timer_id).await;
        })
    }

    /// Release triggered by a timer, reported in the channel of the original arrest
    async fn release_fired(&self, key: RestrictionKey, timer_id: Uuid) {
        self.wait_ready().await;

        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let Some(snapshot) = self.snapshot(&key) else {
            return;
        };
        let result = self
            .release_locked(
                key,
                &snapshot.member,
                snapshot.reply,
                &snapshot.config,
                Some(timer_id),
            )
            .await;

        if let Err(e) = result {
            error!(
                target: JAIL_TARGET,
                guild_id = %key.guild_id,
                user_id = %key.user_id,
                error = %e,
                "Timed release failed"
            );
            if e.is_user_facing() {
                self.announce(snapshot.reply, OutgoingMessage::text(e.to_string()))
                    .await;
            }
        }
    }

    /// Post a status message; failures are logged only
    async fn announce(&self, reply: ReplyTarget, message: OutgoingMessage) {
        if let Err(e) = self.0.platform.send(reply.channel_id, message).await {
            warn!(
                target: JAIL_TARGET,
                channel_id = %reply.channel_id,
                error = %e,
                "Failed to post status message"
            );
        }
    }
}

/// Handle on one key's lock. The last handle to go forgets the lock, so only keys
/// with a request in flight keep an entry.
struct KeyLock<'a> {
    locks: &'a DashMap<RestrictionKey, Arc<Mutex<()>>>,
    key: RestrictionKey,
    lock: Arc<Mutex<()>>,
}

impl KeyLock<'_> {
    async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for KeyLock<'_> {
    fn drop(&mut self) {
        // two handles left: the map's and this one
        self.locks.remove_if(&self.key, |_, held| {
            Arc::ptr_eq(held, &self.lock) && Arc::strong_count(held) <= 2
        });
    }
}

fn fire_time_after(delay: Duration) -> JailResult<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| Utc::now().checked_add_signed(delay))
        .ok_or_else(|| JailError::Usage("That duration is too long.".to_string()))
}
