//! Flushing restrictions to durable storage and bringing them back on startup
//!
//! The store is a crash-recovery log: written once at shutdown, read once at startup,
//! then cleared.

use crate::JAIL_TARGET;
use crate::jail::error::{JailResult, RecoveryError};
use crate::jail::record::{
    ReplyTarget, RestrictionKey, RestrictionRecord, SerializedRestriction, dedup_roles,
};
use crate::jail::registry::{JailRegistry, Lifecycle};
use crate::platform::Directory;
use chrono::Utc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Summary of a rebuild
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// Records back in memory
    pub restored: usize,
    /// Records dropped as malformed or unresolvable
    pub discarded: usize,
    /// Restored records whose release time passed while the bot was down
    pub overdue: usize,
}

/// Turn a stored restriction back into a live one, without a timer
///
/// # Errors
/// Returns the first reference that no longer resolves.
pub async fn resolve<D>(
    directory: &D,
    stored: SerializedRestriction,
) -> Result<RestrictionRecord, RecoveryError>
where
    D: Directory + ?Sized,
{
    let community = directory
        .community(stored.community_id)
        .await
        .ok_or(RecoveryError::CommunityGone(stored.community_id))?;
    let member = directory
        .member(&community, stored.member_id)
        .await
        .ok_or(RecoveryError::MemberGone {
            guild_id: stored.community_id,
            user_id: stored.member_id,
        })?;
    let channel_id = directory
        .channel(&community, stored.channel_id)
        .await
        .ok_or(RecoveryError::ChannelGone(stored.channel_id))?;
    let message_id = directory
        .message(channel_id, stored.message_id)
        .await
        .ok_or(RecoveryError::MessageGone(stored.message_id))?;

    let mut restate_roles = Vec::with_capacity(stored.role_ids.len());
    for role_id in &stored.role_ids {
        match directory.role(&community, *role_id).await {
            Some(role) => restate_roles.push(role.id),
            None => warn!(
                target: JAIL_TARGET,
                guild_id = %community.id,
                user_id = %member.user_id,
                role_id = %role_id,
                "Dropping deleted role from restore set"
            ),
        }
    }

    let fire_time = stored.fire_time();
    if stored.fire_time.is_some() && fire_time.is_none() {
        return Err(RecoveryError::Malformed(format!(
            "fire time {:?} is out of range",
            stored.fire_time
        )));
    }

    Ok(RestrictionRecord {
        member,
        restate_roles: dedup_roles(restate_roles),
        config: stored.config,
        reply: ReplyTarget::new(channel_id, message_id),
        fire_time,
        timer: None,
    })
}

impl JailRegistry {
    /// Write every active restriction to durable storage
    ///
    /// Returns the number of records written.
    ///
    /// # Errors
    /// Returns the first storage error; records written before it stay written.
    pub async fn flush(&self) -> JailResult<usize> {
        let inner = self.inner();
        let serialized: Vec<(RestrictionKey, SerializedRestriction)> = inner
            .records
            .iter()
            .map(|entry| (*entry.key(), entry.value().to_serialized()))
            .collect();

        for (key, record) in &serialized {
            let yaml = serde_yaml::to_string(record).map_err(crate::storage::StorageError::from)?;
            inner.store.set_item(&key.storage_key(), yaml).await?;
        }

        info!(
            target: JAIL_TARGET,
            count = serialized.len(),
            "Flushed active restrictions"
        );
        Ok(serialized.len())
    }

    /// Load restrictions saved by [`JailRegistry::flush`], re-arm their timers, clear
    /// the store and open the registry for requests.
    ///
    /// Runs once; later calls are ignored. The registry ends up ready even when storage
    /// fails, so the bot keeps working without the lost restrictions.
    ///
    /// # Errors
    /// Returns an error if the store could not be read.
    pub async fn rebuild(&self) -> JailResult<RebuildReport> {
        let inner = self.inner();
        let started = inner.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Uninitialized {
                *state = Lifecycle::Recovering;
                true
            } else {
                false
            }
        });
        if !started {
            warn!(target: JAIL_TARGET, "Rebuild requested twice; ignoring");
            return Ok(RebuildReport::default());
        }

        let entries = match inner.store.list_all().await {
            Ok(entries) => entries,
            Err(e) => {
                error!(target: JAIL_TARGET, error = %e, "Failed to read saved restrictions");
                // whatever is left must not come back on the next start
                if let Err(e) = inner.store.clear().await {
                    error!(target: JAIL_TARGET, error = %e, "Failed to clear saved restrictions");
                }
                inner.lifecycle.send_replace(Lifecycle::Ready);
                return Err(e.into());
            }
        };

        let mut report = RebuildReport::default();
        let now = Utc::now();
        for (storage_key, raw) in entries {
            let record = match raw.map(|raw| serde_yaml::from_str::<SerializedRestriction>(&raw)) {
                Ok(Ok(stored)) => resolve(inner.platform.as_ref(), stored).await,
                Ok(Err(e)) => Err(RecoveryError::Malformed(e.to_string())),
                Err(e) => Err(RecoveryError::Unreadable(e.to_string())),
            };
            let mut record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        target: JAIL_TARGET,
                        storage_key = %storage_key,
                        reason = %e,
                        "Discarding saved restriction"
                    );
                    report.discarded += 1;
                    continue;
                }
            };

            let key = record.key();
            if let Some(fire_time) = record.fire_time {
                let remaining = (fire_time - now).to_std().unwrap_or(Duration::ZERO);
                if remaining.is_zero() {
                    report.overdue += 1;
                }
                record.timer = Some(self.arm(key, remaining));
            }

            info!(
                target: JAIL_TARGET,
                guild_id = %key.guild_id,
                user_id = %key.user_id,
                fire_time = ?record.fire_time,
                "Restored restriction"
            );
            if let Some(previous) = inner.records.insert(key, record) {
                if let Some(timer) = previous.timer {
                    timer.cancel();
                }
            }
            report.restored += 1;
        }

        if let Err(e) = inner.store.clear().await {
            error!(target: JAIL_TARGET, error = %e, "Failed to clear saved restrictions");
        }
        inner.lifecycle.send_replace(Lifecycle::Ready);

        info!(
            target: JAIL_TARGET,
            restored = report.restored,
            discarded = report.discarded,
            overdue = report.overdue,
            "Restriction recovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jail::vote::VoteGate;
    use crate::settings::{DefinedSettings, MaxDuration};
    use crate::storage::{DurableStore, FileStore, MemoryStore, StorageError, StoredEntry};
    use async_trait::async_trait;
    use crate::testing::{FakePlatform, defined_settings, jail_role, member_role, muted_role};
    use poise::serenity_prelude::{ChannelId, GuildId, MessageId, RoleId, UserId};
    use std::sync::Arc;

    const GUILD: u64 = 100;
    const CHANNEL: u64 = 500;
    const MESSAGE: u64 = 900;

    fn config() -> DefinedSettings {
        defined_settings(Some(60.0)).defined().unwrap()
    }

    fn stored(user: u64, roles: &[RoleId], fire_in: Option<chrono::Duration>) -> SerializedRestriction {
        SerializedRestriction {
            community_id: GuildId::new(GUILD),
            member_id: UserId::new(user),
            role_ids: roles.to_vec(),
            fire_time: fire_in.map(|offset| (Utc::now() + offset).timestamp_millis()),
            channel_id: ChannelId::new(CHANNEL),
            message_id: MessageId::new(MESSAGE),
            config: config(),
        }
    }

    async fn persist(store: &MemoryStore, record: &SerializedRestriction) {
        store
            .set_item(
                &record.key().storage_key(),
                serde_yaml::to_string(record).unwrap(),
            )
            .await
            .unwrap();
    }

    fn key(user: u64) -> RestrictionKey {
        RestrictionKey::new(GuildId::new(GUILD), UserId::new(user))
    }

    fn platform() -> Arc<FakePlatform> {
        let platform = Arc::new(FakePlatform::with_guild(GUILD));
        platform.add_message(CHANNEL, MESSAGE);
        platform
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_skips_departed_member() {
        let platform = platform();
        platform.add_member(GUILD, 1, &[jail_role()]);
        platform.add_member(GUILD, 2, &[jail_role()]);
        platform.add_member(GUILD, 3, &[jail_role()]);
        platform.remove_member(GUILD, 3);
        let store = Arc::new(MemoryStore::new());
        persist(&store, &stored(1, &[member_role()], Some(chrono::Duration::minutes(10)))).await;
        persist(&store, &stored(2, &[muted_role()], Some(chrono::Duration::minutes(20)))).await;
        persist(&store, &stored(3, &[member_role()], Some(chrono::Duration::minutes(5)))).await;

        let registry = JailRegistry::new(platform.clone(), store.clone(), VoteGate::default());
        let report = registry.rebuild().await.unwrap();

        assert_eq!(
            report,
            RebuildReport {
                restored: 2,
                discarded: 1,
                overdue: 0
            }
        );
        assert_eq!(registry.len(), 2);
        assert!(store.is_empty());
        assert_eq!(registry.lifecycle(), Lifecycle::Ready);

        let first = registry.snapshot(&key(1)).unwrap();
        assert!(first.timer_armed);
        assert_eq!(first.restate_roles, vec![member_role()]);
        assert_eq!(first.reply, ReplyTarget::new(ChannelId::new(CHANNEL), MessageId::new(MESSAGE)));
        assert!(registry.snapshot(&key(2)).unwrap().timer_armed);
        assert!(registry.snapshot(&key(3)).is_none());

        // re-armed timers still fire
        tokio::time::sleep(Duration::from_secs(11 * 60)).await;
        assert!(registry.snapshot(&key(1)).is_none());
        assert_eq!(platform.roles_of(GUILD, 1), vec![member_role()]);
        assert!(registry.snapshot(&key(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_releases_overdue_immediately() {
        let platform = platform();
        platform.add_member(GUILD, 1, &[jail_role()]);
        let store = Arc::new(MemoryStore::new());
        persist(&store, &stored(1, &[member_role(), muted_role()], Some(chrono::Duration::minutes(-3)))).await;

        let registry = JailRegistry::new(platform.clone(), store, VoteGate::default());
        let report = registry.rebuild().await.unwrap();
        assert_eq!(report.overdue, 1);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.is_empty());
        assert_eq!(
            platform.roles_of(GUILD, 1),
            vec![member_role(), muted_role()]
        );
        let sent = platform.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, ChannelId::new(CHANNEL));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_drops_deleted_roles_and_garbage() {
        let platform = platform();
        platform.add_member(GUILD, 1, &[jail_role()]);
        let store = Arc::new(MemoryStore::new());
        persist(&store, &stored(1, &[member_role(), muted_role()], None)).await;
        platform.remove_role(GUILD, muted_role());
        store
            .set_item("not-a-record", "communityId: [oops".to_string())
            .await
            .unwrap();

        let registry = JailRegistry::new(platform.clone(), store.clone(), VoteGate::default());
        let report = registry.rebuild().await.unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.discarded, 1);
        let snapshot = registry.snapshot(&key(1)).unwrap();
        assert_eq!(snapshot.restate_roles, vec![member_role()]);
        assert!(!snapshot.timer_armed);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_discards_deleted_channel_or_message() {
        let platform = platform();
        platform.add_member(GUILD, 1, &[jail_role()]);
        platform.add_member(GUILD, 2, &[jail_role()]);
        let store = Arc::new(MemoryStore::new());

        let mut wrong_channel = stored(1, &[member_role()], None);
        wrong_channel.channel_id = ChannelId::new(501);
        persist(&store, &wrong_channel).await;
        let mut wrong_message = stored(2, &[member_role()], None);
        wrong_message.message_id = MessageId::new(901);
        persist(&store, &wrong_message).await;

        let registry = JailRegistry::new(platform, store, VoteGate::default());
        let report = registry.rebuild().await.unwrap();
        assert_eq!(report.restored, 0);
        assert_eq!(report.discarded, 2);
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_then_rebuild_reproduces_state() {
        let platform = platform();
        let timed = platform.add_member(GUILD, 1, &[member_role(), muted_role()]);
        let indefinite = platform.add_member(GUILD, 2, &[member_role()]);
        let store = Arc::new(MemoryStore::new());

        let before = JailRegistry::new(platform.clone(), store.clone(), VoteGate::default());
        before.rebuild().await.unwrap();
        let community = platform.community_of(GUILD);
        let reply = ReplyTarget::new(ChannelId::new(CHANNEL), MessageId::new(MESSAGE));
        let settings = crate::settings::GuildSettings::from(DefinedSettings {
            max_duration: MaxDuration::Unbounded,
            ..config()
        });
        before
            .arrest(&timed, &community, reply, &settings, Some(30.0), false)
            .await
            .unwrap();
        before
            .arrest(&indefinite, &community, reply, &settings, None, false)
            .await
            .unwrap();

        assert_eq!(before.flush().await.unwrap(), 2);
        assert_eq!(store.len(), 2);

        let after = JailRegistry::new(platform.clone(), store.clone(), VoteGate::default());
        let report = after.rebuild().await.unwrap();
        assert_eq!(report.restored, 2);
        assert!(store.is_empty());

        for user in [1, 2] {
            let old = before.snapshot(&key(user)).unwrap();
            let new = after.snapshot(&key(user)).unwrap();
            assert_eq!(old.restate_roles, new.restate_roles);
            assert_eq!(old.config, new.config);
            assert_eq!(old.reply, new.reply);
            assert_eq!(old.timer_armed, new.timer_armed);
            match (old.fire_time, new.fire_time) {
                (Some(a), Some(b)) => assert!((a - b).num_milliseconds().abs() <= 1),
                (None, None) => {}
                other => panic!("fire times differ: {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rebuild_runs_once() {
        let platform = platform();
        platform.add_member(GUILD, 1, &[jail_role()]);
        let store = Arc::new(MemoryStore::new());
        let registry = JailRegistry::new(platform, store.clone(), VoteGate::default());
        registry.rebuild().await.unwrap();

        persist(&store, &stored(1, &[member_role()], None)).await;
        let report = registry.rebuild().await.unwrap();
        assert_eq!(report, RebuildReport::default());
        assert!(registry.is_empty());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_rebuild_survives_unreadable_entry() {
        let platform = platform();
        platform.add_member(GUILD, 1, &[jail_role()]);
        let store = Arc::new(FileStore::new(
            std::env::temp_dir().join(format!("condemner-test-{}", uuid::Uuid::new_v4())),
        ));
        let good = stored(1, &[member_role()], None);
        store
            .set_item(&good.key().storage_key(), serde_yaml::to_string(&good).unwrap())
            .await
            .unwrap();
        tokio::fs::write(store.dir().join("100-2.yaml"), [0xff, 0xfe, 0x00])
            .await
            .unwrap();

        let registry = JailRegistry::new(platform, store.clone(), VoteGate::default());
        let report = registry.rebuild().await.unwrap();

        assert_eq!(report.restored, 1);
        assert_eq!(report.discarded, 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.snapshot(&key(1)).is_some());
        assert!(store.list_all().await.unwrap().is_empty());

        tokio::fs::remove_dir_all(store.dir()).await.unwrap();
    }

    /// Holds entries but cannot list them
    #[derive(Default)]
    struct UnlistableStore(MemoryStore);

    #[async_trait]
    impl DurableStore for UnlistableStore {
        async fn set_item(&self, key: &str, value: String) -> Result<(), StorageError> {
            self.0.set_item(key, value).await
        }

        async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.0.get_item(key).await
        }

        async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.0.remove_item(key).await
        }

        async fn list_all(&self) -> Result<Vec<StoredEntry>, StorageError> {
            Err(StorageError::InvalidKey("*".to_string()))
        }

        async fn clear(&self) -> Result<(), StorageError> {
            self.0.clear().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_listing_still_clears_store() {
        let store = Arc::new(UnlistableStore::default());
        store
            .set_item("100-1", serde_yaml::to_string(&stored(1, &[member_role()], None)).unwrap())
            .await
            .unwrap();

        let registry = JailRegistry::new(platform(), store.clone(), VoteGate::default());
        assert!(matches!(
            registry.rebuild().await,
            Err(crate::jail::JailError::Storage(_))
        ));
        assert_eq!(registry.lifecycle(), Lifecycle::Ready);
        assert!(store.0.is_empty());
    }
}
