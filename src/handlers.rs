use crate::EVENT_TARGET;
use crate::settings::GuildSettingsStore;
use poise::serenity_prelude::{
    self as serenity, Context, EventHandler, Guild, GuildId, Ready, UnavailableGuild,
};
use tracing::{error, info, warn};

/// Gateway events outside of commands
pub struct Handler {
    settings: GuildSettingsStore,
}

impl Handler {
    #[must_use]
    pub fn new(settings: GuildSettingsStore) -> Self {
        Self { settings }
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// Called when the bot is ready, but the cache may not be fully populated yet.
    async fn ready(&self, ctx: Context, ready: Ready) {
        let user_name = ready.user.name.clone();
        let shard_id = ctx.shard_id;
        info!(target: EVENT_TARGET, "Connected as {user_name}, shard {shard_id}");
    }

    /// Called when the cache is fully populated.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let guild_count_cache = ctx.cache.guild_count();
        let guild_count = guilds.len();
        if guild_count != guild_count_cache {
            warn!(
                target: EVENT_TARGET,
                "Cache guild count mismatch: {guild_count_cache} (cache) vs {guild_count} (actual)"
            );
        }
        info!(target: EVENT_TARGET, "Cache ready! The bot is in {guild_count} guild(s)");
    }

    /// Start tracking settings for a guild the bot was just added to
    async fn guild_create(&self, _ctx: Context, guild: Guild, is_new: Option<bool>) {
        if is_new != Some(true) {
            return;
        }
        match self.settings.connect(guild.id).await {
            Ok(()) => info!(target: EVENT_TARGET, guild_id = %guild.id, name = %guild.name, "Joined guild"),
            Err(e) => error!(target: EVENT_TARGET, guild_id = %guild.id, error = %e, "Failed to store settings for new guild"),
        }
    }

    /// Forget a guild the bot was removed from. Outages also delete guilds and are ignored.
    async fn guild_delete(&self, _ctx: Context, incomplete: UnavailableGuild, _full: Option<Guild>) {
        if incomplete.unavailable {
            warn!(target: EVENT_TARGET, guild_id = %incomplete.id, "Guild became unavailable");
            return;
        }
        match self.settings.disconnect(incomplete.id).await {
            Ok(()) => info!(target: EVENT_TARGET, guild_id = %incomplete.id, "Left guild"),
            Err(e) => error!(target: EVENT_TARGET, guild_id = %incomplete.id, error = %e, "Failed to remove settings for old guild"),
        }
    }
}
