//! Per-guild jail settings
//!
//! Settings are stored as one YAML document per guild. A guild is usable only once
//! its settings are *defined* (see [`GuildSettings::defined`]).

use crate::storage::{DurableStore, StorageError};
use chrono::Utc;
use poise::serenity_prelude::GuildId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Longest restriction a guild allows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaxDuration {
    Unbounded,
    Minutes(f64),
}

impl fmt::Display for MaxDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbounded => write!(f, "unbounded"),
            Self::Minutes(minutes) => write!(f, "{minutes} minutes"),
        }
    }
}

/// Why a requested duration was refused
#[derive(Debug, Clone, PartialEq)]
pub enum DurationRejection {
    /// Negative, NaN or infinite
    Invalid(f64),
    /// Longer than the guild allows
    TooLong { requested: f64, max: f64 },
    /// No duration given although the guild caps restrictions
    Required { max: f64 },
}

impl fmt::Display for DurationRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(value) => write!(
                f,
                "{value} is not a valid duration. Give a non-negative number of minutes"
            ),
            Self::TooLong { requested, max } => write!(
                f,
                "{requested} minutes is too long. This server allows at most {max} minutes"
            ),
            Self::Required { max } => write!(
                f,
                "Please give a duration. This server allows at most {max} minutes"
            ),
        }
    }
}

impl MaxDuration {
    /// Validate a requested duration in minutes against this limit.
    ///
    /// Returns the timer delay, or `None` for an indefinite restriction.
    ///
    /// # Errors
    /// Returns a [`DurationRejection`] describing the problem.
    pub fn check(&self, requested: Option<f64>) -> Result<Option<Duration>, DurationRejection> {
        let Some(minutes) = requested else {
            return match self {
                Self::Unbounded => Ok(None),
                Self::Minutes(max) => Err(DurationRejection::Required { max: *max }),
            };
        };

        if !minutes.is_finite() || minutes < 0.0 {
            return Err(DurationRejection::Invalid(minutes));
        }
        if let Self::Minutes(max) = self {
            if minutes > *max {
                return Err(DurationRejection::TooLong {
                    requested: minutes,
                    max: *max,
                });
            }
        }

        let delay = Duration::try_from_secs_f64(minutes * 60.0)
            .map_err(|_| DurationRejection::Invalid(minutes))?;
        // the release time has to be representable
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| Utc::now().checked_add_signed(delay))
            .ok_or(DurationRejection::Invalid(minutes))?;
        Ok(Some(delay))
    }
}

/// Stored settings for a guild, possibly incomplete
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuildSettings {
    /// Name of the role members are jailed with
    #[serde(default)]
    pub jail_role: Option<String>,
    /// Names of the roles members keep while jailed
    #[serde(default)]
    pub save_roles: Option<Vec<String>>,
    #[serde(default)]
    pub arrest_attachment: Option<String>,
    #[serde(default)]
    pub release_attachment: Option<String>,
    #[serde(default)]
    pub max_duration: Option<MaxDuration>,
}

impl GuildSettings {
    /// The complete settings, if every required field is present
    #[must_use]
    pub fn defined(&self) -> Option<DefinedSettings> {
        Some(DefinedSettings {
            jail_role: self.jail_role.clone()?,
            save_roles: self.save_roles.clone()?,
            arrest_attachment: self.arrest_attachment.clone(),
            release_attachment: self.release_attachment.clone(),
            max_duration: self.max_duration?,
        })
    }

    #[must_use]
    pub fn is_defined(&self) -> bool {
        self.jail_role.is_some() && self.save_roles.is_some() && self.max_duration.is_some()
    }
}

/// Complete settings, snapshotted into every restriction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinedSettings {
    pub jail_role: String,
    pub save_roles: Vec<String>,
    #[serde(default)]
    pub arrest_attachment: Option<String>,
    #[serde(default)]
    pub release_attachment: Option<String>,
    pub max_duration: MaxDuration,
}

impl From<DefinedSettings> for GuildSettings {
    fn from(settings: DefinedSettings) -> Self {
        Self {
            jail_role: Some(settings.jail_role),
            save_roles: Some(settings.save_roles),
            arrest_attachment: settings.arrest_attachment,
            release_attachment: settings.release_attachment,
            max_duration: Some(settings.max_duration),
        }
    }
}

/// Guild settings persisted in a [`DurableStore`]
#[derive(Clone)]
pub struct GuildSettingsStore {
    store: Arc<dyn DurableStore>,
}

impl GuildSettingsStore {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    fn key(guild_id: GuildId) -> String {
        guild_id.get().to_string()
    }

    /// Start tracking a guild the bot just joined
    ///
    /// # Errors
    /// Returns an error if the settings cannot be written.
    pub async fn connect(&self, guild_id: GuildId) -> Result<(), StorageError> {
        self.save(guild_id, &GuildSettings::default()).await
    }

    /// Forget a guild the bot left
    ///
    /// # Errors
    /// Returns an error if the settings cannot be removed.
    pub async fn disconnect(&self, guild_id: GuildId) -> Result<(), StorageError> {
        self.store.remove_item(&Self::key(guild_id)).await
    }

    /// Settings for a guild. Missing or unreadable settings come back empty.
    ///
    /// # Errors
    /// Returns an error if the store cannot be read.
    pub async fn get(&self, guild_id: GuildId) -> Result<GuildSettings, StorageError> {
        let Some(raw) = self.store.get_item(&Self::key(guild_id)).await? else {
            return Ok(GuildSettings::default());
        };
        match serde_yaml::from_str(&raw) {
            Ok(settings) => Ok(settings),
            Err(e) => {
                warn!(guild_id = %guild_id, error = %e, "Ignoring unreadable guild settings");
                Ok(GuildSettings::default())
            }
        }
    }

    /// # Errors
    /// Returns an error if the settings cannot be serialized or written.
    pub async fn save(&self, guild_id: GuildId, settings: &GuildSettings) -> Result<(), StorageError> {
        let yaml = serde_yaml::to_string(settings)?;
        self.store.set_item(&Self::key(guild_id), yaml).await
    }
}
