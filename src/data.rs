use std::{ops::Deref, sync::Arc};

use crate::config::BotConfig;
use crate::jail::JailRegistry;
use crate::settings::GuildSettingsStore;

/// State shared by every command invocation
#[derive(Clone)]
pub struct Data(pub Arc<DataInner>);

pub struct DataInner {
    pub registry: JailRegistry,
    pub settings: GuildSettingsStore,
    pub config: BotConfig,
}

impl Data {
    #[must_use]
    pub fn new(registry: JailRegistry, settings: GuildSettingsStore, config: BotConfig) -> Self {
        Self(Arc::new(DataInner {
            registry,
            settings,
            config,
        }))
    }
}

impl Deref for Data {
    type Target = DataInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Debug for Data {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Data")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
