//! Shared engine state.
//!
//! One explicitly owned registry object passed by `Arc` to the
//! scheduler and dispatcher. Lifecycle is tied to engine start/stop;
//! there are no process-wide singletons.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use crate::config::AppConfig;
use crate::plugins::PluginSource;

pub struct EngineState {
    /// Registered plugins, keyed by id.
    pub plugins: DashMap<String, PluginSource>,
    /// Cached config; re-read from disk only on explicit reload.
    pub config: RwLock<AppConfig>,
}

impl EngineState {
    pub fn new(config: AppConfig) -> Arc<EngineState> {
        Arc::new(EngineState {
            plugins: DashMap::new(),
            config: RwLock::new(config),
        })
    }

    pub fn plugin(&self, id: &str) -> Option<PluginSource> {
        self.plugins.get(id).map(|p| p.clone())
    }

    /// Flip the enabled flag; returns the updated source if the plugin
    /// is known.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> Option<PluginSource> {
        let mut entry = self.plugins.get_mut(id)?;
        entry.enabled = enabled;
        Some(entry.clone())
    }
}
