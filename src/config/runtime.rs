// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

use std::sync::Arc;

use crate::concurrency::{ConcurrencyLedger, ConcurrencyStore};
use crate::config::InstanceConfig;
use crate::errors::InstanceError;
use crate::instance::settings::{self, InMemorySettingsStore, SettingsStore};
use crate::instance::{HeartbeatStore, Instance, InstanceOptions};

/// Instance builder - wires ledger, executor, heartbeat store and settings from configuration.
///
/// The `RuntimeBuilder` opens the concurrency ledger (file-backed when
/// `concurrency.storage_path` is set), applies the configured limits, and builds an
/// [`Instance`] whose executor uses the configured retry policy and step concurrency.
///
/// # Examples
///
/// ## Building an instance from configuration
/// ```
/// use the_runwood::config::{InstanceConfig, RuntimeBuilder};
/// use the_runwood::concurrency::ConcurrencyStore;
///
/// let mut config = InstanceConfig::default();
/// config.concurrency.limits.insert("foo".to_string(), 3);
///
/// let instance = RuntimeBuilder::from_config(&config).unwrap();
/// assert_eq!(instance.store().get_concurrency_limit("foo"), 3);
/// ```
pub struct RuntimeBuilder;

impl RuntimeBuilder {
    /// Build a complete instance from configuration.
    ///
    /// Limits from `concurrency.limits` overwrite whatever a persisted ledger held for
    /// the same keys; keys not named in the config keep their persisted limits.
    pub fn from_config(cfg: &InstanceConfig) -> Result<Instance, InstanceError> {
        let ledger = match &cfg.concurrency.storage_path {
            Some(path) => ConcurrencyLedger::open(path)?,
            None => ConcurrencyLedger::in_memory(),
        };
        for (key, limit) in &cfg.concurrency.limits {
            ledger.set_concurrency_limit(key, *limit)?;
        }

        let settings_store: Arc<dyn SettingsStore> = Arc::new(InMemorySettingsStore::new());
        settings::set_auto_materialize_paused(
            settings_store.as_ref(),
            cfg.settings.auto_materialize_paused,
        );

        let options = InstanceOptions {
            bus_capacity: cfg.events.bus_capacity,
            retry_policy: cfg.retry.policy(),
            max_concurrency: cfg.executor.max_concurrency(),
            heartbeats: HeartbeatStore::new(cfg.daemons.heartbeat_tolerance())
                .with_required(cfg.daemons.required.iter().cloned()),
            settings: settings_store,
        };

        let store: Arc<dyn ConcurrencyStore> = Arc::new(ledger);
        Ok(Instance::new(store, options))
    }
}
