// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Process-wide instance flags held in an injectable key/value store.

use std::collections::BTreeMap;
use std::sync::RwLock;

/// Key under which the auto-materialize pause flag is stored.
pub const AUTO_MATERIALIZE_PAUSED: &str = "auto_materialize_paused";

/// String key/value storage for instance settings.
pub trait SettingsStore: Send + Sync {
    fn get_setting(&self, key: &str) -> Option<String>;

    fn set_setting(&self, key: &str, value: &str);
}

#[derive(Debug, Default)]
pub struct InMemorySettingsStore {
    values: RwLock<BTreeMap<String, String>>,
}

impl InMemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for InMemorySettingsStore {
    fn get_setting(&self, key: &str) -> Option<String> {
        self.values
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    fn set_setting(&self, key: &str, value: &str) {
        self.values
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}

/// False unless the flag was explicitly stored as `"true"`.
pub fn auto_materialize_paused(store: &dyn SettingsStore) -> bool {
    store
        .get_setting(AUTO_MATERIALIZE_PAUSED)
        .is_some_and(|v| v == "true")
}

pub fn set_auto_materialize_paused(store: &dyn SettingsStore, paused: bool) {
    store.set_setting(AUTO_MATERIALIZE_PAUSED, if paused { "true" } else { "false" });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_flag_defaults_to_false_and_round_trips() {
        let store = InMemorySettingsStore::new();
        assert!(!auto_materialize_paused(&store));

        set_auto_materialize_paused(&store, true);
        assert!(auto_materialize_paused(&store));
        assert_eq!(store.get_setting(AUTO_MATERIALIZE_PAUSED).as_deref(), Some("true"));

        set_auto_materialize_paused(&store, false);
        assert!(!auto_materialize_paused(&store));
    }
}
