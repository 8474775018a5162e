//! Locally persisted user preferences
//!
//! The collector attributes batches to a user id read from the preference
//! store. Missing or empty values attribute to [`DEFAULT_USER`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// Preference key holding the user id
pub const USER_PREFERENCE_KEY: &str = "customURL";

pub const DEFAULT_USER: &str = "guest";

/// Read-only view of a key/value preference store
pub trait PreferenceStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    values: RwLock<HashMap<String, String>>,
}

impl MemoryPreferences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: impl Into<String>, value: impl Into<String>) -> Self {
        let prefs = Self::new();
        prefs.set(key, value);
        prefs
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let mut values = match self.values.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        values.insert(key.into(), value.into());
    }
}

impl PreferenceStore for MemoryPreferences {
    fn get(&self, key: &str) -> Option<String> {
        match self.values.read() {
            Ok(values) => values.get(key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(key).cloned(),
        }
    }
}

/// Flat JSON object on disk, re-read on every lookup
#[derive(Debug, Clone)]
pub struct JsonFilePreferences {
    path: PathBuf,
}

impl JsonFilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PreferenceStore for JsonFilePreferences {
    fn get(&self, key: &str) -> Option<String> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                debug!(path = %self.path.display(), error = %e, "Preferences unavailable");
                return None;
            }
        };
        let values: serde_json::Map<String, serde_json::Value> =
            match serde_json::from_slice(&data) {
                Ok(values) => values,
                Err(e) => {
                    debug!(path = %self.path.display(), error = %e, "Malformed preferences file");
                    return None;
                }
            };
        match values.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        }
    }
}

/// User id for uploads: stored value without a leading `@`, or `guest`
pub fn resolve_user(store: &dyn PreferenceStore, key: &str) -> String {
    store
        .get(key)
        .map(|raw| {
            let raw = raw.trim();
            raw.strip_prefix('@').unwrap_or(raw).to_string()
        })
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| DEFAULT_USER.to_string())
}
