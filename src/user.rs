//! User context holder.
//!
//! This module owns the active user identity and custom attributes. It is
//! the one piece of state reachable from callers outside the serial task
//! context, so all access goes through internal synchronization.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// The current user identity plus custom attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
    pub id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl UserContext {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: HashMap::new(),
        }
    }

    pub fn with_attributes(
        id: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> Self {
        Self {
            id: id.into(),
            attributes,
        }
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

/// Thread-safe holder for the active [`UserContext`].
///
/// `update_attributes` applies `updater(previous) -> next` atomically with
/// respect to concurrent reads, and raises the `attributes_updated` flag so
/// the next refresh request informs the server. The flag is cleared only
/// after a successful refresh.
pub struct UserHolder {
    user: RwLock<UserContext>,
    attributes_updated: AtomicBool,
}

impl UserHolder {
    pub fn new(user: UserContext) -> Self {
        Self {
            user: RwLock::new(user),
            attributes_updated: AtomicBool::new(false),
        }
    }

    /// Returns a snapshot of the current user.
    pub fn current_user(&self) -> UserContext {
        self.user.read().clone()
    }

    pub fn user_id(&self) -> String {
        self.user.read().id.clone()
    }

    /// Atomically replaces the attribute map.
    ///
    /// The updater receives the previous map and returns the next one; the
    /// write lock is held across the call so readers observe either the old
    /// or the new map, never an intermediate state.
    pub fn update_attributes<F>(&self, updater: F)
    where
        F: FnOnce(HashMap<String, String>) -> HashMap<String, String>,
    {
        let mut guard = self.user.write();
        let previous = std::mem::take(&mut guard.attributes);
        guard.attributes = updater(previous);
        self.attributes_updated.store(true, Ordering::SeqCst);
        tracing::debug!("user attributes updated");
    }

    /// Replaces the whole user. Also raises the attributes flag so the
    /// server re-evaluates against the new identity on the next refresh.
    pub fn set_user(&self, user: UserContext) {
        *self.user.write() = user;
        self.attributes_updated.store(true, Ordering::SeqCst);
    }

    /// Whether custom attributes changed since the last successful refresh.
    pub fn attributes_updated(&self) -> bool {
        self.attributes_updated.load(Ordering::SeqCst)
    }

    /// Clears the flag. Called only after a successful refresh response has
    /// been durably stored.
    pub fn clear_attributes_updated(&self) {
        self.attributes_updated.store(false, Ordering::SeqCst);
    }
}
