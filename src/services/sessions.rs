//! In-process registry of logged-in driver sessions.
//!
//! The browser only ever holds an opaque local id in a private cookie; the
//! ERP session token, the live feed, the notification store and the refresh
//! task all live here, keyed by that id, and are torn down together at
//! logout.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::models::assignment::SessionInfo;
use crate::models::notification::NotificationStore;
use crate::services::erp::SessionToken;
use crate::services::poller::{LiveFeed, RefreshHandle};

pub struct DriverSession {
    pub token: SessionToken,
    pub info: SessionInfo,
    pub notifications: NotificationStore,
    pub feed: LiveFeed,
    refresh: RefreshHandle,
}

impl DriverSession {
    pub fn new(
        token: SessionToken,
        info: SessionInfo,
        notifications: NotificationStore,
        feed: LiveFeed,
        refresh: RefreshHandle,
    ) -> Self {
        Self {
            token,
            info,
            notifications,
            feed,
            refresh,
        }
    }

    /// Stops the refresh task. Idempotent.
    pub fn close(&self) {
        self.refresh.close();
    }
}

#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<DriverSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a session and returns the local id the cookie will carry.
    pub fn insert(&self, session: DriverSession) -> String {
        let id = Uuid::new_v4().to_string();
        self.inner
            .write()
            .expect("session lock poisoned")
            .insert(id.clone(), Arc::new(session));
        id
    }

    pub fn get(&self, id: &str) -> Option<Arc<DriverSession>> {
        self.inner
            .read()
            .expect("session lock poisoned")
            .get(id)
            .cloned()
    }

    /// Removes a session and shuts its refresh task down.
    pub fn remove(&self, id: &str) -> Option<Arc<DriverSession>> {
        let removed = self
            .inner
            .write()
            .expect("session lock poisoned")
            .remove(id);
        if let Some(session) = &removed {
            session.close();
        }
        removed
    }
}
