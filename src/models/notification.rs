use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Notifications older than this are pruned on each poll cycle.
pub fn retention_window() -> Duration {
    Duration::days(7)
}

/// Message shape the ERP notification channel delivers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BusMessage {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub trip_id: Option<i64>,
    #[serde(default)]
    pub trip_name: Option<String>,
    #[serde(default)]
    pub search_id: Option<i64>,
    #[serde(default)]
    pub search_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub body: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
    #[serde(default)]
    pub trip_id: Option<i64>,
    #[serde(default)]
    pub trip_name: Option<String>,
    #[serde(default)]
    pub search_id: Option<i64>,
    #[serde(default)]
    pub search_name: Option<String>,
}

/// Per-driver, in-process notification state. Created when the session
/// starts and dropped at logout; handed around explicitly instead of living
/// in a module-level singleton.
#[derive(Clone, Default)]
pub struct NotificationStore {
    inner: Arc<RwLock<Vec<Notification>>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: BusMessage, now: DateTime<Utc>) -> Notification {
        let notification = Notification {
            id: Uuid::new_v4().to_string(),
            kind: message.kind.unwrap_or_else(|| "info".to_string()),
            title: message.title.unwrap_or_else(|| "Notification".to_string()),
            body: message.body.unwrap_or_default(),
            timestamp: message.timestamp.unwrap_or(now),
            read: false,
            trip_id: message.trip_id,
            trip_name: message.trip_name,
            search_id: message.search_id,
            search_name: message.search_name,
        };
        let mut items = self.inner.write().expect("notification lock poisoned");
        items.insert(0, notification.clone());
        notification
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Notification> {
        self.inner
            .read()
            .expect("notification lock poisoned")
            .clone()
    }

    pub fn unread_count(&self) -> usize {
        self.inner
            .read()
            .expect("notification lock poisoned")
            .iter()
            .filter(|n| !n.read)
            .count()
    }

    pub fn mark_read(&self, id: &str) -> bool {
        let mut items = self.inner.write().expect("notification lock poisoned");
        match items.iter_mut().find(|n| n.id == id) {
            Some(found) => {
                found.read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) {
        let mut items = self.inner.write().expect("notification lock poisoned");
        for item in items.iter_mut() {
            item.read = true;
        }
    }

    pub fn remove(&self, id: &str) -> bool {
        let mut items = self.inner.write().expect("notification lock poisoned");
        let before = items.len();
        items.retain(|n| n.id != id);
        items.len() != before
    }

    pub fn clear(&self) {
        self.inner
            .write()
            .expect("notification lock poisoned")
            .clear();
    }

    /// Drops entries past the retention window.
    pub fn prune(&self, now: DateTime<Utc>) {
        let cutoff = now - retention_window();
        let mut items = self.inner.write().expect("notification lock poisoned");
        items.retain(|n| n.timestamp > cutoff);
    }
}
