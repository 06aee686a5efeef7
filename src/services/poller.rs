//! Background refresh for a logged-in driver session.
//!
//! One task per session polls the backend on a fixed interval and publishes
//! the result into a shared [`LiveFeed`]. Fetches are sequence-stamped so a
//! slow response can never overwrite a newer snapshot, and the task checks
//! its shutdown signal again after the fetch so a logged-out session never
//! has results applied on its behalf.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::{empty_trip::EmptyTrip, notification::NotificationStore, trip::Trip};
use crate::services::dispatch::{DispatchService, TripQuery};
use crate::services::erp::SessionToken;

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedSnapshot {
    pub seq: u64,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub trips: Vec<Trip>,
    pub empty_trips: Vec<EmptyTrip>,
}

/// Shared, cheaply clonable view of the latest poll result.
#[derive(Clone, Default)]
pub struct LiveFeed {
    seq: Arc<AtomicU64>,
    inner: Arc<RwLock<FeedSnapshot>>,
}

impl LiveFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamps a fetch about to start.
    pub fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Publishes a fetch result. A result stamped older than what is already
    /// published is discarded, so the latest fetch always wins regardless of
    /// response ordering.
    pub fn apply(
        &self,
        seq: u64,
        trips: Vec<Trip>,
        empty_trips: Vec<EmptyTrip>,
        now: DateTime<Utc>,
    ) -> bool {
        let mut snapshot = self.inner.write().expect("feed lock poisoned");
        if seq <= snapshot.seq {
            return false;
        }
        *snapshot = FeedSnapshot {
            seq,
            refreshed_at: Some(now),
            trips,
            empty_trips,
        };
        true
    }

    pub fn snapshot(&self) -> FeedSnapshot {
        self.inner.read().expect("feed lock poisoned").clone()
    }
}

/// Controls one session's refresh task.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stops the task. Safe to call more than once.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
        self.task.abort();
    }
}

pub fn spawn_refresh(
    dispatch: DispatchService,
    session: SessionToken,
    feed: LiveFeed,
    notifications: NotificationStore,
    interval: Duration,
) -> RefreshHandle {
    let (shutdown, mut signal) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_seen: u64 = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = signal.changed() => break,
            }
            let seq = feed.next_seq();
            match refresh_once(
                &dispatch,
                &session,
                seq,
                &feed,
                &notifications,
                &mut last_seen,
                &signal,
            )
            .await
            {
                Ok(true) => debug!(seq, "feed refreshed"),
                Ok(false) => debug!(seq, "stale fetch discarded"),
                Err(err) => warn!(error = %err, "refresh cycle failed"),
            }
        }
    });
    RefreshHandle { shutdown, task }
}

async fn refresh_once(
    dispatch: &DispatchService,
    session: &SessionToken,
    seq: u64,
    feed: &LiveFeed,
    notifications: &NotificationStore,
    last_seen: &mut u64,
    signal: &watch::Receiver<bool>,
) -> Result<bool, AppError> {
    let (trips, searches, messages) = tokio::join!(
        dispatch.list_trips(session, TripQuery::default()),
        dispatch.list_empty_trips(session, 1, 50),
        dispatch.poll_notifications(session, *last_seen),
    );
    let now = Utc::now();

    for message in messages? {
        if let Some(id) = message.id {
            *last_seen = (*last_seen).max(id);
        }
        notifications.push(message, now);
    }
    notifications.prune(now);

    // The session may have been closed while the fetch was in flight.
    if *signal.borrow() {
        return Ok(false);
    }
    Ok(feed.apply(seq, trips?, searches?.data, now))
}
