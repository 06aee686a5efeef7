use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::assignment::Vehicle;
use crate::timeutil;

/// Hard lower bound on the search window; anything shorter is rejected
/// before any call leaves the process.
pub const MIN_WAIT_LIMIT_MINUTES: u32 = 15;
/// Soft upper bound the driver UI suggests. Not enforced here.
pub const SUGGESTED_MAX_WAIT_LIMIT_MINUTES: u32 = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    Searching,
    Converted,
    Cancelled,
}

impl SearchState {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchState::Searching => "searching",
            SearchState::Converted => "converted",
            SearchState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for SearchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A client-search record ("empty trip"): the driver is waiting at a spot
/// for a walk-up passenger, bounded by a server-issued deadline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyTrip {
    pub id: i64,
    /// Human-readable search number, e.g. `BUSQ-0042`.
    pub name: String,
    pub state: SearchState,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub wait_limit_minutes: u32,
    #[serde(default)]
    pub wait_limit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub vehicle: Option<Vehicle>,
    #[serde(default)]
    pub converted_trip_id: Option<i64>,
}

impl EmptyTrip {
    /// Minutes until the deadline, negative once past it. `None` when the
    /// server has not issued a deadline.
    pub fn remaining_minutes(&self, now: DateTime<Utc>) -> Option<i64> {
        self.wait_limit_time
            .map(|deadline| timeutil::remaining_minutes(deadline, now))
    }

    /// Expiry is a computed predicate, never a stored state: the ERP's
    /// background job flips expired records asynchronously, and readers must
    /// tolerate the stored state changing between fetches.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == SearchState::Searching
            && self.wait_limit_time.is_some_and(|deadline| now >= deadline)
    }

    /// Searching and not yet past the deadline.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state == SearchState::Searching && !self.is_expired(now)
    }
}

/// Context handed to the caller when a creation attempt collides with an
/// existing active search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveSearch {
    #[serde(default)]
    pub id: Option<i64>,
    pub search_number: String,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remaining_minutes: Option<i64>,
}

impl ActiveSearch {
    pub fn from_trip(trip: &EmptyTrip, now: DateTime<Utc>) -> Self {
        Self {
            id: Some(trip.id),
            search_number: trip.name.clone(),
            create_date: trip.create_date,
            remaining_minutes: trip.remaining_minutes(now),
        }
    }

    /// Built from a server conflict payload, which may carry nothing more
    /// than the conflicting record's name.
    pub fn from_name(search_number: impl Into<String>) -> Self {
        Self {
            id: None,
            search_number: search_number.into(),
            create_date: None,
            remaining_minutes: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyTripRequest {
    pub wait_limit_minutes: u32,
    #[serde(default)]
    pub comments: Option<String>,
}

impl EmptyTripRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.wait_limit_minutes < MIN_WAIT_LIMIT_MINUTES {
            return Err(AppError::field_validation(
                "wait_limit_minutes",
                format!("the search window must be at least {MIN_WAIT_LIMIT_MINUTES} minutes"),
            ));
        }
        Ok(())
    }
}

/// Result of converting a search into a trip: the new draft trip's identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertedTrip {
    pub trip_id: i64,
    #[serde(default)]
    pub trip_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u32,
}
