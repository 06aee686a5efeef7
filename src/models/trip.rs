use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::assignment::{Card, Vehicle};
use crate::timeutil;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripState {
    Draft,
    Active,
    Paused,
    Done,
    Cancelled,
}

impl TripState {
    pub fn as_str(self) -> &'static str {
        match self {
            TripState::Draft => "draft",
            TripState::Active => "active",
            TripState::Paused => "paused",
            TripState::Done => "done",
            TripState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TripState::Done | TripState::Cancelled)
    }

    /// Target state if `action` is legal from `self`. The external system
    /// remains the source of truth; this is the fail-fast pre-check, and it
    /// never treats a repeated, already-applied action as a success.
    pub fn transition(self, action: TripAction) -> Result<TripState, AppError> {
        use TripAction as A;
        use TripState as S;
        let next = match (self, action) {
            (S::Draft, A::Start) => S::Active,
            (S::Active, A::Pause) => S::Paused,
            (S::Paused, A::Resume) => S::Active,
            (S::Active | S::Paused, A::Done) => S::Done,
            (S::Draft | S::Active | S::Paused, A::Cancel) => S::Cancelled,
            (state, action) => return Err(AppError::InvalidTransition { action, state }),
        };
        Ok(next)
    }
}

impl fmt::Display for TripState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripAction {
    Start,
    Pause,
    Resume,
    Done,
    Cancel,
}

impl TripAction {
    /// Path segment used by the ERP action endpoints.
    pub fn as_str(self) -> &'static str {
        match self {
            TripAction::Start => "start",
            TripAction::Pause => "pause",
            TripAction::Resume => "resume",
            TripAction::Done => "done",
            TripAction::Cancel => "cancel",
        }
    }
}

impl fmt::Display for TripAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trip {
    pub id: i64,
    pub name: String,
    pub state: TripState,
    #[serde(default)]
    pub origin: Option<String>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default = "default_passenger_count")]
    pub passenger_count: u32,
    #[serde(default)]
    pub passenger_reference: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub amount_mxn: f64,
    #[serde(default)]
    pub payment_in_usd: bool,
    #[serde(default)]
    pub amount_usd: Option<f64>,
    #[serde(default)]
    pub exchange_rate: Option<f64>,
    #[serde(default)]
    pub is_scheduled: bool,
    #[serde(default)]
    pub scheduled_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub create_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub pause_count: u32,
    #[serde(default)]
    pub vehicle: Option<Vehicle>,
    #[serde(default)]
    pub card: Option<Card>,
}

fn default_passenger_count() -> u32 {
    1
}

/// Minimal record the ERP returns from trip creation and action endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripStub {
    #[serde(alias = "trip_id")]
    pub id: i64,
    pub name: String,
    pub state: TripState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// Base64 payload, forwarded opaquely to the ERP.
    pub data: String,
}

/// Driver-supplied fields for a new trip.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TripDraft {
    pub origin: String,
    pub destination: String,
    #[serde(default = "default_passenger_count")]
    pub passenger_count: u32,
    #[serde(default)]
    pub passenger_reference: Option<String>,
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub amount_mxn: f64,
    #[serde(default)]
    pub payment_in_usd: bool,
    #[serde(default)]
    pub amount_usd: Option<f64>,
    #[serde(default)]
    pub exchange_rate: Option<f64>,
    #[serde(default)]
    pub is_scheduled: bool,
    #[serde(default)]
    pub scheduled_datetime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub comments: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl TripDraft {
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if self.origin.trim().is_empty() {
            return Err(AppError::field_validation("origin", "origin is required"));
        }
        if self.destination.trim().is_empty() {
            return Err(AppError::field_validation(
                "destination",
                "destination is required",
            ));
        }
        if self.passenger_count < 1 {
            return Err(AppError::field_validation(
                "passenger_count",
                "at least one passenger is required",
            ));
        }
        if self.amount_mxn < 0.0
            || self.amount_usd.is_some_and(|v| v < 0.0)
            || self.exchange_rate.is_some_and(|v| v < 0.0)
        {
            return Err(AppError::validation("amounts cannot be negative"));
        }
        if self.payment_in_usd {
            if !self.amount_usd.is_some_and(|v| v > 0.0) {
                return Err(AppError::field_validation(
                    "amount_usd",
                    "a USD amount greater than zero is required for USD payments",
                ));
            }
            if !self.exchange_rate.is_some_and(|v| v > 0.0) {
                return Err(AppError::field_validation(
                    "exchange_rate",
                    "an exchange rate greater than zero is required for USD payments",
                ));
            }
        }
        if self.is_scheduled {
            match self.scheduled_datetime {
                Some(when) if when > now => {}
                Some(_) => {
                    return Err(AppError::field_validation(
                        "scheduled_datetime",
                        "the appointment must be in the future",
                    ));
                }
                None => {
                    return Err(AppError::field_validation(
                        "scheduled_datetime",
                        "scheduled trips need an appointment datetime",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Optional payload for pause and cancel actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionData {
    #[serde(default)]
    pub reason_id: Option<i64>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub refund_credit: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PauseReason {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Display buckets for the trip list, mirroring the driver app tabs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TripBucket {
    Today,
    Scheduled,
    History,
}

impl TripBucket {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw {
            "today" => Ok(TripBucket::Today),
            "scheduled" => Ok(TripBucket::Scheduled),
            "history" => Ok(TripBucket::History),
            other => Err(AppError::field_validation(
                "filter",
                format!("unknown trip filter '{other}'"),
            )),
        }
    }

    pub fn matches(self, trip: &Trip, now: DateTime<Utc>, display_offset_minutes: i32) -> bool {
        let scheduled_today = trip
            .scheduled_datetime
            .is_some_and(|when| timeutil::is_today(when, now, display_offset_minutes));
        match self {
            TripBucket::Today => match trip.state {
                TripState::Active | TripState::Paused => true,
                TripState::Draft if !trip.is_scheduled => true,
                TripState::Draft => scheduled_today,
                _ => false,
            },
            TripBucket::Scheduled => {
                trip.state == TripState::Draft && trip.is_scheduled && !scheduled_today
            }
            TripBucket::History => trip.state.is_terminal(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    const ALL_STATES: [TripState; 5] = [
        TripState::Draft,
        TripState::Active,
        TripState::Paused,
        TripState::Done,
        TripState::Cancelled,
    ];
    const ALL_ACTIONS: [TripAction; 5] = [
        TripAction::Start,
        TripAction::Pause,
        TripAction::Resume,
        TripAction::Done,
        TripAction::Cancel,
    ];

    fn allowed(state: TripState, action: TripAction) -> Option<TripState> {
        use TripAction as A;
        use TripState as S;
        match (state, action) {
            (S::Draft, A::Start) => Some(S::Active),
            (S::Active, A::Pause) => Some(S::Paused),
            (S::Paused, A::Resume) => Some(S::Active),
            (S::Active | S::Paused, A::Done) => Some(S::Done),
            (S::Draft | S::Active | S::Paused, A::Cancel) => Some(S::Cancelled),
            _ => None,
        }
    }

    #[test]
    fn transition_table_is_exhaustive() {
        for state in ALL_STATES {
            for action in ALL_ACTIONS {
                match (state.transition(action), allowed(state, action)) {
                    (Ok(next), Some(expected)) => assert_eq!(next, expected),
                    (Err(AppError::InvalidTransition { action: a, state: s }), None) => {
                        assert_eq!(a, action);
                        assert_eq!(s, state);
                    }
                    (got, expected) => {
                        panic!("{state} + {action}: got {got:?}, expected {expected:?}")
                    }
                }
            }
        }
    }

    #[test]
    fn terminal_states_reject_everything() {
        for state in [TripState::Done, TripState::Cancelled] {
            assert!(state.is_terminal());
            for action in ALL_ACTIONS {
                assert!(state.transition(action).is_err(), "{state} + {action}");
            }
        }
    }

    fn draft() -> TripDraft {
        TripDraft {
            origin: "Airport".into(),
            destination: "Centro".into(),
            passenger_count: 2,
            ..TripDraft::default()
        }
    }

    #[test]
    fn draft_requires_origin_and_destination() {
        let now = Utc::now();
        assert!(draft().validate(now).is_ok());
        let mut missing = draft();
        missing.origin = "  ".into();
        assert!(matches!(
            missing.validate(now),
            Err(AppError::Validation {
                field: Some("origin"),
                ..
            })
        ));
    }

    #[test]
    fn usd_payment_needs_amount_and_rate() {
        let now = Utc::now();
        let mut usd = draft();
        usd.payment_in_usd = true;
        assert!(usd.validate(now).is_err());
        usd.amount_usd = Some(25.0);
        assert!(usd.validate(now).is_err());
        usd.exchange_rate = Some(18.4);
        assert!(usd.validate(now).is_ok());
    }

    #[test]
    fn scheduled_trip_needs_future_appointment() {
        let now = Utc::now();
        let mut scheduled = draft();
        scheduled.is_scheduled = true;
        assert!(scheduled.validate(now).is_err());
        scheduled.scheduled_datetime = Some(now - Duration::hours(1));
        assert!(scheduled.validate(now).is_err());
        scheduled.scheduled_datetime = Some(now + Duration::hours(1));
        assert!(scheduled.validate(now).is_ok());
    }

    fn trip(state: TripState) -> Trip {
        Trip {
            id: 1,
            name: "TRIP-0001".into(),
            state,
            origin: None,
            destination: None,
            passenger_count: 1,
            passenger_reference: None,
            payment_method: None,
            amount_mxn: 0.0,
            payment_in_usd: false,
            amount_usd: None,
            exchange_rate: None,
            is_scheduled: false,
            scheduled_datetime: None,
            comments: None,
            create_date: None,
            start_datetime: None,
            end_datetime: None,
            is_paused: false,
            pause_count: 0,
            vehicle: None,
            card: None,
        }
    }

    #[test]
    fn buckets_split_by_state_and_schedule() {
        let now = Utc::now();
        let active = trip(TripState::Active);
        assert!(TripBucket::Today.matches(&active, now, 0));
        assert!(!TripBucket::History.matches(&active, now, 0));

        let mut tomorrow = trip(TripState::Draft);
        tomorrow.is_scheduled = true;
        tomorrow.scheduled_datetime = Some(now + Duration::days(2));
        assert!(TripBucket::Scheduled.matches(&tomorrow, now, 0));
        assert!(!TripBucket::Today.matches(&tomorrow, now, 0));

        let mut later_today = trip(TripState::Draft);
        later_today.is_scheduled = true;
        later_today.scheduled_datetime = Some(now);
        assert!(TripBucket::Today.matches(&later_today, now, 0));
        assert!(!TripBucket::Scheduled.matches(&later_today, now, 0));

        let done = trip(TripState::Done);
        assert!(TripBucket::History.matches(&done, now, 0));
        assert!(!TripBucket::Today.matches(&done, now, 0));
    }
}
