//! The single point where driver actions become state-machine transitions
//! plus calls against the external persistence collaborator.
//!
//! Nothing here mutates local state optimistically: every transition is
//! confirmed by the backend's response, and on failure the caller sees the
//! normalized error with local state untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use crate::config::TimeConfig;
use crate::error::AppError;
use crate::models::{
    assignment::Assignment,
    empty_trip::{ActiveSearch, ConvertedTrip, EmptyTrip, EmptyTripRequest, Page},
    notification::BusMessage,
    trip::{ActionData, PauseReason, Trip, TripAction, TripBucket, TripDraft, TripState, TripStub},
};
use crate::services::erp::SessionToken;

/// The external persistence collaborator. Implemented over HTTP by
/// [`crate::services::erp::ErpClient`]; tests drive the orchestrator through
/// an in-memory implementation.
#[async_trait]
pub trait TripBackend: Send + Sync {
    async fn assignment(&self, session: &SessionToken) -> Result<Assignment, AppError>;

    async fn list_trips(
        &self,
        session: &SessionToken,
        state: Option<TripState>,
    ) -> Result<Vec<Trip>, AppError>;

    async fn get_trip(&self, session: &SessionToken, id: i64) -> Result<Trip, AppError>;

    async fn create_trip(
        &self,
        session: &SessionToken,
        draft: &TripDraft,
    ) -> Result<TripStub, AppError>;

    async fn trip_action(
        &self,
        session: &SessionToken,
        id: i64,
        action: TripAction,
        data: &ActionData,
    ) -> Result<TripStub, AppError>;

    async fn pause_reasons(&self, session: &SessionToken) -> Result<Vec<PauseReason>, AppError>;

    async fn list_empty_trips(
        &self,
        session: &SessionToken,
        page: u32,
        limit: u32,
    ) -> Result<Page<EmptyTrip>, AppError>;

    async fn create_empty_trip(
        &self,
        session: &SessionToken,
        request: &EmptyTripRequest,
    ) -> Result<EmptyTrip, AppError>;

    async fn convert_empty_trip(
        &self,
        session: &SessionToken,
        id: i64,
    ) -> Result<ConvertedTrip, AppError>;

    async fn cancel_empty_trip(
        &self,
        session: &SessionToken,
        id: i64,
    ) -> Result<EmptyTrip, AppError>;

    async fn poll_notifications(
        &self,
        session: &SessionToken,
        last: u64,
    ) -> Result<Vec<BusMessage>, AppError>;
}

/// Filters for the trip list: an optional display bucket plus a raw state.
#[derive(Debug, Clone, Copy, Default)]
pub struct TripQuery {
    pub bucket: Option<TripBucket>,
    pub state: Option<TripState>,
}

#[derive(Clone)]
pub struct DispatchService {
    backend: Arc<dyn TripBackend>,
    time: TimeConfig,
}

impl DispatchService {
    pub fn new(backend: Arc<dyn TripBackend>, time: TimeConfig) -> Self {
        Self { backend, time }
    }

    pub fn backend(&self) -> &Arc<dyn TripBackend> {
        &self.backend
    }

    pub async fn assignment(&self, session: &SessionToken) -> Result<Assignment, AppError> {
        self.backend.assignment(session).await
    }

    pub async fn pause_reasons(
        &self,
        session: &SessionToken,
    ) -> Result<Vec<PauseReason>, AppError> {
        self.backend.pause_reasons(session).await
    }

    pub async fn list_trips(
        &self,
        session: &SessionToken,
        query: TripQuery,
    ) -> Result<Vec<Trip>, AppError> {
        let trips = self.backend.list_trips(session, query.state).await?;
        let Some(bucket) = query.bucket else {
            return Ok(trips);
        };
        let now = Utc::now();
        Ok(trips
            .into_iter()
            .filter(|trip| bucket.matches(trip, now, self.time.display_offset_minutes))
            .collect())
    }

    pub async fn create_trip(
        &self,
        session: &SessionToken,
        draft: &TripDraft,
    ) -> Result<TripStub, AppError> {
        draft.validate(Utc::now())?;
        let created = self.backend.create_trip(session, draft).await?;
        info!(trip = %created.name, "trip created");
        Ok(created)
    }

    /// Runs a lifecycle action. The current state is re-read first so an
    /// illegal request fails fast with context; the backend's confirmation
    /// is what callers get back, never a locally assumed result.
    pub async fn trip_action(
        &self,
        session: &SessionToken,
        id: i64,
        action: TripAction,
        data: &ActionData,
    ) -> Result<TripStub, AppError> {
        let current = self.backend.get_trip(session, id).await?;
        current.state.transition(action)?;
        let updated = self.backend.trip_action(session, id, action, data).await?;
        info!(trip = %updated.name, %action, state = %updated.state, "trip action confirmed");
        Ok(updated)
    }

    pub async fn list_empty_trips(
        &self,
        session: &SessionToken,
        page: u32,
        limit: u32,
    ) -> Result<Page<EmptyTrip>, AppError> {
        self.backend.list_empty_trips(session, page, limit).await
    }

    /// The driver's current active search, if any: `searching` and not past
    /// its deadline.
    pub async fn active_search(
        &self,
        session: &SessionToken,
    ) -> Result<Option<EmptyTrip>, AppError> {
        let page = self.backend.list_empty_trips(session, 1, 50).await?;
        let now = Utc::now();
        Ok(page.data.into_iter().find(|search| search.is_active(now)))
    }

    /// Creates a client search, enforcing the single-active-search invariant
    /// cooperatively: an existing active record is surfaced as a conflict
    /// for the caller to decide on, never overwritten. The server remains
    /// the authority and may still answer with its own conflict.
    pub async fn create_empty_trip(
        &self,
        session: &SessionToken,
        request: &EmptyTripRequest,
    ) -> Result<EmptyTrip, AppError> {
        request.validate()?;
        if let Some(existing) = self.active_search(session).await? {
            return Err(AppError::Conflict {
                existing: ActiveSearch::from_trip(&existing, Utc::now()),
            });
        }
        let created = self.backend.create_empty_trip(session, request).await?;
        info!(search = %created.name, wait_limit = request.wait_limit_minutes, "client search created");
        Ok(created)
    }

    /// Explicit cancel-and-replace. The two steps are not atomic: when the
    /// cancel lands but the create fails, the driver is left with no active
    /// search, and the error names the cancelled record instead of hiding
    /// that window.
    pub async fn replace_empty_trip(
        &self,
        session: &SessionToken,
        request: &EmptyTripRequest,
    ) -> Result<EmptyTrip, AppError> {
        request.validate()?;
        let Some(existing) = self.active_search(session).await? else {
            return self.backend.create_empty_trip(session, request).await;
        };
        self.backend.cancel_empty_trip(session, existing.id).await?;
        match self.backend.create_empty_trip(session, request).await {
            Ok(created) => {
                info!(old = %existing.name, new = %created.name, "client search replaced");
                Ok(created)
            }
            Err(err) => {
                warn!(search = %existing.name, error = %err, "search cancelled but replacement failed");
                Err(AppError::ReplaceFailed {
                    search_number: existing.name,
                    source: Box::new(err),
                })
            }
        }
    }

    /// Conversion is attempted even past the deadline; expiry on the client
    /// is advisory and the server's answer decides.
    pub async fn convert_empty_trip(
        &self,
        session: &SessionToken,
        id: i64,
    ) -> Result<ConvertedTrip, AppError> {
        let converted = self.backend.convert_empty_trip(session, id).await?;
        info!(search_id = id, trip_id = converted.trip_id, "client search converted");
        Ok(converted)
    }

    pub async fn cancel_empty_trip(
        &self,
        session: &SessionToken,
        id: i64,
    ) -> Result<EmptyTrip, AppError> {
        self.backend.cancel_empty_trip(session, id).await
    }

    pub async fn poll_notifications(
        &self,
        session: &SessionToken,
        last: u64,
    ) -> Result<Vec<BusMessage>, AppError> {
        self.backend.poll_notifications(session, last).await
    }
}
