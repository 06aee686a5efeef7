//! Session-guarded JSON API for the driver app.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    auth::CurrentDriver,
    error::AppError,
    models::{
        assignment::Assignment,
        empty_trip::{ConvertedTrip, EmptyTrip, EmptyTripRequest, Page, Pagination},
        notification::Notification,
        trip::{ActionData, PauseReason, Trip, TripAction, TripBucket, TripDraft, TripState, TripStub},
    },
    services::dispatch::TripQuery,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/me/assignment", get(assignment))
        .route("/trips", get(list_trips).post(create_trip))
        .route("/trips/:id/start", post(start_trip))
        .route("/trips/:id/pause", post(pause_trip))
        .route("/trips/:id/resume", post(resume_trip))
        .route("/trips/:id/done", post(finish_trip))
        .route("/trips/:id/cancel", post(cancel_trip))
        .route("/pause-reasons", get(pause_reasons))
        .route("/empty-trips", get(list_empty_trips).post(create_empty_trip))
        .route("/empty-trips/replace", post(replace_empty_trip))
        .route("/empty-trips/:id/convert", post(convert_empty_trip))
        .route("/empty-trips/:id/cancel", post(cancel_empty_trip))
        .route("/feed", get(feed))
        .route(
            "/notifications",
            get(list_notifications).delete(clear_notifications),
        )
        .route("/notifications/read-all", post(read_all_notifications))
        .route("/notifications/:id/read", post(read_notification))
        .route("/notifications/:id", delete(remove_notification))
}

async fn assignment(
    State(state): State<AppState>,
    driver: CurrentDriver,
) -> Result<Json<Assignment>, AppError> {
    Ok(Json(state.dispatch.assignment(&driver.0.token).await?))
}

#[derive(Deserialize, Default)]
struct TripListParams {
    #[serde(default)]
    filter: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

async fn list_trips(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Query(params): Query<TripListParams>,
) -> Result<Json<Vec<Trip>>, AppError> {
    let query = TripQuery {
        bucket: params.filter.as_deref().map(TripBucket::parse).transpose()?,
        state: params.state.as_deref().map(parse_state).transpose()?,
    };
    Ok(Json(state.dispatch.list_trips(&driver.0.token, query).await?))
}

fn parse_state(raw: &str) -> Result<TripState, AppError> {
    serde_json::from_value(Value::String(raw.to_string()))
        .map_err(|_| AppError::field_validation("state", format!("unknown trip state: {raw}")))
}

async fn create_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Json(draft): Json<TripDraft>,
) -> Result<(StatusCode, Json<TripStub>), AppError> {
    let created = state.dispatch.create_trip(&driver.0.token, &draft).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn run_action(
    state: AppState,
    driver: CurrentDriver,
    id: i64,
    action: TripAction,
    body: Option<Json<ActionData>>,
) -> Result<Json<TripStub>, AppError> {
    let data = body.map(|Json(data)| data).unwrap_or_default();
    let updated = state
        .dispatch
        .trip_action(&driver.0.token, id, action, &data)
        .await?;
    Ok(Json(updated))
}

async fn start_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Path(id): Path<i64>,
    body: Option<Json<ActionData>>,
) -> Result<Json<TripStub>, AppError> {
    run_action(state, driver, id, TripAction::Start, body).await
}

async fn pause_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Path(id): Path<i64>,
    body: Option<Json<ActionData>>,
) -> Result<Json<TripStub>, AppError> {
    run_action(state, driver, id, TripAction::Pause, body).await
}

async fn resume_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Path(id): Path<i64>,
    body: Option<Json<ActionData>>,
) -> Result<Json<TripStub>, AppError> {
    run_action(state, driver, id, TripAction::Resume, body).await
}

async fn finish_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Path(id): Path<i64>,
    body: Option<Json<ActionData>>,
) -> Result<Json<TripStub>, AppError> {
    run_action(state, driver, id, TripAction::Done, body).await
}

async fn cancel_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Path(id): Path<i64>,
    body: Option<Json<ActionData>>,
) -> Result<Json<TripStub>, AppError> {
    run_action(state, driver, id, TripAction::Cancel, body).await
}

async fn pause_reasons(
    State(state): State<AppState>,
    driver: CurrentDriver,
) -> Result<Json<Vec<PauseReason>>, AppError> {
    Ok(Json(state.dispatch.pause_reasons(&driver.0.token).await?))
}

/// Client-search payload with the advisory countdown attached. Expiry is
/// always computed against the deadline at render time, never stored.
#[derive(Serialize)]
struct SearchView {
    remaining_minutes: Option<i64>,
    expired: bool,
    #[serde(flatten)]
    search: EmptyTrip,
}

fn search_view(search: EmptyTrip, now: DateTime<Utc>) -> SearchView {
    SearchView {
        remaining_minutes: search.remaining_minutes(now),
        expired: search.is_expired(now),
        search,
    }
}

#[derive(Deserialize, Default)]
struct PageParams {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    limit: Option<u32>,
}

#[derive(Serialize)]
struct SearchPage {
    data: Vec<SearchView>,
    pagination: Pagination,
}

fn search_page(page: Page<EmptyTrip>, now: DateTime<Utc>) -> SearchPage {
    SearchPage {
        data: page
            .data
            .into_iter()
            .map(|search| search_view(search, now))
            .collect(),
        pagination: page.pagination,
    }
}

async fn list_empty_trips(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Query(params): Query<PageParams>,
) -> Result<Json<SearchPage>, AppError> {
    let page = state
        .dispatch
        .list_empty_trips(
            &driver.0.token,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(10),
        )
        .await?;
    Ok(Json(search_page(page, Utc::now())))
}

async fn create_empty_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Json(request): Json<EmptyTripRequest>,
) -> Result<(StatusCode, Json<SearchView>), AppError> {
    let created = state
        .dispatch
        .create_empty_trip(&driver.0.token, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(search_view(created, Utc::now()))))
}

async fn replace_empty_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Json(request): Json<EmptyTripRequest>,
) -> Result<(StatusCode, Json<SearchView>), AppError> {
    let created = state
        .dispatch
        .replace_empty_trip(&driver.0.token, &request)
        .await?;
    Ok((StatusCode::CREATED, Json(search_view(created, Utc::now()))))
}

async fn convert_empty_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Path(id): Path<i64>,
) -> Result<Json<ConvertedTrip>, AppError> {
    Ok(Json(
        state.dispatch.convert_empty_trip(&driver.0.token, id).await?,
    ))
}

async fn cancel_empty_trip(
    State(state): State<AppState>,
    driver: CurrentDriver,
    Path(id): Path<i64>,
) -> Result<Json<SearchView>, AppError> {
    let cancelled = state
        .dispatch
        .cancel_empty_trip(&driver.0.token, id)
        .await?;
    Ok(Json(search_view(cancelled, Utc::now())))
}

#[derive(Serialize)]
struct FeedView {
    seq: u64,
    refreshed_at: Option<DateTime<Utc>>,
    trips: Vec<Trip>,
    empty_trips: Vec<SearchView>,
    unread_notifications: usize,
}

/// The latest background-poll snapshot; never triggers a fetch of its own.
async fn feed(driver: CurrentDriver) -> Json<FeedView> {
    let snapshot = driver.0.feed.snapshot();
    let now = Utc::now();
    Json(FeedView {
        seq: snapshot.seq,
        refreshed_at: snapshot.refreshed_at,
        trips: snapshot.trips,
        empty_trips: snapshot
            .empty_trips
            .into_iter()
            .map(|search| search_view(search, now))
            .collect(),
        unread_notifications: driver.0.notifications.unread_count(),
    })
}

#[derive(Serialize)]
struct NotificationList {
    data: Vec<Notification>,
    unread: usize,
}

async fn list_notifications(driver: CurrentDriver) -> Json<NotificationList> {
    Json(NotificationList {
        data: driver.0.notifications.list(),
        unread: driver.0.notifications.unread_count(),
    })
}

async fn read_notification(
    driver: CurrentDriver,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if driver.0.notifications.mark_read(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

async fn read_all_notifications(driver: CurrentDriver) -> StatusCode {
    driver.0.notifications.mark_all_read();
    StatusCode::NO_CONTENT
}

async fn remove_notification(
    driver: CurrentDriver,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    if driver.0.notifications.remove(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(AppError::NotFound)
    }
}

async fn clear_notifications(driver: CurrentDriver) -> StatusCode {
    driver.0.notifications.clear();
    StatusCode::NO_CONTENT
}
