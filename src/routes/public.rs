use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    auth::{self, CurrentDriver},
    error::AppError,
    models::{assignment::SessionInfo, notification::NotificationStore},
    services::{poller, poller::LiveFeed, sessions::DriverSession},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/session", get(session))
        .route("/api/health", get(health))
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(alias = "login")]
    username: String,
    password: String,
    #[serde(default, alias = "db")]
    database: Option<String>,
}

#[derive(Serialize)]
struct LoginResponse {
    session: SessionInfo,
    db: String,
}

async fn login(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(body): Json<LoginRequest>,
) -> Result<(PrivateCookieJar, Json<LoginResponse>), AppError> {
    if body.username.trim().is_empty() {
        return Err(AppError::field_validation(
            "username",
            "username must not be empty",
        ));
    }
    let db = pick_database(&state, body.database.as_deref()).await?;
    let (token, session_info) = state
        .erp
        .authenticate(&db, &body.username, &body.password)
        .await?;

    let notifications = NotificationStore::new();
    let feed = LiveFeed::new();
    let refresh = poller::spawn_refresh(
        state.dispatch.clone(),
        token.clone(),
        feed.clone(),
        notifications.clone(),
        state.config.poll_interval,
    );
    let session = DriverSession::new(token, session_info.clone(), notifications, feed, refresh);
    let id = state.sessions.insert(session);
    info!(
        user = session_info.username.as_deref().unwrap_or("?"),
        %db,
        "driver logged in"
    );

    Ok((
        jar.add(auth::session_cookie(id)),
        Json(LoginResponse {
            session: session_info,
            db,
        }),
    ))
}

/// Picks the database to authenticate against when the client did not name
/// one: a single database wins outright, otherwise the first whose name
/// contains the configured hint, otherwise the first listed.
async fn pick_database(state: &AppState, requested: Option<&str>) -> Result<String, AppError> {
    if let Some(db) = requested {
        return Ok(db.to_string());
    }
    let mut databases = state.erp.database_list().await?;
    if databases.is_empty() {
        return Err(AppError::Backend("ERP reports no databases".into()));
    }
    if databases.len() == 1 {
        return Ok(databases.remove(0));
    }
    let hint = state.config.erp_db_hint.to_lowercase();
    if let Some(found) = databases
        .iter()
        .find(|db| db.to_lowercase().contains(&hint))
    {
        return Ok(found.clone());
    }
    Ok(databases.remove(0))
}

async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<(PrivateCookieJar, StatusCode), AppError> {
    if let Some(cookie) = jar.get(auth::SESSION_COOKIE) {
        if let Some(session) = state.sessions.remove(cookie.value()) {
            // Local teardown already happened; a failed remote logout only
            // leaves an orphaned ERP session behind.
            if let Err(err) = state.erp.destroy_session(&session.token).await {
                warn!(error = %err, "ERP session teardown failed");
            }
        }
    }
    Ok((jar.remove(auth::removal_cookie()), StatusCode::NO_CONTENT))
}

#[derive(Serialize)]
struct SessionView {
    session: SessionInfo,
    unread_notifications: usize,
}

async fn session(driver: CurrentDriver) -> Json<SessionView> {
    Json(SessionView {
        session: driver.0.info.clone(),
        unread_notifications: driver.0.notifications.unread_count(),
    })
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let erp = match state.erp.health().await {
        Ok(_) => "up",
        Err(err) => {
            warn!(error = %err, "ERP health probe failed");
            "down"
        }
    };
    Json(json!({ "status": "ok", "erp": erp }))
}
