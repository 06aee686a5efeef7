//! HTTP/JSON-RPC client for the ERP backend.
//!
//! Everything duck-typed about the ERP lives here: the JSON-RPC envelope,
//! the addon's `{success, data}` wrapper, `false`-for-missing fields, and
//! naive timestamps. Payloads leave this module as plain normalized JSON
//! that serde can decode into the model types.

use async_trait::async_trait;
use reqwest::{header, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::config::AppConfig;
use crate::error::AppError;
use crate::models::{
    assignment::{Assignment, SessionInfo},
    empty_trip::{ActiveSearch, ConvertedTrip, EmptyTrip, EmptyTripRequest, Page},
    notification::BusMessage,
    trip::{ActionData, PauseReason, Trip, TripAction, TripDraft, TripStub},
};
use crate::services::dispatch::TripBackend;
use crate::timeutil;

/// The ERP session cookie value. Opaque; issued at login and attached to
/// every call.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

impl SessionToken {
    fn cookie(&self) -> String {
        format!("session_id={}", self.0)
    }
}

#[derive(Clone)]
pub struct ErpClient {
    http: reqwest::Client,
    base: Url,
    prefix: String,
    naive_offset_minutes: i32,
}

impl ErpClient {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base: config.erp_base_url.clone(),
            prefix: config.erp_api_prefix.trim_end_matches('/').to_string(),
            naive_offset_minutes: config.time.naive_offset_minutes,
        })
    }

    fn url(&self, path: &str) -> Result<Url, AppError> {
        self.base
            .join(path)
            .map_err(|err| AppError::Config(format!("invalid ERP path {path}: {err}")))
    }

    fn api_path(&self, path: &str) -> String {
        format!("{}{}", self.prefix, path)
    }

    async fn rpc(
        &self,
        session: Option<&SessionToken>,
        path: &str,
        params: Value,
    ) -> Result<Value, AppError> {
        let url = self.url(path)?;
        let mut request = self.http.post(url).json(&json!({
            "jsonrpc": "2.0",
            "method": "call",
            "params": params,
        }));
        if let Some(session) = session {
            request = request.header(header::COOKIE, session.cookie());
        }
        debug!(%path, "erp rpc");
        self.finish(request.send().await?).await
    }

    async fn get(
        &self,
        session: &SessionToken,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, AppError> {
        let url = self.url(path)?;
        debug!(%path, "erp get");
        let response = self
            .http
            .get(url)
            .query(query)
            .header(header::COOKIE, session.cookie())
            .send()
            .await?;
        self.finish(response).await
    }

    async fn finish(&self, response: Response) -> Result<Value, AppError> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(AppError::Unauthorized);
        }
        let body = response.bytes().await?;
        match serde_json::from_slice::<Value>(&body) {
            Ok(mut value) => {
                sanitize(&mut value, self.naive_offset_minutes);
                resolve_envelope(value, status)
            }
            Err(_) if !status.is_success() => {
                Err(AppError::Backend(format!("ERP returned {status}")))
            }
            Err(err) => Err(AppError::Backend(format!(
                "unparseable ERP response: {err}"
            ))),
        }
    }

    /// Lists the server's databases, used by the automatic login flow.
    pub async fn database_list(&self) -> Result<Vec<String>, AppError> {
        let value = self.rpc(None, "/web/database/list", json!({})).await?;
        decode(value, "database list")
    }

    pub async fn authenticate(
        &self,
        db: &str,
        login: &str,
        password: &str,
    ) -> Result<(SessionToken, SessionInfo), AppError> {
        let url = self.url("/web/session/authenticate")?;
        let response = self
            .http
            .post(url)
            .json(&json!({
                "jsonrpc": "2.0",
                "method": "call",
                "params": {"db": db, "login": login, "password": password},
            }))
            .send()
            .await?;
        let token = extract_session_cookie(response.headers());
        let value = self.finish(response).await?;
        if value.get("uid").map_or(true, Value::is_null) {
            return Err(AppError::Unauthorized);
        }
        let info: SessionInfo = decode(value, "session info")?;
        let token = token.ok_or(AppError::Unauthorized)?;
        Ok((token, info))
    }

    pub async fn session_info(&self, session: &SessionToken) -> Result<SessionInfo, AppError> {
        let value = self
            .rpc(Some(session), "/web/session/get_session_info", json!({}))
            .await?;
        let info: SessionInfo = decode(value, "session info")?;
        if info.uid.is_none() {
            return Err(AppError::Unauthorized);
        }
        Ok(info)
    }

    pub async fn destroy_session(&self, session: &SessionToken) -> Result<(), AppError> {
        self.rpc(Some(session), "/web/session/destroy", json!({}))
            .await?;
        Ok(())
    }

    /// Unauthenticated liveness probe.
    pub async fn health(&self) -> Result<Value, AppError> {
        let url = self.url(&self.api_path("/health"))?;
        self.finish(self.http.get(url).send().await?).await
    }
}

#[async_trait]
impl TripBackend for ErpClient {
    async fn assignment(&self, session: &SessionToken) -> Result<Assignment, AppError> {
        let value = self
            .get(session, &self.api_path("/me/assignment"), &[])
            .await?;
        decode(extract_data(value), "assignment")
    }

    async fn list_trips(
        &self,
        session: &SessionToken,
        state: Option<crate::models::trip::TripState>,
    ) -> Result<Vec<Trip>, AppError> {
        let mut query = Vec::new();
        if let Some(state) = state {
            query.push(("state", state.as_str().to_string()));
        }
        let value = self.get(session, &self.api_path("/trips"), &query).await?;
        decode(extract_data(value), "trip list")
    }

    async fn get_trip(&self, session: &SessionToken, id: i64) -> Result<Trip, AppError> {
        // The addon exposes no single-trip endpoint; the list is small and
        // driver-scoped, so fetch and pick.
        let trips = self.list_trips(session, None).await?;
        trips
            .into_iter()
            .find(|trip| trip.id == id)
            .ok_or(AppError::NotFound)
    }

    async fn create_trip(
        &self,
        session: &SessionToken,
        draft: &TripDraft,
    ) -> Result<TripStub, AppError> {
        let params = serde_json::to_value(draft).map_err(anyhow::Error::from)?;
        let value = self
            .rpc(Some(session), &self.api_path("/trips/create"), params)
            .await?;
        decode(extract_data(value), "created trip")
    }

    async fn trip_action(
        &self,
        session: &SessionToken,
        id: i64,
        action: TripAction,
        data: &ActionData,
    ) -> Result<TripStub, AppError> {
        let params = serde_json::to_value(data).map_err(anyhow::Error::from)?;
        let path = self.api_path(&format!("/trips/{id}/{}", action.as_str()));
        let value = self.rpc(Some(session), &path, params).await?;
        decode(extract_data(value), "trip action result")
    }

    async fn pause_reasons(&self, session: &SessionToken) -> Result<Vec<PauseReason>, AppError> {
        let value = self
            .get(session, &self.api_path("/pause-reasons"), &[])
            .await?;
        decode(extract_data(value), "pause reasons")
    }

    async fn list_empty_trips(
        &self,
        session: &SessionToken,
        page: u32,
        limit: u32,
    ) -> Result<Page<EmptyTrip>, AppError> {
        let query = [("page", page.to_string()), ("limit", limit.to_string())];
        let value = self
            .get(session, &self.api_path("/empty-trips"), &query)
            .await?;
        decode(value, "empty trip page")
    }

    async fn create_empty_trip(
        &self,
        session: &SessionToken,
        request: &EmptyTripRequest,
    ) -> Result<EmptyTrip, AppError> {
        let params = serde_json::to_value(request).map_err(anyhow::Error::from)?;
        let value = self
            .rpc(Some(session), &self.api_path("/empty-trips/create"), params)
            .await?;
        decode(extract_data(value), "created search")
    }

    async fn convert_empty_trip(
        &self,
        session: &SessionToken,
        id: i64,
    ) -> Result<ConvertedTrip, AppError> {
        let path = self.api_path(&format!("/empty-trips/{id}/convert"));
        let value = self.rpc(Some(session), &path, json!({})).await?;
        decode(extract_data(value), "converted search")
    }

    async fn cancel_empty_trip(
        &self,
        session: &SessionToken,
        id: i64,
    ) -> Result<EmptyTrip, AppError> {
        let path = self.api_path(&format!("/empty-trips/{id}/cancel"));
        let value = self.rpc(Some(session), &path, json!({})).await?;
        decode(extract_data(value), "cancelled search")
    }

    async fn poll_notifications(
        &self,
        session: &SessionToken,
        last: u64,
    ) -> Result<Vec<BusMessage>, AppError> {
        let value = self
            .rpc(
                Some(session),
                &self.api_path("/check-notifications"),
                json!({ "last": last }),
            )
            .await?;
        let payload = extract_data(value);
        if payload.is_null() {
            return Ok(Vec::new());
        }
        decode(payload, "notifications")
    }
}

fn decode<T: DeserializeOwned>(value: Value, what: &str) -> Result<T, AppError> {
    serde_json::from_value(value)
        .map_err(|err| AppError::Backend(format!("malformed {what} payload: {err}")))
}

fn extract_session_cookie(headers: &header::HeaderMap) -> Option<SessionToken> {
    for value in headers.get_all(header::SET_COOKIE) {
        let Ok(raw) = value.to_str() else { continue };
        let Some(pair) = raw.split(';').next() else {
            continue;
        };
        if let Some(session_id) = pair.trim().strip_prefix("session_id=") {
            if !session_id.is_empty() {
                return Some(SessionToken(session_id.to_string()));
            }
        }
    }
    None
}

/// Odoo serializes missing values as `false` and absent relations as `null`.
/// Both are dropped so serde defaults apply; keys in this list are genuine
/// booleans and keep their `false`.
const BOOLEAN_KEYS: &[&str] = &["payment_in_usd", "is_scheduled", "is_paused", "success", "read"];

fn scrub_missing(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|key, entry| match entry {
                Value::Null => false,
                Value::Bool(false) => BOOLEAN_KEYS.contains(&key.as_str()),
                _ => true,
            });
            for entry in map.values_mut() {
                scrub_missing(entry);
            }
        }
        Value::Array(items) => {
            for item in items {
                scrub_missing(item);
            }
        }
        _ => {}
    }
}

fn sanitize(value: &mut Value, naive_offset_minutes: i32) {
    scrub_missing(value);
    timeutil::qualify_timestamps(value, naive_offset_minutes);
}

/// Collapses the ERP's inconsistently nested response shapes into the bare
/// payload: a JSON-RPC `result` wrapper, the addon's `{success, data}`
/// envelope, or a flat body. All three occur in the wild.
fn resolve_envelope(mut value: Value, status: StatusCode) -> Result<Value, AppError> {
    if let Some(map) = value.as_object_mut() {
        if let Some(error) = map.get("error").filter(|e| e.is_object()).cloned() {
            return Err(rpc_error(&error));
        }
        if let Some(result) = map.remove("result") {
            value = result;
        }
    }
    if let Some(map) = value.as_object() {
        let failed = map.get("success") == Some(&Value::Bool(false))
            || map.contains_key("error")
            || !status.is_success();
        if failed {
            return Err(endpoint_error(map, status));
        }
    }
    Ok(value)
}

/// Pulls `data` out of a success envelope; flat payloads pass through.
fn extract_data(mut value: Value) -> Value {
    if let Some(map) = value.as_object_mut() {
        if let Some(data) = map.remove("data") {
            return data;
        }
    }
    value
}

/// JSON-RPC transport errors carry the raising exception under `data`.
fn rpc_error(error: &Value) -> AppError {
    let message = error
        .pointer("/data/message")
        .and_then(Value::as_str)
        .or_else(|| error.get("message").and_then(Value::as_str))
        .unwrap_or("unclassified ERP error")
        .to_string();
    let exception = error
        .pointer("/data/name")
        .and_then(Value::as_str)
        .unwrap_or("");
    if exception.ends_with("AccessDenied") || exception.ends_with("SessionExpired") {
        AppError::Unauthorized
    } else if exception.ends_with("ValidationError") {
        AppError::validation(message)
    } else if exception.ends_with("UserError") {
        AppError::InvalidState(message)
    } else {
        AppError::Backend(message)
    }
}

fn endpoint_error(map: &serde_json::Map<String, Value>, status: StatusCode) -> AppError {
    let code = map
        .get("code")
        .and_then(Value::as_u64)
        .unwrap_or_else(|| u64::from(status.as_u16()));
    let message = map
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| map.get("error").and_then(Value::as_str))
        .unwrap_or("unclassified ERP error")
        .to_string();
    match code {
        401 | 403 => AppError::Unauthorized,
        404 => AppError::NotFound,
        409 => {
            let existing = map
                .get("existing")
                .and_then(|v| serde_json::from_value::<ActiveSearch>(v.clone()).ok())
                .or_else(|| {
                    map.get("existing_search_name")
                        .and_then(Value::as_str)
                        .map(ActiveSearch::from_name)
                })
                .unwrap_or_else(|| ActiveSearch::from_name(message.clone()));
            AppError::Conflict { existing }
        }
        400 => AppError::InvalidState(message),
        _ => AppError::Backend(message),
    }
}
