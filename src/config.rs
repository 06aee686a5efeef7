use std::{env, net::SocketAddr, time::Duration};

use url::Url;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub erp_base_url: Url,
    pub erp_api_prefix: String,
    pub erp_db_hint: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub cookie_secret: String,
    pub time: TimeConfig,
}

/// Timestamp handling knobs.
///
/// The ERP emits datetimes as naive `"YYYY-MM-DD HH:mm:ss"` strings. They are
/// assumed to be UTC unless `naive_offset_minutes` says otherwise; this is an
/// explicit configuration rather than a silent guess baked into parsing.
/// `display_offset_minutes` is the driver-facing zone used for day bucketing
/// (today vs. scheduled), UTC-6 for the original fleet.
#[derive(Debug, Clone, Copy)]
pub struct TimeConfig {
    pub naive_offset_minutes: i32,
    pub display_offset_minutes: i32,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            naive_offset_minutes: 0,
            display_offset_minutes: -360,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let listen_addr: SocketAddr = env::var("APP_LISTEN_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid APP_LISTEN_ADDR: {err}")))?;

        let erp_base_url: Url = env::var("ERP_BASE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:8069".to_string())
            .parse()
            .map_err(|err| AppError::Config(format!("invalid ERP_BASE_URL: {err}")))?;

        let erp_api_prefix =
            env::var("ERP_API_PREFIX").unwrap_or_else(|_| "/driverpro/api".to_string());

        let erp_db_hint = env::var("ERP_DB_HINT").unwrap_or_else(|_| "driver".to_string());

        let request_timeout = Duration::from_secs(parse_env_u64("ERP_REQUEST_TIMEOUT_SECS", 30)?);
        let poll_interval = Duration::from_secs(parse_env_u64("APP_POLL_INTERVAL_SECS", 30)?);

        let cookie_secret = env::var("COOKIE_SECRET")
            .unwrap_or_else(|_| "change-me-super-secret-session-cookie".to_string());

        let time = TimeConfig {
            naive_offset_minutes: parse_env_i32("ERP_NAIVE_OFFSET_MINUTES", 0)?,
            display_offset_minutes: parse_env_i32("APP_DISPLAY_OFFSET_MINUTES", -360)?,
        };

        Ok(Self {
            listen_addr,
            erp_base_url,
            erp_api_prefix,
            erp_db_hint,
            request_timeout,
            poll_interval,
            cookie_secret,
            time,
        })
    }
}

fn parse_env_u64(key: &str, default: u64) -> Result<u64, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}

fn parse_env_i32(key: &str, default: i32) -> Result<i32, AppError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|err| AppError::Config(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
