use std::sync::Arc;

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use sha2::{Digest, Sha512};

use crate::{
    config::AppConfig,
    services::{dispatch::DispatchService, erp::ErpClient, sessions::SessionRegistry},
};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub erp: ErpClient,
    pub dispatch: DispatchService,
    pub sessions: SessionRegistry,
    pub cookie_key: Key,
}

impl AppState {
    pub fn new(config: AppConfig, erp: ErpClient) -> Self {
        let digest = Sha512::digest(config.cookie_secret.as_bytes());
        let cookie_key = Key::from(&digest[..]);
        let dispatch = DispatchService::new(Arc::new(erp.clone()), config.time);
        Self {
            config,
            erp,
            dispatch,
            sessions: SessionRegistry::new(),
            cookie_key,
        }
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Key {
        state.cookie_key.clone()
    }
}
