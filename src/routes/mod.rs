pub mod driver;
pub mod public;

use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(public::router())
        .nest("/api", driver::router())
        .with_state(state)
}
