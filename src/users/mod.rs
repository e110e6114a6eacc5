pub mod dto;
pub mod handlers;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn profile_router() -> Router<AppState> {
    handlers::profile_routes()
}

pub fn account_router() -> Router<AppState> {
    handlers::avatar_routes().merge(handlers::admin_routes())
}
