use crate::state::AppState;
use axum::Router;

mod dto;
pub mod handlers;
pub mod identity;
pub mod jwt;
pub mod password;

pub use identity::{AuthUser, Identity};

pub fn router() -> Router<AppState> {
    handlers::auth_routes()
}
