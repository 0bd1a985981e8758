pub mod ai;
pub mod app;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod schema;
pub mod state;
pub mod todos;

pub use app::{build_app, serve};
pub use state::AppState;
