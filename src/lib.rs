pub mod app;
pub mod auth;
pub mod config;
pub mod ui_store;

pub use app::AppState;
pub use config::BridgeConfig;
