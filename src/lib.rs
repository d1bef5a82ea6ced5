pub mod browser;
pub mod config;
pub mod consumer;
pub mod dimensions;
pub mod error;
pub mod handlers;
pub mod keys;
pub mod measures;
pub mod models;
pub mod publisher;
pub mod registry;
pub mod store;
pub mod supervisor;

use redis::aio::ConnectionManager;

use config::Settings;

#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    /// Shared connection to the config db for registry reads and publishes.
    pub conf: ConnectionManager,
}
