//! Redis connection plumbing.
//!
//! The registry lives in one logical db, aggregates in another; pub/sub
//! subscriptions need a dedicated connection of their own. Request/response
//! traffic rides on [`ConnectionManager`], which multiplexes and reconnects.

use redis::aio::ConnectionManager;
use redis::{Client, IntoConnectionInfo, RedisResult};

use crate::config::Settings;

/// A client bound to one logical db of the configured Redis.
pub fn client(settings: &Settings, db: i64) -> RedisResult<Client> {
    let mut info = settings.redis_url.as_str().into_connection_info()?;
    info.redis.db = db;
    Client::open(info)
}

/// Client for the config (registry) db. Pub/sub handles are opened off this
/// client so subscriptions stay on their own connections.
pub fn config_client(settings: &Settings) -> RedisResult<Client> {
    client(settings, settings.config_db)
}

pub async fn config_connection(settings: &Settings) -> RedisResult<ConnectionManager> {
    config_client(settings)?.get_connection_manager().await
}

/// Connection to the data db a definition aggregates into; `None` falls back
/// to the configured default.
pub async fn data_connection(
    settings: &Settings,
    data_db: Option<i64>,
) -> RedisResult<ConnectionManager> {
    client(settings, data_db.unwrap_or(settings.default_data_db))?
        .get_connection_manager()
        .await
}
