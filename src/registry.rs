//! The analytics registry: a handful of keys in the config db recording
//! which analytics are loaded and active and which resource channels each
//! one subscribes to. Written only by administrative flows; read by the
//! supervisor, the consumers, and the query browser.

use std::collections::BTreeSet;

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::models::definition::AnalyticsDefinition;

/// Set of currently active analytics names.
pub const ACTIVE_KEY: &str = "Analytics:Active";
/// Control channel watched by the worker supervisor.
pub const COMMAND_CHANNEL: &str = "AnalyticsWorkerCmd";
/// The only defined control command.
pub const REFRESH_COMMAND: &str = "refresh";

pub fn definition_key(name: &str) -> String {
    format!("Analytics:ByName:{name}")
}

pub fn subscriptions_key(name: &str) -> String {
    format!("Analytics:ByName:{name}:Subscriptions")
}

pub fn channel_analytics_key(channel: &str) -> String {
    format!("Subscriptions:{channel}:ActiveAnalytics")
}

/// Validate a definition document, store it verbatim, register its channel
/// subscriptions, activate it, and nudge the supervisor. Returns the
/// analytics name. A `data_db` override rewrites that one field in the
/// stored copy.
pub async fn load_analytics(
    conn: &mut ConnectionManager,
    raw_json: &str,
    data_db: Option<i64>,
) -> anyhow::Result<String> {
    let definition = AnalyticsDefinition::parse(raw_json)?;
    let name = definition.name.clone();

    let stored = match data_db {
        None => raw_json.to_string(),
        Some(db) => {
            let mut doc: Value = serde_json::from_str(raw_json)?;
            doc["data_db"] = Value::from(db);
            serde_json::to_string_pretty(&doc)?
        }
    };

    let _: () = conn.set(definition_key(&name), stored).await?;
    for measure in &definition.measures {
        if let Some(spec) = definition.measure_spec(measure) {
            let _: i64 = conn.sadd(subscriptions_key(&name), &spec.resource).await?;
            let _: i64 = conn.sadd(channel_analytics_key(&spec.resource), &name).await?;
        }
    }
    let _: i64 = conn.sadd(ACTIVE_KEY, &name).await?;
    publish_refresh(conn).await?;
    Ok(name)
}

/// Deactivate an analytics and withdraw its channel registrations. The
/// stored definition stays put so `enable` can bring it back.
pub async fn disable_analytics(conn: &mut ConnectionManager, name: &str) -> anyhow::Result<()> {
    let _: i64 = conn.srem(ACTIVE_KEY, name).await?;
    let channels: BTreeSet<String> = conn.smembers(subscriptions_key(name)).await?;
    for channel in &channels {
        let _: i64 = conn.srem(channel_analytics_key(channel), name).await?;
    }
    publish_refresh(conn).await
}

/// Re-activate a previously loaded analytics.
pub async fn enable_analytics(conn: &mut ConnectionManager, name: &str) -> anyhow::Result<()> {
    let loaded: bool = conn.exists(definition_key(name)).await?;
    if !loaded {
        tracing::warn!(
            "analytics '{name}' is not loaded; use 'load' with the definition json file"
        );
    }
    let _: i64 = conn.sadd(ACTIVE_KEY, name).await?;
    let channels: BTreeSet<String> = conn.smembers(subscriptions_key(name)).await?;
    for channel in &channels {
        let _: i64 = conn.sadd(channel_analytics_key(channel), name).await?;
    }
    publish_refresh(conn).await
}

/// The stored definition document, verbatim.
pub async fn dump_analytics(
    conn: &mut ConnectionManager,
    name: &str,
) -> anyhow::Result<Option<String>> {
    let raw: Option<String> = conn.get(definition_key(name)).await?;
    Ok(raw)
}

pub async fn active_analytics(conn: &mut ConnectionManager) -> anyhow::Result<BTreeSet<String>> {
    let names: BTreeSet<String> = conn.smembers(ACTIVE_KEY).await?;
    Ok(names)
}

pub async fn subscriptions(
    conn: &mut ConnectionManager,
    name: &str,
) -> anyhow::Result<BTreeSet<String>> {
    let channels: BTreeSet<String> = conn.smembers(subscriptions_key(name)).await?;
    Ok(channels)
}

async fn publish_refresh(conn: &mut ConnectionManager) -> anyhow::Result<()> {
    let _: i64 = conn.publish(COMMAND_CHANNEL, REFRESH_COMMAND).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(definition_key("activity"), "Analytics:ByName:activity");
        assert_eq!(
            subscriptions_key("activity"),
            "Analytics:ByName:activity:Subscriptions"
        );
        assert_eq!(
            channel_analytics_key("page"),
            "Subscriptions:page:ActiveAnalytics"
        );
    }
}
