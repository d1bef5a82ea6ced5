//! Per-analytics consumer: drains one pub/sub subscription and folds each
//! transaction into the analytics' aggregate keys.
//!
//! A bad message is logged and skipped; the loop must survive anything a
//! producer can throw at it. A failure during setup parks the task instead
//! of returning, so the supervisor stays the only authority over worker
//! lifecycle: crash loudly, be restarted.

use std::collections::BTreeSet;

use anyhow::{Context, anyhow};
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::{ConnectionManager, PubSubStream};
use serde_json::Value;

use crate::config::Settings;
use crate::dimensions;
use crate::keys::{KeyPart, construct_key};
use crate::measures;
use crate::models::definition::{AnalyticsDefinition, Condition, Predicate};
use crate::models::transaction::{TransactionEnvelope, TrType};
use crate::registry;
use crate::store;

struct ConsumerContext {
    definition: AnalyticsDefinition,
    data: ConnectionManager,
}

/// Consume the given subscription stream on behalf of one analytics until
/// the stream closes or the supervisor aborts the task.
pub async fn run(name: String, settings: Settings, mut stream: PubSubStream) {
    let ConsumerContext { definition, mut data } = match setup(&name, &settings).await {
        Ok(ctx) => ctx,
        Err(err) => {
            tracing::error!("worker '{name}' crashed during setup: {err:#}");
            std::future::pending::<()>().await;
            return;
        }
    };
    tracing::info!("worker '{name}' consuming for analytics '{}'", definition.name);
    while let Some(msg) = stream.next().await {
        let channel = msg.get_channel_name().to_string();
        let raw: String = match msg.get_payload() {
            Ok(raw) => raw,
            Err(err) => {
                tracing::error!("worker '{name}': undecodable message on '{channel}': {err}");
                continue;
            }
        };
        if let Err(err) = process_message(&definition, &mut data, &channel, &raw).await {
            tracing::error!("worker '{name}': error while consuming transaction: {err:#}");
            tracing::debug!("resource was: {channel}");
            tracing::debug!("data was: {raw}");
        }
    }
    tracing::warn!("worker '{name}': subscription stream closed");
}

/// Re-read the definition as stored at spawn time and connect to its data db.
async fn setup(name: &str, settings: &Settings) -> anyhow::Result<ConsumerContext> {
    let mut conf = store::config_connection(settings)
        .await
        .context("connecting to config db")?;
    let raw: Option<String> = conf.get(registry::definition_key(name)).await?;
    let raw = raw.ok_or_else(|| anyhow!("no stored definition for '{name}'"))?;
    let definition = AnalyticsDefinition::parse(&raw)?;
    let data = store::data_connection(settings, definition.data_db)
        .await
        .context("connecting to data db")?;
    Ok(ConsumerContext { definition, data })
}

async fn process_message(
    definition: &AnalyticsDefinition,
    data: &mut ConnectionManager,
    channel: &str,
    raw: &str,
) -> anyhow::Result<()> {
    let envelope: TransactionEnvelope = serde_json::from_str(raw)?;
    let tr_type = envelope.tr_type;
    let transaction = &envelope.payload;

    let query_key = dimension_key_segment(definition, &definition.query_dimensions, transaction)?;
    let slice_key = dimension_key_segment(definition, &definition.slice_dimensions, transaction)?;
    let snoq: Vec<String> = definition.snoq_dimensions().into_iter().collect();
    let snoq_key = dimension_key_segment(definition, &snoq, transaction)?;

    update_ref_counts(data, definition, tr_type, &slice_key, transaction).await?;

    for measure in &definition.measures {
        let Some(spec) = definition.measure_spec(measure) else {
            continue;
        };
        if spec.resource != channel {
            continue;
        }
        if !conditions_hold(&spec.conditions, transaction)? {
            continue;
        }
        let key = construct_key([
            KeyPart::from(measure),
            KeyPart::from(&query_key),
            KeyPart::from(&snoq_key),
        ]);
        let field_val = match &spec.field {
            Some(field) => Some(
                transaction
                    .get(field)
                    .ok_or_else(|| anyhow!("transaction is missing field '{field}'"))?,
            ),
            None => None,
        };
        measures::apply_measure(data, spec.kind, tr_type, &key, field_val).await?;
    }
    Ok(())
}

/// Track which values of each query-only dimension are live under the
/// current slice context. Hash fields carry the raw transaction values; the
/// browser canonicalizes them through the dimension parser when it
/// enumerates rows.
async fn update_ref_counts(
    data: &mut ConnectionManager,
    definition: &AnalyticsDefinition,
    tr_type: TrType,
    slice_key: &str,
    transaction: &Value,
) -> anyhow::Result<()> {
    for dimension in definition.qnos_dimensions() {
        let Some(spec) = definition.dimension(&dimension) else {
            continue;
        };
        let value = transaction
            .get(&spec.field)
            .ok_or_else(|| anyhow!("transaction is missing field '{}'", spec.field))?;
        let field = dimensions::scalar_to_string(value)?;
        let ref_key = construct_key([
            KeyPart::from("RefCount"),
            KeyPart::from(slice_key),
            KeyPart::from(&dimension),
        ]);
        match tr_type {
            TrType::Insert => {
                let _: i64 = data.hincr(&ref_key, &field, 1).await?;
            }
            TrType::Delete => {
                let remaining: i64 = data.hincr(&ref_key, &field, -1).await?;
                if remaining == 0 {
                    let _: i64 = data.hdel(&ref_key, &field).await?;
                }
            }
        }
    }
    Ok(())
}

/// Build the `<dim>:<value>:...` key segment for a set of dimensions,
/// visiting dimensions in sorted name order and normalizing each value
/// through its dimension parser.
fn dimension_key_segment(
    definition: &AnalyticsDefinition,
    dimensions: &[String],
    transaction: &Value,
) -> anyhow::Result<String> {
    let sorted: BTreeSet<&String> = dimensions.iter().collect();
    let mut parts: Vec<String> = Vec::with_capacity(sorted.len() * 2);
    for dimension in sorted {
        let spec = definition
            .dimension(dimension)
            .ok_or_else(|| anyhow!("dimension '{dimension}' is not mapped"))?;
        let value = transaction
            .get(&spec.field)
            .ok_or_else(|| anyhow!("transaction is missing field '{}'", spec.field))?;
        parts.push(dimension.clone());
        parts.push(spec.kind.parse_value(value)?);
    }
    Ok(construct_key(parts))
}

/// Short-circuit evaluation of a measure's condition guards.
fn conditions_hold(conditions: &[Condition], transaction: &Value) -> anyhow::Result<bool> {
    for condition in conditions {
        let actual = transaction.get(&condition.field).ok_or_else(|| {
            anyhow!("transaction is missing condition field '{}'", condition.field)
        })?;
        let holds = match &condition.predicate {
            Predicate::Equals(expected) => actual == expected,
            Predicate::NotEquals(expected) => actual != expected,
        };
        if !holds {
            return Ok(false);
        }
    }
    Ok(true)
}
