//! Measure update primitives.
//!
//! Integer measures ride on the store's native atomic `INCRBY`/`DECRBY`;
//! float variants read-modify-write the single key inside an optimistic
//! `WATCH`/`MULTI`/`EXEC` transaction, retried until it commits. `unique`
//! tracks set cardinality and has no delete inverse.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::dimensions::{self, ValueError};
use crate::models::transaction::TrType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeasureType {
    Count,
    Score,
    Heat,
    Unique,
    CountFloat,
    ScoreFloat,
    HeatFloat,
}

impl MeasureType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "count" => Some(Self::Count),
            "score" => Some(Self::Score),
            "heat" => Some(Self::Heat),
            "unique" => Some(Self::Unique),
            "count_float" => Some(Self::CountFloat),
            "score_float" => Some(Self::ScoreFloat),
            "heat_float" => Some(Self::HeatFloat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Score => "score",
            Self::Heat => "heat",
            Self::Unique => "unique",
            Self::CountFloat => "count_float",
            Self::ScoreFloat => "score_float",
            Self::HeatFloat => "heat_float",
        }
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Self::CountFloat | Self::ScoreFloat | Self::HeatFloat)
    }

    /// `score`, `score_float` and `unique` read a source field off the
    /// transaction; the counting types do not.
    pub fn requires_field(&self) -> bool {
        matches!(self, Self::Score | Self::ScoreFloat | Self::Unique)
    }
}

#[derive(Debug, Error)]
pub enum MeasureError {
    #[error("measure update failed: {0}")]
    Store(#[from] redis::RedisError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("measure expects a numeric field value, got '{0}'")]
    NotNumeric(String),
    #[error("measure requires a field value")]
    MissingFieldValue,
}

/// Apply one measure update for a transaction against the given aggregate
/// key. `field_val` carries the raw transaction field for the measure types
/// that declare one.
pub async fn apply_measure(
    conn: &mut ConnectionManager,
    measure: MeasureType,
    tr_type: TrType,
    key: &str,
    field_val: Option<&Value>,
) -> Result<(), MeasureError> {
    match measure {
        MeasureType::Count => score(conn, tr_type, key, 1).await,
        MeasureType::Score => score(conn, tr_type, key, integer_field(field_val)?).await,
        // Heat is monotone: deletes count as activity too.
        MeasureType::Heat => score(conn, TrType::Insert, key, 1).await,
        MeasureType::Unique => match tr_type {
            TrType::Insert => {
                let member = match field_val {
                    Some(value) => dimensions::scalar_to_string(value)?,
                    None => return Err(MeasureError::MissingFieldValue),
                };
                let _: i64 = conn.sadd(key, member).await?;
                let _: i64 = conn.scard(key).await?;
                Ok(())
            }
            // No defined inverse for cardinality.
            TrType::Delete => Ok(()),
        },
        MeasureType::CountFloat => score_float(conn, tr_type, key, 1.0).await,
        MeasureType::ScoreFloat => {
            score_float(conn, tr_type, key, float_field(field_val)?).await
        }
        MeasureType::HeatFloat => score_float(conn, TrType::Insert, key, 1.0).await,
    }
}

async fn score(
    conn: &mut ConnectionManager,
    tr_type: TrType,
    key: &str,
    amount: i64,
) -> Result<(), MeasureError> {
    match tr_type {
        TrType::Insert => {
            let _: i64 = conn.incr(key, amount).await?;
        }
        TrType::Delete => {
            let _: i64 = conn.decr(key, amount).await?;
        }
    }
    Ok(())
}

async fn score_float(
    conn: &mut ConnectionManager,
    tr_type: TrType,
    key: &str,
    amount: f64,
) -> Result<(), MeasureError> {
    let delta = match tr_type {
        TrType::Insert => amount,
        TrType::Delete => -amount,
    };
    float_incr(conn, key, delta).await
}

/// Optimistic single-key float increment: WATCH the key, read, write the
/// sum inside MULTI/EXEC, retry when the key changed under the watch.
async fn float_incr(
    conn: &mut ConnectionManager,
    key: &str,
    delta: f64,
) -> Result<(), MeasureError> {
    loop {
        let _: () = redis::cmd("WATCH").arg(key).query_async(&mut *conn).await?;
        let current: Option<String> = conn.get(key).await?;
        let current = match current.as_deref() {
            Some(raw) => match raw.trim().parse::<f64>() {
                Ok(v) => v,
                Err(_) => {
                    let _: () = redis::cmd("UNWATCH").query_async(&mut *conn).await?;
                    return Err(MeasureError::NotNumeric(raw.to_string()));
                }
            },
            None => 0.0,
        };
        let mut pipe = redis::pipe();
        pipe.atomic().set(key, (current + delta).to_string()).ignore();
        let committed: Option<()> = pipe.query_async(&mut *conn).await?;
        if committed.is_some() {
            return Ok(());
        }
    }
}

fn integer_field(field_val: Option<&Value>) -> Result<i64, MeasureError> {
    let value = field_val.ok_or(MeasureError::MissingFieldValue)?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| MeasureError::NotNumeric(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| MeasureError::NotNumeric(s.clone())),
        other => Err(MeasureError::NotNumeric(other.to_string())),
    }
}

fn float_field(field_val: Option<&Value>) -> Result<f64, MeasureError> {
    let value = field_val.ok_or(MeasureError::MissingFieldValue)?;
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| MeasureError::NotNumeric(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| MeasureError::NotNumeric(s.clone())),
        other => Err(MeasureError::NotNumeric(other.to_string())),
    }
}
