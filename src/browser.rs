//! The query browser: expands slice parameters, enumerates the
//! combinatorial key space, and assembles result rows from stored measures.
//!
//! Enumeration order is defined: dimensions in sorted name order, values in
//! sorted string order, the least dimension varying slowest.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::Serialize;
use serde_json::Value;

use crate::config::Settings;
use crate::error::AppError;
use crate::keys::{KeyPart, construct_key};
use crate::measures::MeasureType;
use crate::models::definition::{AnalyticsDefinition, MeasureSpec};
use crate::registry;
use crate::store;

pub type Row = serde_json::Map<String, Value>;

#[derive(Debug, Serialize)]
pub struct BrowseResponse {
    pub status: &'static str,
    pub data: Vec<Row>,
}

/// A dimension name paired with its sorted candidate values.
type DimensionRange = (String, Vec<String>);

/// Enumerate the Cartesian product of the given ranges as `(dim, value)`
/// pair lists. Ranges are visited in order, the first varying slowest; no
/// ranges at all yields a single empty key.
pub fn combinatorial_keys(ranges: &[DimensionRange]) -> Vec<Vec<(String, String)>> {
    let mut keys: Vec<Vec<(String, String)>> = vec![Vec::new()];
    for (dimension, values) in ranges {
        let mut next = Vec::with_capacity(keys.len() * values.len());
        for prefix in &keys {
            for value in values {
                let mut key = prefix.clone();
                key.push((dimension.clone(), value.clone()));
                next.push(key);
            }
        }
        keys = next;
    }
    keys
}

fn key_segments(pairs: &[(String, String)]) -> KeyPart {
    KeyPart::Group(
        pairs
            .iter()
            .flat_map(|(dimension, value)| [KeyPart::from(dimension), KeyPart::from(value)])
            .collect(),
    )
}

fn range_of(
    dimensions: &BTreeSet<String>,
    value_sets: &BTreeMap<String, BTreeSet<String>>,
) -> Vec<DimensionRange> {
    dimensions
        .iter()
        .map(|dimension| {
            let values = value_sets
                .get(dimension)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();
            (dimension.clone(), values)
        })
        .collect()
}

/// Evaluate a slice-and-dice query against one analytics.
pub async fn browse_analytics(
    settings: &Settings,
    conf: &mut ConnectionManager,
    name: &str,
    slice_args: &HashMap<String, String>,
) -> Result<BrowseResponse, AppError> {
    let active: bool = conf.sismember(registry::ACTIVE_KEY, name).await?;
    if !active {
        return Err(AppError::not_found(
            "Analytics not found",
            format!("Analytics '{name}' is not active"),
        ));
    }
    let raw: Option<String> = conf.get(registry::definition_key(name)).await?;
    let Some(raw) = raw else {
        return Err(AppError::not_found(
            "Analytics not found",
            format!("Analytics '{name}' has no stored definition"),
        ));
    };
    let definition = AnalyticsDefinition::parse(&raw)
        .map_err(|err| AppError::service_unavailable(err.to_string(), name))?;
    let mut data = store::data_connection(settings, definition.data_db).await?;

    // Bind every slice dimension from its query parameter.
    let mut value_sets: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for dimension in &definition.slice_dimensions {
        let spec = definition.dimension(dimension).ok_or_else(|| {
            AppError::service_unavailable("Invalid analytics definition", dimension)
        })?;
        let expr = slice_args
            .get(dimension)
            .ok_or_else(|| AppError::bad_request("Missing slice parameter", dimension))?;
        let values = spec
            .kind
            .expand(expr)
            .map_err(|err| AppError::bad_request(err.to_string(), dimension))?;
        value_sets.insert(dimension.clone(), values);
    }

    let slice_set: BTreeSet<String> = definition.slice_dimensions.iter().cloned().collect();
    let query_set: BTreeSet<String> = definition.query_dimensions.iter().cloned().collect();
    let qnos = definition.qnos_dimensions();
    let snoq = definition.snoq_dimensions();

    let s_range = range_of(&slice_set, &value_sets);
    let snoq_range = range_of(&snoq, &value_sets);

    // Query-only dimensions have no parameter; discover their observed
    // values from the RefCount hashes under every slice context. Hash
    // fields hold raw transaction values, while rows and value keys use
    // canonical forms, so each field goes through the dimension parser.
    for dimension in &qnos {
        let spec = definition.dimension(dimension).ok_or_else(|| {
            AppError::service_unavailable("Invalid analytics definition", dimension)
        })?;
        let mut observed = BTreeSet::new();
        for s_key in combinatorial_keys(&s_range) {
            let ref_key = construct_key([
                KeyPart::from("RefCount"),
                key_segments(&s_key),
                KeyPart::from(dimension),
            ]);
            let fields: Vec<String> = data.hkeys(&ref_key).await?;
            for field in fields {
                let value = spec.kind.parse_str(&field).map_err(|_| {
                    AppError::service_unavailable("Corrupt reference count field", &ref_key)
                })?;
                observed.insert(value);
            }
        }
        value_sets.insert(dimension.clone(), observed);
    }

    let q_range = range_of(&query_set, &value_sets);
    let snoq_keys = combinatorial_keys(&snoq_range);

    let mut rows = Vec::new();
    for q_key in combinatorial_keys(&q_range) {
        let mut row = Row::new();
        for (dimension, value) in &q_key {
            row.insert(dimension.clone(), Value::String(value.clone()));
        }
        for measure in &definition.measures {
            let spec = definition.measure_spec(measure).ok_or_else(|| {
                AppError::service_unavailable("Invalid analytics definition", measure)
            })?;
            let value = read_measure(&mut data, measure, spec, &q_key, &snoq_keys).await?;
            row.insert(measure.clone(), value);
        }
        rows.push(row);
    }

    Ok(BrowseResponse { status: "OK", data: rows })
}

/// Read one measure for one output row. A single (or absent) snoq key is a
/// point read; multiple snoq keys are summed, which `unique` cannot support.
async fn read_measure(
    data: &mut ConnectionManager,
    name: &str,
    spec: &MeasureSpec,
    q_key: &[(String, String)],
    snoq_keys: &[Vec<(String, String)>],
) -> Result<Value, AppError> {
    let is_float = spec.kind.is_float();
    if snoq_keys.len() < 2 {
        let snoq_part = snoq_keys.first().map(|key| key_segments(key));
        let val_key = construct_key([
            KeyPart::from(name),
            key_segments(q_key),
            KeyPart::from(snoq_part),
        ]);
        if spec.kind == MeasureType::Unique {
            let cardinality: i64 = data.scard(&val_key).await?;
            return Ok(Value::from(cardinality));
        }
        let raw: Option<String> = data.get(&val_key).await?;
        return coerce_measure(&val_key, raw.as_deref(), is_float);
    }

    if spec.kind == MeasureType::Unique {
        return Err(AppError::bad_request(
            "Measure type 'unique' cannot be aggregated",
            name,
        ));
    }
    let mut int_total: i64 = 0;
    let mut float_total: f64 = 0.0;
    for snoq_key in snoq_keys {
        let val_key = construct_key([
            KeyPart::from(name),
            key_segments(q_key),
            key_segments(snoq_key),
        ]);
        let raw: Option<String> = data.get(&val_key).await?;
        let Some(raw) = raw else { continue };
        if is_float {
            float_total += parse_float(&val_key, &raw)?;
        } else {
            int_total += parse_int(&val_key, &raw)?;
        }
    }
    Ok(if is_float { Value::from(float_total) } else { Value::from(int_total) })
}

fn coerce_measure(key: &str, raw: Option<&str>, is_float: bool) -> Result<Value, AppError> {
    match raw {
        None => Ok(if is_float { Value::from(0.0) } else { Value::from(0) }),
        Some(raw) if is_float => parse_float(key, raw).map(Value::from),
        Some(raw) => parse_int(key, raw).map(Value::from),
    }
}

fn parse_int(key: &str, raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::service_unavailable("Corrupt measure value", key))
}

fn parse_float(key: &str, raw: &str) -> Result<f64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::service_unavailable("Corrupt measure value", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(dimension: &str, values: &[&str]) -> DimensionRange {
        (dimension.to_string(), values.iter().map(|v| v.to_string()).collect())
    }

    #[test]
    fn empty_ranges_yield_single_empty_key() {
        assert_eq!(combinatorial_keys(&[]), vec![Vec::new()]);
    }

    #[test]
    fn product_order_is_nested_with_first_dimension_outermost() {
        let keys = combinatorial_keys(&[range("d1", &["1", "2"]), range("d2", &["3", "4"])]);
        let rendered: Vec<String> = keys
            .iter()
            .map(|key| construct_key([key_segments(key)]))
            .collect();
        assert_eq!(
            rendered,
            vec!["d1:1:d2:3", "d1:1:d2:4", "d1:2:d2:3", "d1:2:d2:4"]
        );
    }

    #[test]
    fn empty_value_set_empties_the_product() {
        let keys = combinatorial_keys(&[range("d1", &["1"]), range("d2", &[])]);
        assert!(keys.is_empty());
    }

    #[test]
    fn measure_coercion_defaults_to_zero() {
        assert_eq!(coerce_measure("k", None, false).unwrap(), Value::from(0));
        assert_eq!(coerce_measure("k", None, true).unwrap(), Value::from(0.0));
        assert_eq!(coerce_measure("k", Some("42"), false).unwrap(), Value::from(42));
        assert_eq!(coerce_measure("k", Some("1.5"), true).unwrap(), Value::from(1.5));
        assert!(coerce_measure("k", Some("wat"), false).is_err());
    }
}
