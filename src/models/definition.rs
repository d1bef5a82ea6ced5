//! The analytics definition: a declarative JSON document mapping domain
//! fields onto typed dimensions and measures.
//!
//! The document is validated once, at load or at spawn, and lives on as a
//! fully typed structure; nothing downstream touches the raw JSON map.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::dimensions::DimensionType;
use crate::measures::MeasureType;

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("invalid analytics definition: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid analytics definition: {0}")]
    Invalid(String),
}

fn invalid(message: impl Into<String>) -> DefinitionError {
    DefinitionError::Invalid(message.into())
}

/// A validated analytics definition.
#[derive(Debug, Clone)]
pub struct AnalyticsDefinition {
    pub name: String,
    pub description: Option<String>,
    pub query_dimensions: Vec<String>,
    pub slice_dimensions: Vec<String>,
    pub measures: Vec<String>,
    pub data_db: Option<i64>,
    pub mapping: BTreeMap<String, MappingEntry>,
}

#[derive(Debug, Clone)]
pub enum MappingEntry {
    Dimension(DimensionSpec),
    Measure(MeasureSpec),
}

#[derive(Debug, Clone)]
pub struct DimensionSpec {
    pub kind: DimensionType,
    pub field: String,
}

#[derive(Debug, Clone)]
pub struct MeasureSpec {
    pub kind: MeasureType,
    pub resource: String,
    pub field: Option<String>,
    pub conditions: Vec<Condition>,
}

/// A guard on a measure: the transaction field must (not) equal a value.
#[derive(Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub predicate: Predicate,
}

#[derive(Debug, Clone)]
pub enum Predicate {
    Equals(Value),
    NotEquals(Value),
}

#[derive(Deserialize)]
struct RawDefinition {
    name: Option<String>,
    description: Option<String>,
    query_dimensions: Option<Vec<String>>,
    slice_dimensions: Option<Vec<String>>,
    data_db: Option<i64>,
    measures: Option<Vec<String>>,
    mapping: Option<BTreeMap<String, RawMappingEntry>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct RawMappingEntry {
    #[serde(rename = "type")]
    kind: Option<String>,
    field: Option<String>,
    resource: Option<String>,
    conditions: Option<Vec<RawCondition>>,
}

#[derive(Deserialize)]
struct RawCondition {
    field: Option<String>,
    equals: Option<Value>,
    not_equals: Option<Value>,
}

impl AnalyticsDefinition {
    /// Parse and validate a definition document. Fails on malformed JSON
    /// and on any schema invariant violation, naming the offending field.
    pub fn parse(raw_json: &str) -> Result<Self, DefinitionError> {
        let raw: RawDefinition = serde_json::from_str(raw_json)?;
        Self::validate(raw)
    }

    fn validate(raw: RawDefinition) -> Result<Self, DefinitionError> {
        if let Some(key) = raw.extra.keys().next() {
            return Err(invalid(format!("definition has unexpected key '{key}'")));
        }
        let name = raw.name.ok_or_else(|| invalid("definition doesn't have 'name'"))?;
        if name.contains(':') {
            return Err(invalid("analytics name cannot contain ':'"));
        }
        let measures = raw
            .measures
            .ok_or_else(|| invalid("definition doesn't contain 'measures' array"))?;
        let query_dimensions = raw
            .query_dimensions
            .ok_or_else(|| invalid("definition doesn't contain 'query_dimensions' array"))?;
        let slice_dimensions = raw
            .slice_dimensions
            .ok_or_else(|| invalid("definition doesn't contain 'slice_dimensions' array"))?;
        let raw_mapping = raw
            .mapping
            .ok_or_else(|| invalid("definition doesn't contain 'mapping' dictionary"))?;

        if measures.is_empty() {
            return Err(invalid("definition should contain at least one measure"));
        }

        let mut mapping = BTreeMap::new();
        let mut mapped: BTreeSet<&str> = BTreeSet::new();

        for measure in &measures {
            let entry = raw_mapping
                .get(measure)
                .ok_or_else(|| invalid(format!("measure '{measure}' doesn't have a mapping")))?;
            mapped.insert(measure);
            let resource = entry
                .resource
                .clone()
                .ok_or_else(|| invalid(format!("measure '{measure}' is missing 'resource'")))?;
            let kind_name = entry
                .kind
                .as_deref()
                .ok_or_else(|| invalid(format!("measure '{measure}' is missing 'type'")))?;
            let kind = MeasureType::parse(kind_name).ok_or_else(|| {
                invalid(format!(
                    "measure '{measure}' type '{kind_name}' is not a valid measure type"
                ))
            })?;
            if kind.requires_field() && entry.field.is_none() {
                return Err(invalid(format!(
                    "measure '{measure}' has type '{kind_name}' but is missing 'field'"
                )));
            }
            let mut conditions = Vec::new();
            for condition in entry.conditions.as_deref().unwrap_or_default() {
                let field = condition.field.clone().ok_or_else(|| {
                    invalid(format!(
                        "conditional measure '{measure}' missing 'field' in one of the conditions"
                    ))
                })?;
                let predicate = match (&condition.equals, &condition.not_equals) {
                    (Some(value), None) => Predicate::Equals(value.clone()),
                    (None, Some(value)) => Predicate::NotEquals(value.clone()),
                    (None, None) => {
                        return Err(invalid(format!(
                            "conditional measure '{measure}' field '{field}' has no conditions"
                        )));
                    }
                    (Some(_), Some(_)) => {
                        return Err(invalid(format!(
                            "conditional measure '{measure}' field '{field}' has > 1 conditions"
                        )));
                    }
                };
                conditions.push(Condition { field, predicate });
            }
            mapping.insert(
                measure.clone(),
                MappingEntry::Measure(MeasureSpec {
                    kind,
                    resource,
                    field: entry.field.clone(),
                    conditions,
                }),
            );
        }

        for dimension in query_dimensions.iter().chain(slice_dimensions.iter()) {
            let entry = raw_mapping.get(dimension).ok_or_else(|| {
                invalid(format!("dimension '{dimension}' doesn't have a mapping"))
            })?;
            mapped.insert(dimension);
            let kind_name = entry
                .kind
                .as_deref()
                .ok_or_else(|| invalid(format!("dimension '{dimension}' is missing 'type'")))?;
            let kind = DimensionType::parse(kind_name).ok_or_else(|| {
                invalid(format!(
                    "dimension '{dimension}' type '{kind_name}' is not a valid dimension type"
                ))
            })?;
            let field = entry
                .field
                .clone()
                .ok_or_else(|| invalid(format!("dimension '{dimension}' is missing 'field'")))?;
            mapping.insert(
                dimension.clone(),
                MappingEntry::Dimension(DimensionSpec { kind, field }),
            );
        }

        let unmapped: Vec<&str> = raw_mapping
            .keys()
            .map(String::as_str)
            .filter(|key| !mapped.contains(key))
            .collect();
        if !unmapped.is_empty() {
            return Err(invalid(format!(
                "unmapped keys in mapping: [{}]",
                unmapped.join(",")
            )));
        }

        Ok(Self {
            name,
            description: raw.description,
            query_dimensions,
            slice_dimensions,
            measures,
            data_db: raw.data_db,
            mapping,
        })
    }

    pub fn dimension(&self, name: &str) -> Option<&DimensionSpec> {
        match self.mapping.get(name) {
            Some(MappingEntry::Dimension(spec)) => Some(spec),
            _ => None,
        }
    }

    pub fn measure_spec(&self, name: &str) -> Option<&MeasureSpec> {
        match self.mapping.get(name) {
            Some(MappingEntry::Measure(spec)) => Some(spec),
            _ => None,
        }
    }

    /// Query dimensions that are not slice dimensions ("qnos").
    pub fn qnos_dimensions(&self) -> BTreeSet<String> {
        let slice: BTreeSet<&str> = self.slice_dimensions.iter().map(String::as_str).collect();
        self.query_dimensions
            .iter()
            .filter(|d| !slice.contains(d.as_str()))
            .cloned()
            .collect()
    }

    /// Slice dimensions that are not query dimensions ("snoq").
    pub fn snoq_dimensions(&self) -> BTreeSet<String> {
        let query: BTreeSet<&str> = self.query_dimensions.iter().map(String::as_str).collect();
        self.slice_dimensions
            .iter()
            .filter(|d| !query.contains(d.as_str()))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> serde_json::Value {
        serde_json::json!({
            "name": "activity",
            "description": "daily visits per practice",
            "query_dimensions": ["Date"],
            "slice_dimensions": ["Practice"],
            "measures": ["visits"],
            "data_db": 3,
            "mapping": {
                "Date": {"type": "date", "field": "ts"},
                "Practice": {"type": "integer", "field": "practice_id"},
                "visits": {"type": "count", "resource": "page"}
            }
        })
    }

    fn parse(value: serde_json::Value) -> Result<AnalyticsDefinition, DefinitionError> {
        AnalyticsDefinition::parse(&value.to_string())
    }

    fn assert_invalid(value: serde_json::Value, needle: &str) {
        match parse(value) {
            Err(DefinitionError::Invalid(message)) => {
                assert!(message.contains(needle), "message was: {message}");
            }
            other => panic!("expected invalid-definition error, got {other:?}"),
        }
    }

    #[test]
    fn valid_definition_parses() {
        let definition = parse(sample()).unwrap();
        assert_eq!(definition.name, "activity");
        assert_eq!(definition.data_db, Some(3));
        assert_eq!(definition.measures, vec!["visits"]);
        assert!(matches!(
            definition.measure_spec("visits"),
            Some(MeasureSpec { kind: MeasureType::Count, .. })
        ));
        assert!(matches!(
            definition.dimension("Date"),
            Some(DimensionSpec { kind: DimensionType::Date, .. })
        ));
    }

    #[test]
    fn qnos_and_snoq_partitions() {
        let definition = parse(sample()).unwrap();
        assert_eq!(definition.qnos_dimensions(), ["Date".to_string()].into());
        assert_eq!(definition.snoq_dimensions(), ["Practice".to_string()].into());
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            AnalyticsDefinition::parse("{not json"),
            Err(DefinitionError::Parse(_))
        ));
    }

    #[test]
    fn rejects_missing_top_level_keys() {
        for key in ["name", "measures", "query_dimensions", "slice_dimensions", "mapping"] {
            let mut doc = sample();
            doc.as_object_mut().unwrap().remove(key);
            assert_invalid(doc, key);
        }
    }

    #[test]
    fn rejects_unexpected_top_level_key() {
        let mut doc = sample();
        doc["retention"] = serde_json::json!(30);
        assert_invalid(doc, "unexpected key 'retention'");
    }

    #[test]
    fn rejects_colon_in_name() {
        let mut doc = sample();
        doc["name"] = serde_json::json!("a:b");
        assert_invalid(doc, "cannot contain ':'");
    }

    #[test]
    fn rejects_empty_measures() {
        let mut doc = sample();
        doc["measures"] = serde_json::json!([]);
        doc["mapping"].as_object_mut().unwrap().remove("visits");
        assert_invalid(doc, "at least one measure");
    }

    #[test]
    fn rejects_measure_without_mapping() {
        let mut doc = sample();
        doc["measures"] = serde_json::json!(["visits", "revenue"]);
        assert_invalid(doc, "measure 'revenue' doesn't have a mapping");
    }

    #[test]
    fn rejects_unknown_measure_type() {
        let mut doc = sample();
        doc["mapping"]["visits"]["type"] = serde_json::json!("median");
        assert_invalid(doc, "not a valid measure type");
    }

    #[test]
    fn rejects_unknown_dimension_type() {
        let mut doc = sample();
        doc["mapping"]["Date"]["type"] = serde_json::json!("timestamp");
        assert_invalid(doc, "not a valid dimension type");
    }

    #[test]
    fn rejects_score_without_field() {
        let mut doc = sample();
        doc["mapping"]["visits"]["type"] = serde_json::json!("score");
        assert_invalid(doc, "missing 'field'");
    }

    #[test]
    fn rejects_condition_with_no_filter() {
        let mut doc = sample();
        doc["mapping"]["visits"]["conditions"] = serde_json::json!([{"field": "status"}]);
        assert_invalid(doc, "has no conditions");
    }

    #[test]
    fn rejects_condition_with_both_filters() {
        let mut doc = sample();
        doc["mapping"]["visits"]["conditions"] =
            serde_json::json!([{"field": "status", "equals": "a", "not_equals": "b"}]);
        assert_invalid(doc, "> 1 conditions");
    }

    #[test]
    fn rejects_unmapped_extra_mapping_keys() {
        let mut doc = sample();
        doc["mapping"]["Orphan"] = serde_json::json!({"type": "string", "field": "x"});
        assert_invalid(doc, "unmapped keys in mapping: [Orphan]");
    }
}
