use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::field::FieldMap;

/// A named data source inside a dialect (a dataset, search type or table).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetMeta {
    /// Human readable display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, alias = "columns")]
    pub fields: FieldMap,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_fields: Vec<String>,

    /// Event types a query over this dataset must always be restricted to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub event_filter: Vec<String>,

    /// Hand written queries shipped with the schema for this dataset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub example_queries: Vec<String>,

    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub metadata: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDoc {
    pub name: String,

    #[serde(default)]
    pub symbols: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorVariant {
    pub operator: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key_fields: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
}

impl FieldGroup {
    /// The fields a projection heuristic should consider, key fields first.
    pub fn preferred(&self) -> &[String] {
        if self.key_fields.is_empty() {
            &self.fields
        } else {
            &self.key_fields
        }
    }
}

/// Read-only snapshot of one dialect's schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, alias = "tables", alias = "search_types")]
    pub datasets: BTreeMap<String, DatasetMeta>,

    /// Fields shared by every dataset.
    #[serde(default)]
    pub common_fields: FieldMap,

    /// Accepts a bare list or one wrapped as `{"operators": [...]}`.
    #[serde(default, deserialize_with = "operator_docs")]
    pub operators: Vec<OperatorDoc>,

    #[serde(default)]
    pub operator_variants: BTreeMap<String, Vec<OperatorVariant>>,

    #[serde(default)]
    pub field_groups: BTreeMap<String, FieldGroup>,

    /// Query writing guidance, a list of tips or a document keyed by topic.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub best_practices: Value,

    /// Example queries grouped by category.
    #[serde(default)]
    pub example_queries: BTreeMap<String, Value>,
}

fn operator_docs<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<OperatorDoc>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Docs {
        List(Vec<OperatorDoc>),
        Wrapped { operators: Vec<OperatorDoc> },
    }

    Ok(match Docs::deserialize(deserializer)? {
        Docs::List(docs) | Docs::Wrapped { operators: docs } => docs,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn wrapped_operator_list() {
        let schema: Schema = serde_json::from_value(json!({
            "operators": {"operators": [{"name": "equals", "symbols": ["==", "="]}]}
        }))
        .unwrap();
        assert_eq!(schema.operators.len(), 1);
        assert_eq!(schema.operators[0].symbols, vec!["==", "="]);
    }

    #[test]
    fn search_types_alias_and_columns() {
        let schema: Schema = serde_json::from_value(json!({
            "search_types": {"process_search": {"columns": {"process_name": {}}}},
            "operators": [{"name": "in", "symbols": ["in"]}]
        }))
        .unwrap();
        assert!(schema.datasets["process_search"].fields.contains_key("process_name"));
        assert_eq!(schema.operators[0].name, "in");
    }

    #[test]
    fn guidance_and_examples() {
        let schema: Schema = serde_json::from_value(json!({
            "tables": {
                "DeviceEvents": {"example_queries": ["DeviceEvents | take 10"]}
            },
            "best_practices": ["Prefer field searches over full text"],
            "example_queries": {"powershell": [{"query": "process_name:powershell.exe"}]}
        }))
        .unwrap();
        assert_eq!(
            schema.datasets["DeviceEvents"].example_queries,
            vec!["DeviceEvents | take 10"]
        );
        assert_eq!(schema.best_practices, json!(["Prefer field searches over full text"]));
        assert_eq!(
            schema.example_queries["powershell"],
            json!([{"query": "process_name:powershell.exe"}])
        );
    }
}
