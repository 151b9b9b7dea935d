use std::{fs, path::Path};

use color_eyre::eyre::{Context, Result};
use serde_json::{Map, Value};
use tracing::info;

use crate::schema::Schema;

const DATASET_KEYS: &[&str] = &["datasets", "search_types", "tables"];

/// Reads a schema snapshot from a JSON file.
pub fn load_schema<P: AsRef<Path>>(path: P) -> Result<Schema> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read schema: {}", path.display()))?;
    let value: Value = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse schema: {}", path.display()))?;
    let schema = parse_schema(value)
        .with_context(|| format!("invalid schema layout: {}", path.display()))?;

    info!(
        path = %path.display(),
        datasets = schema.datasets.len(),
        operators = schema.operators.len(),
        "Loaded schema"
    );
    Ok(schema)
}

/// Builds a snapshot from JSON, also accepting the split layout where a
/// dataset entry is only a description string and its fields live under a
/// top level `<key>_fields` object.
pub fn parse_schema(mut value: Value) -> serde_json::Result<Schema> {
    if let Some(root) = value.as_object_mut() {
        fold_split_fields(root);
    }
    serde_json::from_value(value)
}

fn fold_split_fields(root: &mut Map<String, Value>) {
    let Some(key) = DATASET_KEYS.iter().find(|key| root.contains_key(**key)) else {
        return;
    };
    let Some(Value::Object(mut datasets)) = root.remove(*key) else {
        return;
    };

    for (name, meta) in datasets.iter_mut() {
        if let Value::String(description) = meta {
            let mut expanded = Map::new();
            expanded.insert("description".to_string(), Value::String(description.clone()));
            *meta = Value::Object(expanded);
        }

        let Value::Object(meta) = meta else {
            continue;
        };
        if meta.contains_key("fields") || meta.contains_key("columns") {
            continue;
        }
        if let Some(fields) = root.remove(&format!("{name}_fields")) {
            meta.insert("fields".to_string(), fields);
        }
    }

    root.insert(key.to_string(), Value::Object(datasets));
}
