use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Field name to metadata, for one resolved dataset.
pub type FieldMap = BTreeMap<String, FieldMeta>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMeta {
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the field should be projected when nothing else asks for fields.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default_field: bool,
}

/// Coarse classification of a field's declared type, as far as literal
/// formatting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Numeric,
    Boolean,
    Other,
}

impl FieldMeta {
    pub fn typed(data_type: &str) -> Self {
        Self {
            data_type: Some(data_type.to_string()),
            ..Default::default()
        }
    }

    pub fn data_type(&self) -> DataType {
        let Some(data_type) = &self.data_type else {
            return DataType::Other;
        };

        match data_type.trim().to_ascii_lowercase().as_str() {
            "numeric" | "number" | "int" | "integer" | "long" | "int32" | "int64" => {
                DataType::Numeric
            }
            "bool" | "boolean" => DataType::Boolean,
            _ => DataType::Other,
        }
    }
}
