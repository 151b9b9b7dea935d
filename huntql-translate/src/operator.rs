use std::collections::BTreeMap;

use huntql_schema::{OperatorDoc, SchemaProvider};
use serde::Serialize;

use crate::error::TranslateError;

/// Lowercased operator token to the dialect's canonical symbol.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct OperatorTable {
    map: BTreeMap<String, String>,
}

impl OperatorTable {
    /// A table where each of the given symbols maps to itself.
    pub fn with_symbols(symbols: &[&str]) -> Self {
        let mut table = Self::default();
        for symbol in symbols {
            table.add_symbol(symbol);
        }
        table
    }

    /// Seeds with the dialect's built-in symbols, then folds in everything the
    /// schema documents.
    pub fn from_schema(seed: &[&str], schema: &dyn SchemaProvider) -> Self {
        let mut table = Self::with_symbols(seed);
        for doc in schema.operators() {
            table.add_documented(doc);
        }
        for variants in schema.operator_variants().values() {
            for variant in variants {
                table.add_symbol(&variant.operator);
            }
        }
        table
    }

    pub fn add_symbol(&mut self, symbol: &str) {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return;
        }
        self.map.insert(symbol.to_lowercase(), symbol.to_string());
    }

    /// Maps an extra token onto an existing canonical symbol.
    pub fn add_alias(&mut self, alias: &str, canonical: &str) {
        self.map
            .insert(alias.trim().to_lowercase(), canonical.to_string());
    }

    /// Maps every symbol to itself and the operator's name to `=` when it is
    /// one of the symbols, else to the first symbol.
    pub fn add_documented(&mut self, doc: &OperatorDoc) {
        for symbol in &doc.symbols {
            self.add_symbol(symbol);
        }

        let canonical = doc
            .symbols
            .iter()
            .find(|symbol| symbol.as_str() == "=")
            .or_else(|| doc.symbols.first());

        if let Some(canonical) = canonical {
            let name = doc.name.trim().to_lowercase();
            if !name.is_empty() {
                self.map.insert(name, canonical.clone());
            }
        }
    }

    pub fn normalize(&self, operator: &str) -> Result<String, TranslateError> {
        let key = operator.trim().to_lowercase();
        if let Some(canonical) = self.map.get(&key) {
            return Ok(canonical.clone());
        }

        let synonym = match key.as_str() {
            "==" => self.map.get("="),
            "contains ignorecase" | "containsignorecase" => self.map.get("contains anycase"),
            _ => None,
        };

        synonym
            .cloned()
            .ok_or_else(|| TranslateError::UnknownOperator(operator.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
