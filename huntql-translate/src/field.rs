use huntql_schema::FieldMap;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::TranslateError;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_@][A-Za-z0-9_.@\-]*$").expect("identifier regex"));

/// Returns the first candidate present in the field map.
pub fn resolve_field<'a>(candidates: &[&'a str], fields: &FieldMap) -> Option<&'a str> {
    candidates
        .iter()
        .copied()
        .find(|candidate| fields.contains_key(*candidate))
}

/// Field names matching `keyword` case-insensitively, names that start with
/// it ahead of names that merely contain it. No keyword lists every field.
pub fn suggest_fields<'a>(fields: &'a FieldMap, keyword: Option<&str>) -> Vec<&'a str> {
    let Some(keyword) = keyword.map(str::trim).filter(|k| !k.is_empty()) else {
        return fields.keys().map(String::as_str).collect();
    };
    let keyword = keyword.to_lowercase();

    let mut matches: Vec<(bool, &str)> = fields
        .keys()
        .filter_map(|name| {
            let lowered = name.to_lowercase();
            lowered
                .contains(&keyword)
                .then(|| (!lowered.starts_with(&keyword), name.as_str()))
        })
        .collect();
    matches.sort();
    matches.into_iter().map(|(_, name)| name).collect()
}

/// Rejects names that could smuggle syntax into a projection or filter.
pub fn validate_identifier(name: &str) -> Result<(), TranslateError> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(TranslateError::InvalidIdentifier(name.to_string()))
    }
}
