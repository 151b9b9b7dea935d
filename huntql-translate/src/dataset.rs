use std::collections::BTreeMap;

use huntql_schema::DatasetMeta;
use serde::Serialize;
use tracing::debug;

use crate::error::TranslateError;

/// Lowercase, trimmed, with whitespace runs collapsed to `_`.
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Explicit,
    Inferred,
    Default,
    First,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Resolution {
    pub key: String,
    pub source: ResolutionSource,
    pub log: Vec<String>,
}

impl Resolution {
    pub fn new(key: &str, source: ResolutionSource) -> Self {
        Self {
            key: key.to_string(),
            source,
            log: Vec::new(),
        }
    }

    pub fn logged(mut self, entry: String) -> Self {
        debug!(key = %self.key, source = ?self.source, %entry, "Resolved dataset");
        self.log.push(entry);
        self
    }
}

/// Per-dialect tables that drive dataset / search type / table resolution.
#[derive(Debug, Clone, Copy)]
pub struct DatasetResolver {
    /// What the dialect calls a dataset, for error messages.
    pub noun: &'static str,
    pub aliases: &'static [(&'static str, &'static str)],
    /// Keyword to key, first match in table order wins.
    pub keywords: &'static [(&'static str, &'static str)],
    pub default: Option<&'static str>,
    pub fallback_to_first: bool,
}

impl DatasetResolver {
    pub fn resolve(
        &self,
        requested: Option<&str>,
        free_text: Option<&str>,
        datasets: &BTreeMap<String, DatasetMeta>,
    ) -> Result<Resolution, TranslateError> {
        if datasets.is_empty() {
            return Err(TranslateError::NoDatasets(self.noun));
        }

        if let Some(requested) = requested.filter(|r| !r.trim().is_empty()) {
            return self.resolve_requested(requested, datasets);
        }

        if let Some(text) = free_text {
            let lowered = text.to_lowercase();
            for (keyword, key) in self.keywords {
                if !contains_at_word_start(&lowered, keyword) {
                    continue;
                }
                if let Some(found) = find_key(datasets, key) {
                    return Ok(Resolution::new(found, ResolutionSource::Inferred)
                        .logged(format!("inferred_from_intent:{keyword}->{found}")));
                }
            }
        }

        if let Some(found) = self.default.and_then(|d| find_key(datasets, d)) {
            return Ok(Resolution::new(found, ResolutionSource::Default)
                .logged(format!("defaulted_to:{found}")));
        }

        if self.fallback_to_first {
            if let Some(first) = datasets.keys().next() {
                return Ok(Resolution::new(first, ResolutionSource::First)
                    .logged(format!("defaulted_to:{first}")));
            }
        }

        Err(TranslateError::InsufficientInput(format!(
            "{} is required",
            capitalize(self.noun)
        )))
    }

    fn resolve_requested(
        &self,
        requested: &str,
        datasets: &BTreeMap<String, DatasetMeta>,
    ) -> Result<Resolution, TranslateError> {
        let cleaned = normalize_key(requested);

        let aliased = self
            .aliases
            .iter()
            .find(|(alias, _)| *alias == cleaned)
            .and_then(|(_, target)| find_key(datasets, target));
        if let Some(found) = aliased.or_else(|| find_key(datasets, &cleaned)) {
            let resolution = Resolution::new(found, ResolutionSource::Explicit);
            return Ok(if found == requested {
                resolution
            } else {
                resolution.logged(format!("normalised_from:{requested}->{found}"))
            });
        }

        let wanted_display = requested.trim().to_lowercase();
        let by_display = datasets.iter().find(|(_, meta)| {
            meta.name
                .as_deref()
                .is_some_and(|name| name.trim().to_lowercase() == wanted_display)
        });
        if let Some((found, _)) = by_display {
            return Ok(Resolution::new(found, ResolutionSource::Explicit)
                .logged(format!("display_name_matched:{found}")));
        }

        let extended = datasets
            .keys()
            .find(|key| normalize_key(key).starts_with(&cleaned));
        let truncated = || {
            datasets
                .keys()
                .filter(|key| cleaned.starts_with(&normalize_key(key)))
                .max_by_key(|key| key.len())
        };
        if let Some(found) = extended.or_else(truncated) {
            return Ok(Resolution::new(found, ResolutionSource::Explicit)
                .logged(format!("prefix_matched:{found}")));
        }

        let suggestion = closest_key(requested, datasets.keys().map(String::as_str));
        Err(TranslateError::UnknownDataset {
            noun: self.noun,
            requested: requested.to_string(),
            suggestion: suggestion.map(str::to_string),
            valid: datasets.keys().cloned().collect(),
        })
    }
}

/// The schema's own spelling of `wanted`, compared on normalized forms.
pub fn find_key<'a>(datasets: &'a BTreeMap<String, DatasetMeta>, wanted: &str) -> Option<&'a str> {
    let wanted = normalize_key(wanted);
    datasets
        .keys()
        .find(|key| normalize_key(key) == wanted)
        .map(String::as_str)
}

/// The key with the smallest edit distance to `requested`, compared on
/// normalized forms. Keys further than a third of the request away are not
/// typos. Ties keep the first key in iteration order.
pub fn closest_key<'a>(
    requested: &str,
    keys: impl IntoIterator<Item = &'a str>,
) -> Option<&'a str> {
    let wanted: Vec<char> = normalize_key(requested).chars().collect();
    if wanted.is_empty() {
        return None;
    }
    let max_distance = (wanted.len() / 3).max(2);

    let mut best: Option<(usize, &str)> = None;
    for key in keys {
        let distance = edit_distance(&normalize_key(key), &wanted);
        if distance <= max_distance && best.is_none_or(|(d, _)| distance < d) {
            best = Some((distance, key));
        }
    }
    best.map(|(_, key)| key)
}

fn edit_distance(value: &str, wanted: &[char]) -> usize {
    let mut prev: Vec<usize> = (0..=wanted.len()).collect();
    let mut curr = vec![0; wanted.len() + 1];

    for (i, c) in value.chars().enumerate() {
        curr[0] = i + 1;
        for j in 1..=wanted.len() {
            let substitution = prev[j - 1] + usize::from(c != wanted[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(substitution);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[wanted.len()]
}

fn contains_at_word_start(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(at, _)| {
        haystack[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !c.is_alphanumeric())
    })
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    const SEARCH_TYPES: DatasetResolver = DatasetResolver {
        noun: "search type",
        aliases: &[("alerts", "alert_search"), ("report", "threat_report_search")],
        keywords: &[("binary", "binary_search"), ("alert", "alert_search")],
        default: Some("process_search"),
        fallback_to_first: true,
    };

    fn datasets(keys: &[&str]) -> BTreeMap<String, DatasetMeta> {
        keys.iter()
            .map(|key| (key.to_string(), DatasetMeta::default()))
            .collect()
    }

    fn search_types() -> BTreeMap<String, DatasetMeta> {
        datasets(&[
            "alert_search",
            "binary_search",
            "process_search",
            "threat_report_search",
        ])
    }

    #[test_case("alerts", "alert_search", &["normalised_from:alerts->alert_search"] ; "alias")]
    #[test_case("Report", "threat_report_search", &["normalised_from:Report->threat_report_search"] ; "alias case insensitive")]
    #[test_case("process_search", "process_search", &[] ; "verbatim")]
    #[test_case(" Process Search ", "process_search", &["normalised_from: Process Search ->process_search"] ; "spaces")]
    #[test_case("proc", "process_search", &["prefix_matched:process_search"] ; "prefix")]
    #[test_case("binary_search_v2", "binary_search", &["prefix_matched:binary_search"] ; "longest truncated key")]
    fn explicit(requested: &str, key: &str, log: &[&str]) {
        let resolution = SEARCH_TYPES
            .resolve(Some(requested), Some("binary things"), &search_types())
            .unwrap();
        assert_eq!(resolution.key, key);
        assert_eq!(resolution.source, ResolutionSource::Explicit);
        assert_eq!(resolution.log, log);
    }

    #[test]
    fn unknown_lists_valid_keys() {
        let err = SEARCH_TYPES
            .resolve(Some("bogus"), None, &search_types())
            .unwrap_err();
        assert_eq!(
            err,
            TranslateError::UnknownDataset {
                noun: "search type",
                requested: "bogus".to_string(),
                suggestion: None,
                valid: vec![
                    "alert_search".to_string(),
                    "binary_search".to_string(),
                    "process_search".to_string(),
                    "threat_report_search".to_string(),
                ],
            }
        );
    }

    #[test]
    fn unknown_suggests_near_miss() {
        let tables = datasets(&["DeviceNetworkEvents", "DeviceProcessEvents"]);
        let err = SEARCH_TYPES
            .resolve(Some("DeviceProcesEvents"), None, &tables)
            .unwrap_err();
        let TranslateError::UnknownDataset { suggestion, .. } = err else {
            panic!("expected an unknown dataset error");
        };
        assert_eq!(suggestion.as_deref(), Some("DeviceProcessEvents"));
    }

    #[test_case("alret_search", Some("alert_search") ; "transposition")]
    #[test_case("Binary Serch", Some("binary_search") ; "normalized")]
    #[test_case("bogus", None ; "too far")]
    #[test_case("", None ; "empty")]
    fn closest(requested: &str, expected: Option<&str>) {
        let keys = search_types();
        assert_eq!(closest_key(requested, keys.keys().map(String::as_str)), expected);
    }

    #[test]
    fn display_name_matches_case_insensitively() {
        let mut sets = datasets(&["network_actions"]);
        sets.get_mut("network_actions").unwrap().name = Some("Network Actions".to_string());
        let resolution = SEARCH_TYPES
            .resolve(Some("NETWORK ACTIONS "), None, &sets)
            .unwrap();
        assert_eq!(resolution.key, "network_actions");
        assert_eq!(
            resolution.log,
            vec!["normalised_from:NETWORK ACTIONS ->network_actions"]
        );

        let mut sets = datasets(&["net_actions"]);
        sets.get_mut("net_actions").unwrap().name = Some("Network Actions".to_string());
        let resolution = SEARCH_TYPES
            .resolve(Some("network actions"), None, &sets)
            .unwrap();
        assert_eq!(resolution.key, "net_actions");
        assert_eq!(resolution.log, vec!["display_name_matched:net_actions"]);
    }

    #[test]
    fn case_is_preserved_for_mixed_case_keys() {
        let tables = datasets(&["DeviceNetworkEvents", "DeviceProcessEvents"]);
        let resolution = SEARCH_TYPES
            .resolve(Some("DeviceProcessEvent"), None, &tables)
            .unwrap();
        assert_eq!(resolution.key, "DeviceProcessEvents");
        assert_eq!(resolution.log, vec!["prefix_matched:DeviceProcessEvents"]);
    }

    #[test_case(Some("show alerts for this binary"), "binary_search", ResolutionSource::Inferred ; "first keyword in table order")]
    #[test_case(Some("anything else"), "process_search", ResolutionSource::Default ; "default")]
    #[test_case(Some("cobinary"), "process_search", ResolutionSource::Default ; "keyword inside word")]
    #[test_case(None, "process_search", ResolutionSource::Default ; "no text")]
    fn implicit(text: Option<&str>, key: &str, source: ResolutionSource) {
        let resolution = SEARCH_TYPES.resolve(None, text, &search_types()).unwrap();
        assert_eq!(resolution.key, key);
        assert_eq!(resolution.source, source);
    }

    #[test]
    fn first_key_when_default_missing() {
        let resolution = SEARCH_TYPES
            .resolve(Some("  "), None, &datasets(&["b", "a"]))
            .unwrap();
        assert_eq!(resolution.key, "a");
        assert_eq!(resolution.source, ResolutionSource::First);
        assert_eq!(resolution.log, vec!["defaulted_to:a"]);
    }

    #[test]
    fn required_without_fallbacks() {
        let tables = DatasetResolver {
            noun: "table",
            aliases: &[],
            keywords: &[],
            default: None,
            fallback_to_first: false,
        };
        assert_eq!(
            tables.resolve(None, None, &datasets(&["DeviceEvents"])),
            Err(TranslateError::InsufficientInput("Table is required".to_string()))
        );
    }

    #[test]
    fn empty_schema() {
        assert_eq!(
            SEARCH_TYPES.resolve(Some("x"), None, &BTreeMap::new()),
            Err(TranslateError::NoDatasets("search type"))
        );
    }
}
