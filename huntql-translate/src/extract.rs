//! Building blocks for free-text entity extraction.
//!
//! Every recognizer is an independent pass over the whole input. Passes only
//! share a [`SpanSet`]: the ordered list of `(kind, span)` claims that later
//! residual-keyword passes read the complement of.

use std::ops::Range;

use huntql_schema::FieldMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::{
    expression::{ClauseKind, ClauseMeta, Expression, dedup},
    field::resolve_field,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub kind: ClauseKind,
    pub span: Range<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct SpanSet {
    claims: Vec<Claim>,
}

impl SpanSet {
    pub fn claim(&mut self, kind: ClauseKind, span: Range<usize>) {
        if !span.is_empty() {
            self.claims.push(Claim { kind, span });
        }
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn overlaps(&self, span: &Range<usize>) -> bool {
        self.claims
            .iter()
            .any(|c| c.span.start < span.end && span.start < c.span.end)
    }

    /// The maximal runs of `text` not covered by any claim, in order, with the
    /// offset each run starts at.
    pub fn residual<'t>(&self, text: &'t str) -> Vec<(usize, &'t str)> {
        let mut spans: Vec<Range<usize>> = self.claims.iter().map(|c| c.span.clone()).collect();
        spans.sort_by_key(|span| span.start);

        let mut segments = Vec::new();
        let mut cursor = 0;
        for span in spans {
            let end = span.end.min(text.len());
            if span.start > cursor {
                segments.push((cursor, &text[cursor..span.start]));
            }
            cursor = cursor.max(end);
        }
        if cursor < text.len() {
            segments.push((cursor, &text[cursor..]));
        }

        segments.retain(|(_, segment)| !segment.trim().is_empty());
        segments
    }
}

/// One regular expression pass bound to a category and its candidate fields.
pub struct Recognizer {
    pub kind: ClauseKind,
    pub pattern: &'static Lazy<Regex>,
    /// Capture group holding the value; the whole match is what gets claimed.
    pub group: usize,
    pub candidates: &'static [&'static str],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hit<'t> {
    pub field: &'static str,
    pub value: &'t str,
    pub span: Range<usize>,
}

impl Recognizer {
    /// Matches whose candidate fields are all missing from the schema are
    /// dropped without claiming their span.
    pub fn scan<'t>(&self, text: &'t str, fields: &FieldMap, spans: &mut SpanSet) -> Vec<Hit<'t>> {
        let Some(field) = resolve_field(self.candidates, fields) else {
            if self.pattern.is_match(text) {
                debug!(kind = ?self.kind, candidates = ?self.candidates, "No candidate field, dropping matches");
            }
            return Vec::new();
        };

        self.pattern
            .captures_iter(text)
            .filter_map(|caps| {
                let whole = caps.get(0)?;
                let value = caps.get(self.group)?;
                spans.claim(self.kind, whole.range());
                Some(Hit {
                    field,
                    value: value.as_str(),
                    span: whole.range(),
                })
            })
            .collect()
    }

    /// Like [`Recognizer::scan`], skipping matches that overlap text an earlier
    /// pass already claimed.
    pub fn scan_unclaimed<'t>(
        &self,
        text: &'t str,
        fields: &FieldMap,
        spans: &mut SpanSet,
    ) -> Vec<Hit<'t>> {
        let mut scratch = SpanSet::default();
        let hits: Vec<Hit<'t>> = self
            .scan(text, fields, &mut scratch)
            .into_iter()
            .filter(|hit| !spans.overlaps(&hit.span))
            .collect();
        for hit in &hits {
            spans.claim(self.kind, hit.span.clone());
        }
        hits
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedEntity {
    pub kind: ClauseKind,
    pub field: String,
    pub operator: String,
    pub value: Value,
    pub span: Range<usize>,
}

impl ExtractedEntity {
    pub fn new(
        kind: ClauseKind,
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
        span: Range<usize>,
    ) -> Self {
        Self {
            kind,
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
            span,
        }
    }

    pub fn from_hit(
        kind: ClauseKind,
        hit: &Hit<'_>,
        operator: &str,
        value: impl Into<Value>,
    ) -> Self {
        Self::new(kind, hit.field, operator, value, hit.span.clone())
    }

    pub fn meta(&self) -> ClauseMeta {
        ClauseMeta::new(self.kind)
            .with_field(self.field.clone())
            .with_operator(self.operator.clone())
            .with_value(self.value.clone())
    }
}

/// Accumulates entities and claimed spans across the passes of one call.
#[derive(Debug, Default)]
pub struct Extraction {
    pub entities: Vec<ExtractedEntity>,
    pub spans: SpanSet,
}

impl Extraction {
    pub fn push(&mut self, entity: ExtractedEntity) {
        self.entities.push(entity);
    }

    /// Renders every entity in pass order, dropping repeated clauses.
    pub fn into_expressions(self, render: impl Fn(&ExtractedEntity) -> String) -> Vec<Expression> {
        dedup(
            self.entities
                .iter()
                .map(|entity| Expression::new(render(entity), entity.meta()))
                .collect(),
        )
    }
}

/// Lowercases, sorts and removes duplicates.
pub fn sorted_unique_lowercase<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut values: Vec<String> = values.into_iter().map(str::to_lowercase).collect();
    values.sort();
    values.dedup();
    values
}

#[cfg(test)]
mod tests {
    use collection_macros::btreemap;
    use huntql_schema::FieldMeta;

    use super::*;
    use crate::patterns::{IPV4, MD5};

    static IP_RECOGNIZER: Recognizer = Recognizer {
        kind: ClauseKind::Ipv4,
        pattern: &IPV4,
        group: 0,
        candidates: &["dst_ip", "src_ip"],
    };

    #[test]
    fn residual_is_the_complement_of_claims() {
        let text = "find 10.0.0.1 and powershell on 10.0.0.2";
        let mut spans = SpanSet::default();
        spans.claim(ClauseKind::Ipv4, 5..13);
        spans.claim(ClauseKind::Ipv4, 32..40);
        assert_eq!(
            spans.residual(text),
            vec![(0, "find "), (13, " and powershell on ")]
        );
    }

    #[test]
    fn overlapping_claims_merge() {
        let text = "abcdefghij";
        let mut spans = SpanSet::default();
        spans.claim(ClauseKind::Keyword, 2..6);
        spans.claim(ClauseKind::Keyword, 4..8);
        spans.claim(ClauseKind::Keyword, 0..1);
        assert_eq!(spans.residual(text), vec![(1, "b"), (8, "ij")]);
        assert!(spans.overlaps(&(7..9)));
        assert!(!spans.overlaps(&(8..9)));
    }

    #[test]
    fn scan_resolves_first_present_field() {
        let fields = btreemap! {
            "src_ip".to_string() => FieldMeta::default(),
        };
        let mut spans = SpanSet::default();
        let hits = IP_RECOGNIZER.scan("from 1.2.3.4", &fields, &mut spans);
        assert_eq!(
            hits,
            vec![Hit {
                field: "src_ip",
                value: "1.2.3.4",
                span: 5..12,
            }]
        );
        assert_eq!(spans.claims().len(), 1);
    }

    #[test]
    fn scan_without_field_claims_nothing() {
        let recognizer = Recognizer {
            kind: ClauseKind::Md5,
            pattern: &MD5,
            group: 0,
            candidates: &["file_md5"],
        };
        let mut spans = SpanSet::default();
        let input = "a".repeat(32);
        let hits = recognizer.scan(&input, &FieldMap::new(), &mut spans);
        assert!(hits.is_empty());
        assert!(spans.claims().is_empty());
    }

    #[test]
    fn scan_unclaimed_skips_overlaps() {
        let fields = btreemap! {
            "dst_ip".to_string() => FieldMeta::default(),
        };
        let mut spans = SpanSet::default();
        spans.claim(ClauseKind::Hostname, 0..12);
        let hits = IP_RECOGNIZER.scan_unclaimed("host 1.2.3.4 and 5.6.7.8", &fields, &mut spans);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].value, "5.6.7.8");
        assert_eq!(spans.claims().len(), 2);
    }

    #[test]
    fn repeated_values_render_once() {
        let fields = btreemap! {
            "dst_ip".to_string() => FieldMeta::default(),
        };
        let mut extraction = Extraction::default();
        for hit in IP_RECOGNIZER.scan("1.1.1.1 then 1.1.1.1", &fields, &mut extraction.spans) {
            extraction.push(ExtractedEntity::from_hit(ClauseKind::Ipv4, &hit, "=", hit.value));
        }
        let expressions = extraction.into_expressions(|e| format!("{} {} {}", e.field, e.operator, e.value));
        assert_eq!(expressions.len(), 1);
        assert_eq!(expressions[0].clause, r#"dst_ip = "1.1.1.1""#);
    }

    #[test]
    fn sorted_unique() {
        assert_eq!(
            sorted_unique_lowercase(["WMIC.exe", "cmd.exe", "wmic.exe"]),
            vec!["cmd.exe", "wmic.exe"]
        );
    }
}
