//! Cortex XQL: newline separated pipeline stages starting from a dataset.

use std::{collections::BTreeMap, fmt};

use huntql_schema::{FieldGroup, FieldMap, SchemaProvider};
use huntql_translate::{
    BuildRequest, Dialect, QueryCompiler, QueryMetadata, QueryResult, TranslateError,
    dataset::DatasetResolver,
    expression::{ClauseKind, ClauseMeta, Expression},
    extract::{ExtractedEntity, Extraction, Recognizer, SpanSet, sorted_unique_lowercase},
    field::{resolve_field, validate_identifier},
    filter::{FilterContext, build_filter, check_safe},
    operator::OperatorTable,
    patterns::{FILE_PATH, HOST_PHRASE, IPV4, MD5, PROCESS_EXE, SHA256},
    plan::{LimitPolicy, QueryPlan},
    time_window::TimeWindow,
    value::{LiteralSyntax, format_untyped, requote_double_quoted},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument};

pub const DEFAULT_DATASET: &str = "xdr_data";
pub const LIMITS: LimitPolicy = LimitPolicy {
    default: 100,
    max: 10_000,
};

const MAX_DERIVED_FIELDS: usize = 6;
const TIME_FIELD: &str = "_time";
const EVENT_TYPE_FIELD: &str = "event_type";
const PROCESS_EVENT_TYPE: &str = "ENUM.PROCESS";

const OPERATORS: &[&str] = &[
    "=",
    "!=",
    ">",
    ">=",
    "<",
    "<=",
    "in",
    "not in",
    "contains",
    "not contains",
    "~=",
    "incidr",
    "not incidr",
];

static RESOLVER: DatasetResolver = DatasetResolver {
    noun: "dataset",
    aliases: &[("xdr", DEFAULT_DATASET)],
    keywords: &[],
    default: Some(DEFAULT_DATASET),
    fallback_to_first: true,
};

const FIELD_GROUP_ORDER: &[&str] = &[
    "system_fields",
    "event_fields",
    "actor_fields",
    "action_fields",
    "agent_fields",
    "auth_fields",
    "dst_fields",
];

const FALLBACK_FIELDS: &[&str] = &[
    TIME_FIELD,
    "agent_hostname",
    "actor_process_image_name",
    "action_process_image_name",
];

const PROCESS_ALIASES: &[(&str, &str)] = &[
    ("command prompt", "cmd.exe"),
    ("powershell", "powershell.exe"),
    ("cmd", "cmd.exe"),
    ("wmic", "wmic.exe"),
    ("mshta", "mshta.exe"),
    ("cscript", "cscript.exe"),
    ("wscript", "wscript.exe"),
];

const PROCESS_KEYWORD_FIELDS: &[&str] = &["actor_process_image_name", "action_file_name"];

static PROCESS_ALIAS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b([A-Za-z0-9_-]+\.exe|command\s+prompt|powershell|cmd|wmic|mshta|cscript|wscript)\b",
    )
    .expect("process alias regex")
});

static PROCESS_ACTIVITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)process|execution").expect("process activity regex"));

static FUNCTION_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\(").expect("function call regex"));

struct Pass {
    recognizer: Recognizer,
    operator: &'static str,
    lowercase: bool,
}

static PASSES: [Pass; 6] = [
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Md5,
            pattern: &MD5,
            group: 0,
            candidates: &["action_file_md5", "action_process_image_md5"],
        },
        operator: "=",
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Sha256,
            pattern: &SHA256,
            group: 0,
            candidates: &["action_file_sha256", "action_process_image_sha256"],
        },
        operator: "=",
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Ipv4,
            pattern: &IPV4,
            group: 0,
            candidates: &["action_local_ip", "action_remote_ip", "src_ip", "dst_ip"],
        },
        operator: "=",
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Process,
            pattern: &PROCESS_EXE,
            group: 1,
            candidates: &["actor_process_image_name", "action_file_name"],
        },
        operator: "=",
        lowercase: true,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::FilePath,
            pattern: &FILE_PATH,
            group: 1,
            candidates: &["action_file_path", "actor_process_image_path"],
        },
        operator: "=",
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Hostname,
            pattern: &HOST_PHRASE,
            group: 1,
            candidates: &["agent_hostname", "dest_agent_hostname", "src_agent_hostname"],
        },
        operator: "contains",
        lowercase: true,
    },
];

/// XQL string literals: single quoted, with enum references, intervals and
/// function calls left as written.
struct XqlSyntax;

impl LiteralSyntax for XqlSyntax {
    fn quote(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        if trimmed.len() >= 2 && trimmed.starts_with('\'') && trimmed.ends_with('\'') {
            return trimmed.to_string();
        }

        let inner = if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
            &trimmed[1..trimmed.len() - 1]
        } else {
            trimmed
        };
        format!("'{}'", inner.replace('\'', "\\'"))
    }

    fn is_verbatim(&self, raw: &str) -> bool {
        let trimmed = raw.trim();
        trimmed.starts_with("ENUM.")
            || trimmed.starts_with("interval ")
            || FUNCTION_CALL.is_match(trimmed)
    }

    fn normalize_raw(&self, raw: &str) -> String {
        requote_double_quoted(raw.trim(), |s| format!("'{}'", s.replace('\'', "\\'")))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum XqlStage {
    Dataset(String),
    Filter(String),
    Fields(Vec<String>),
    Limit(u32),
}

impl fmt::Display for XqlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            XqlStage::Dataset(dataset) => write!(f, "dataset = {dataset}"),
            XqlStage::Filter(expr) => write!(f, "| filter {expr}"),
            XqlStage::Fields(fields) => write!(f, "| fields {}", fields.join(", ")),
            XqlStage::Limit(limit) => write!(f, "| limit {limit}"),
        }
    }
}

fn build_xql(plan: &QueryPlan) -> String {
    let mut stages = vec![XqlStage::Dataset(plan.dataset().to_string())];
    stages.extend(plan.clauses().into_iter().map(|c| XqlStage::Filter(c.to_string())));
    if !plan.fields.is_empty() {
        stages.push(XqlStage::Fields(plan.fields.clone()));
    }
    if let Some(limit) = plan.limit {
        stages.push(XqlStage::Limit(limit.value));
    }

    stages
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_entity(entity: &ExtractedEntity) -> String {
    XqlSyntax.clause(
        &entity.field,
        &entity.operator,
        &format_untyped(&entity.value, &XqlSyntax),
    )
}

/// Free text to filter expressions: pass order, then process keywords, the
/// process event filter and finally time windows.
pub fn extract(text: &str, fields: &FieldMap) -> Vec<Expression> {
    let mut extraction = Extraction::default();

    for pass in &PASSES {
        for hit in pass
            .recognizer
            .scan(text, fields, &mut extraction.spans)
        {
            let value = if pass.lowercase {
                hit.value.to_lowercase()
            } else {
                hit.value.to_string()
            };
            extraction.push(ExtractedEntity::from_hit(
                pass.recognizer.kind,
                &hit,
                pass.operator,
                value,
            ));
        }
    }

    let windows = extract_time_windows(text, fields, &mut extraction.spans);
    extract_process_keywords(text, fields, &mut extraction);

    let mut expressions = extraction.into_expressions(render_entity);
    expressions.extend(process_event_filter(text, fields));
    expressions.extend(windows.into_expressions(render_entity));
    expressions
}

/// Claims every window so later passes skip it, emitting the filters apart.
fn extract_time_windows(text: &str, fields: &FieldMap, spans: &mut SpanSet) -> Extraction {
    let mut windows = Extraction::default();
    if !fields.contains_key(TIME_FIELD) {
        return windows;
    }

    for (window, span) in TimeWindow::find_all(text) {
        spans.claim(ClauseKind::TimeRange, span.clone());
        windows.push(ExtractedEntity::new(
            ClauseKind::TimeRange,
            TIME_FIELD,
            ">",
            format!(
                "current_time() - interval '{} {}'",
                window.quantity,
                window.unit.as_str()
            ),
            span,
        ));
    }
    windows
}

/// Bare process names ("powershell", "command prompt") and stray `*.exe`
/// tokens left over once every other pass claimed its text.
fn extract_process_keywords(text: &str, fields: &FieldMap, extraction: &mut Extraction) {
    let Some(field) = resolve_field(PROCESS_KEYWORD_FIELDS, fields) else {
        return;
    };

    let mut binaries = Vec::new();
    let mut matched = Vec::new();
    for (offset, segment) in extraction.spans.residual(text) {
        for m in PROCESS_ALIAS
            .find_iter(segment)
            .filter(|m| is_whole_token(segment, m.start(), m.end()))
        {
            let keyword = m.as_str().split_whitespace().collect::<Vec<_>>().join(" ");
            let binary = PROCESS_ALIASES
                .iter()
                .find(|(alias, _)| alias.eq_ignore_ascii_case(&keyword))
                .map(|(_, binary)| *binary)
                .unwrap_or(m.as_str());
            binaries.push(binary);
            matched.push(offset + m.start()..offset + m.end());
        }
    }

    let Some(first) = matched.first().cloned() else {
        return;
    };
    for span in matched {
        extraction.spans.claim(ClauseKind::ProcessKeyword, span);
    }

    let values: Vec<Value> = sorted_unique_lowercase(binaries)
        .into_iter()
        .map(Value::String)
        .collect();
    extraction.push(ExtractedEntity::new(
        ClauseKind::ProcessKeyword,
        field,
        "in",
        values,
        first,
    ));
}

/// Tokens are whitespace separated, so `cmd` inside `cmd-line` is no alias.
fn is_whole_token(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().next_back();
    let after = text[end..].chars().next();
    before.is_none_or(char::is_whitespace)
        && after.is_none_or(|c| c.is_whitespace() || c == ',' || c == ';')
}

fn process_event_filter(text: &str, fields: &FieldMap) -> Option<Expression> {
    if !fields.contains_key(EVENT_TYPE_FIELD) || !PROCESS_ACTIVITY.is_match(text) {
        return None;
    }

    Some(Expression::new(
        XqlSyntax.clause(EVENT_TYPE_FIELD, "=", PROCESS_EVENT_TYPE),
        ClauseMeta::new(ClauseKind::EventFilter)
            .with_field(EVENT_TYPE_FIELD)
            .with_operator("=")
            .with_value(PROCESS_EVENT_TYPE),
    ))
}

fn projection(
    request: &BuildRequest,
    schema: &dyn SchemaProvider,
    dataset: &str,
    fields: &FieldMap,
) -> Result<Vec<String>, TranslateError> {
    let requested: Vec<String> = request
        .fields
        .iter()
        .map(|f| f.trim())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect();
    if !requested.is_empty() {
        for field in &requested {
            validate_identifier(field)?;
        }
        return Ok(requested);
    }

    if let Some(meta) = schema.datasets().get(dataset) {
        if !meta.default_fields.is_empty() {
            return Ok(meta.default_fields.clone());
        }
    }

    Ok(derive_default_fields(schema.field_groups(), fields))
}

/// Picks up to six key fields following a fixed group preference, falling
/// back to flagged fields and then to a handful of well known ones.
fn derive_default_fields(groups: &BTreeMap<String, FieldGroup>, fields: &FieldMap) -> Vec<String> {
    if groups.is_empty() {
        return Vec::new();
    }

    let grouped = FIELD_GROUP_ORDER
        .iter()
        .filter_map(|name| groups.get(*name))
        .flat_map(|group| group.preferred().iter().map(String::as_str));
    let mut selected = present_unique(grouped, fields);

    if selected.is_empty() {
        let flagged = fields
            .iter()
            .filter(|(_, meta)| meta.default_field)
            .map(|(name, _)| name.as_str());
        selected = present_unique(flagged, fields);
    }
    if selected.is_empty() {
        selected = present_unique(FALLBACK_FIELDS.iter().copied(), fields);
    }

    selected.truncate(MAX_DERIVED_FIELDS);
    selected
}

fn present_unique<'a>(names: impl Iterator<Item = &'a str>, fields: &FieldMap) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for name in names {
        if fields.contains_key(name) && !selected.iter().any(|s| s == name) {
            selected.push(name.to_string());
        }
    }
    selected
}

pub struct Xql;

impl QueryCompiler for Xql {
    fn dialect(&self) -> Dialect {
        Dialect::Xql
    }

    fn resolver(&self) -> &DatasetResolver {
        &RESOLVER
    }

    fn operator_table(&self, schema: &dyn SchemaProvider) -> OperatorTable {
        OperatorTable::from_schema(OPERATORS, schema)
    }

    #[instrument(skip_all, fields(dialect = "xql"))]
    fn compile(
        &self,
        schema: &dyn SchemaProvider,
        request: &BuildRequest,
    ) -> Result<QueryResult, TranslateError> {
        let resolution = RESOLVER.resolve(request.dataset(), request.intent(), schema.datasets())?;
        let dataset = resolution.key.clone();
        let fields = schema.fields(&dataset);
        let operators = self.operator_table(schema);
        let ctx = FilterContext {
            dataset: &dataset,
            fields: &fields,
            operators: &operators,
            syntax: &XqlSyntax,
            default_operator: "=",
        };

        let mut plan = QueryPlan::new(resolution);
        for filter in &request.filters {
            plan.push(build_filter(filter, &ctx)?);
        }

        if let Some(intent) = request.intent() {
            plan.extend(extract(intent, &fields));
        }

        if let Some(time_range) = request.time_range.as_deref().map(str::trim) {
            if !time_range.is_empty() {
                check_safe(time_range)?;
                plan.push(Expression::new(
                    time_range,
                    ClauseMeta::new(ClauseKind::TimeRange).with_value(time_range),
                ));
            }
        }

        plan.dedup();
        plan.project(projection(request, schema, &dataset, &fields)?);
        plan.apply_limit(&LIMITS, request.limit);

        let query = build_xql(&plan);
        let mut metadata = QueryMetadata::from_plan(Dialect::Xql, &plan);
        if let Some(meta) = schema.datasets().get(&dataset) {
            metadata.dataset_display_name = meta.name.clone();
            metadata.dataset_metadata = meta.metadata.clone();
        }

        debug!(%query, clauses = plan.expressions.len(), "Compiled XQL");
        Ok(QueryResult { query, metadata })
    }
}
