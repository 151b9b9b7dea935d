//! Defender advanced hunting KQL: a table followed by tabular operators.

use std::fmt;

use huntql_schema::{FieldMap, SchemaProvider};
use huntql_translate::{
    BuildRequest, Dialect, QueryCompiler, QueryMetadata, QueryResult, TranslateError,
    dataset::{DatasetResolver, Resolution, ResolutionSource, find_key},
    expression::{ClauseKind, ClauseMeta, Expression},
    extract::{ExtractedEntity, Extraction, Recognizer, sorted_unique_lowercase},
    field::{resolve_field, validate_identifier},
    filter::{FilterContext, FilterSpec, build_filter, check_safe},
    operator::OperatorTable,
    patterns::{
        HOST_PHRASE, IPV4, MD5, PROCESS_BINARY, QUOTED, SHA1, SHA256, USER_PHRASE, quoted_content,
    },
    plan::{LimitPolicy, QueryPlan},
    time_window::TimeWindow,
    value::{LiteralSyntax, SingleQuoted, format_untyped},
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::CMDLINE_STOPWORDS;

pub const DEFAULT_TABLE: &str = "DeviceProcessEvents";
pub const NETWORK_TABLE: &str = "DeviceNetworkEvents";
pub const DEFAULT_TIME_WINDOW: &str = "7d";
pub const LIMITS: LimitPolicy = LimitPolicy {
    default: 100,
    max: 100_000,
};

const TIMESTAMP_COLUMN: &str = "Timestamp";
const EXAMPLE_LIMIT: i64 = 10;
/// Columns worth a `count() by` example, in order of preference.
const SUMMARY_COLUMNS: &[&str] = &["DeviceName", "AccountName", "RemoteIP", "FileName"];

const OPERATORS: &[&str] = &[
    "==",
    "!=",
    "=~",
    "!~",
    "<",
    "<=",
    ">",
    ">=",
    "contains",
    "!contains",
    "contains_cs",
    "has",
    "!has",
    "has_any",
    "startswith",
    "endswith",
    "matches regex",
    "in",
    "!in",
    "in~",
    "between",
];

static RESOLVER: DatasetResolver = DatasetResolver {
    noun: "table",
    aliases: &[],
    keywords: &[
        ("logon", "DeviceLogonEvents"),
        ("login", "DeviceLogonEvents"),
        ("registry", "DeviceRegistryEvents"),
        ("image load", "DeviceImageLoadEvents"),
        ("dll", "DeviceImageLoadEvents"),
        ("module", "DeviceImageLoadEvents"),
        ("email", "EmailEvents"),
        ("alert", "AlertInfo"),
        ("network", NETWORK_TABLE),
        ("connection", NETWORK_TABLE),
        ("remote", NETWORK_TABLE),
        ("url", NETWORK_TABLE),
        ("domain", NETWORK_TABLE),
        ("file", "DeviceFileEvents"),
        ("process", DEFAULT_TABLE),
    ],
    default: Some(DEFAULT_TABLE),
    fallback_to_first: false,
};

const SYNTAX: SingleQuoted = SingleQuoted::ESCAPED;

static TIMESPAN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(?:d|h|m|s|ms)$").expect("timespan regex"));

static DANGEROUS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(;|--|\bunion\s+select\b|\bdrop\s+table\b|\bdelete\s+from\b)")
        .expect("dangerous pattern regex")
});

static DOMAIN_LITERAL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:[a-z0-9](?:[a-z0-9-]*[a-z0-9])?\.)+(?:com|net|org|io|info|biz|xyz|top|ru|cn|co|uk|de|gov|edu|us|me|online|site)\b",
    )
    .expect("domain literal regex")
});

/// Host phrase captures that are filler rather than a device name.
const DEVICE_FILLER: &[&str] = &["activity", "events", "event", "logs", "with", "that", "the"];

struct Pass {
    recognizer: Recognizer,
    operator: &'static str,
}

static HASH_AND_IP_PASSES: [Pass; 4] = [
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Sha256,
            pattern: &SHA256,
            group: 0,
            candidates: &["SHA256", "InitiatingProcessSHA256"],
        },
        operator: "==",
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Sha1,
            pattern: &SHA1,
            group: 0,
            candidates: &["SHA1", "InitiatingProcessSHA1"],
        },
        operator: "==",
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Md5,
            pattern: &MD5,
            group: 0,
            candidates: &["MD5", "InitiatingProcessMD5"],
        },
        operator: "==",
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Ipv4,
            pattern: &IPV4,
            group: 0,
            candidates: &["RemoteIP", "LocalIP", "IPAddress"],
        },
        operator: "==",
    },
];

static DEVICE_PASS: Recognizer = Recognizer {
    kind: ClauseKind::Hostname,
    pattern: &HOST_PHRASE,
    group: 1,
    candidates: &["DeviceName"],
};

static DOMAIN_PASS: Recognizer = Recognizer {
    kind: ClauseKind::Domain,
    pattern: &DOMAIN_LITERAL,
    group: 0,
    candidates: &["RemoteUrl"],
};

static PROCESS_PASS: Recognizer = Recognizer {
    kind: ClauseKind::Process,
    pattern: &PROCESS_BINARY,
    group: 1,
    candidates: &["FileName", "InitiatingProcessFileName"],
};

static USER_PASS: Recognizer = Recognizer {
    kind: ClauseKind::Username,
    pattern: &USER_PHRASE,
    group: 1,
    candidates: &["AccountName", "InitiatingProcessAccountName"],
};

const CMDLINE_FIELDS: &[&str] = &["ProcessCommandLine", "InitiatingProcessCommandLine"];

#[derive(Debug, Clone, PartialEq)]
enum KqlOp {
    Table(String),
    Where(String),
    Project(Vec<String>),
    Summarize(String),
    OrderBy(String),
    Limit(u32),
}

impl fmt::Display for KqlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KqlOp::Table(table) => f.write_str(table),
            KqlOp::Where(predicate) => write!(f, "| where {predicate}"),
            KqlOp::Project(columns) => write!(f, "| project {}", columns.join(", ")),
            KqlOp::Summarize(aggregation) => write!(f, "| summarize {aggregation}"),
            KqlOp::OrderBy(order) => write!(f, "| order by {order}"),
            KqlOp::Limit(limit) => write!(f, "| limit {limit}"),
        }
    }
}

fn render_entity(entity: &ExtractedEntity) -> String {
    SYNTAX.clause(
        &entity.field,
        &entity.operator,
        &format_untyped(&entity.value, &SYNTAX),
    )
}

pub fn extract(text: &str, fields: &FieldMap) -> Vec<Expression> {
    let mut extraction = Extraction::default();

    for pass in &HASH_AND_IP_PASSES {
        for hit in pass.recognizer.scan(text, fields, &mut extraction.spans) {
            extraction.push(ExtractedEntity::from_hit(
                pass.recognizer.kind,
                &hit,
                pass.operator,
                hit.value,
            ));
        }
    }

    for hit in DEVICE_PASS.scan(text, fields, &mut extraction.spans) {
        if DEVICE_FILLER.contains(&hit.value.to_lowercase().as_str()) {
            continue;
        }
        extraction.push(ExtractedEntity::from_hit(ClauseKind::Hostname, &hit, "=~", hit.value));
    }

    for hit in DOMAIN_PASS.scan_unclaimed(text, fields, &mut extraction.spans) {
        extraction.push(ExtractedEntity::from_hit(
            ClauseKind::Domain,
            &hit,
            "has",
            hit.value.to_lowercase(),
        ));
    }

    let processes = PROCESS_PASS.scan(text, fields, &mut extraction.spans);
    if let Some(first) = processes.first() {
        let mut names = sorted_unique_lowercase(processes.iter().map(|hit| hit.value));
        let entity = if names.len() == 1 {
            ExtractedEntity::from_hit(ClauseKind::Process, first, "=~", names.remove(0))
        } else {
            let values: Vec<Value> = names.into_iter().map(Value::String).collect();
            ExtractedEntity::from_hit(ClauseKind::Process, first, "in~", values)
        };
        extraction.push(entity);
    }

    for hit in USER_PASS.scan_unclaimed(text, fields, &mut extraction.spans) {
        extraction.push(ExtractedEntity::from_hit(ClauseKind::Username, &hit, "=~", hit.value));
    }

    extract_command_lines(text, fields, &mut extraction);
    extraction.into_expressions(render_entity)
}

/// Quoted fragments nobody else claimed are matched against command lines.
fn extract_command_lines(text: &str, fields: &FieldMap, extraction: &mut Extraction) {
    let Some(field) = resolve_field(CMDLINE_FIELDS, fields) else {
        return;
    };

    for caps in QUOTED.captures_iter(text) {
        let (Some(whole), Some(content)) = (caps.get(0), quoted_content(&caps)) else {
            continue;
        };
        let value = content.as_str();
        if extraction.spans.overlaps(&whole.range())
            || value.chars().count() < 3
            || CMDLINE_STOPWORDS.contains(&value.to_lowercase().as_str())
        {
            continue;
        }
        extraction.spans.claim(ClauseKind::Cmdline, whole.range());
        extraction.push(ExtractedEntity::new(
            ClauseKind::Cmdline,
            field,
            "contains",
            value,
            whole.range(),
        ));
    }
}

/// Rejects raw fragments that could smuggle a second statement.
fn check_fragment(fragment: &str) -> Result<(), TranslateError> {
    if let Some(found) = DANGEROUS.find(fragment) {
        return Err(TranslateError::UnsafeExpression {
            expression: fragment.to_string(),
            reason: format!("potentially dangerous pattern {:?}", found.as_str()),
        });
    }
    check_safe(fragment)
}

fn resolve_table(
    request: &BuildRequest,
    schema: &dyn SchemaProvider,
) -> Result<Resolution, TranslateError> {
    let intent = request.intent();
    if request.dataset().is_none() && intent.is_none() {
        return Err(TranslateError::InsufficientInput(
            "Table is required".to_string(),
        ));
    }

    let resolution = RESOLVER.resolve(request.dataset(), intent, schema.datasets())?;
    if resolution.source != ResolutionSource::Default {
        return Ok(resolution);
    }

    let network_literal = intent.and_then(|text| {
        IPV4.find(text)
            .or_else(|| DOMAIN_LITERAL.find(text))
            .map(|m| m.as_str())
    });
    match (network_literal, find_key(schema.datasets(), NETWORK_TABLE)) {
        (Some(literal), Some(table)) => Ok(Resolution::new(table, ResolutionSource::Inferred)
            .logged(format!("inferred_from_intent:{literal}->{table}"))),
        _ => Ok(resolution),
    }
}

fn projection(
    request: &BuildRequest,
    table: &str,
    columns: &FieldMap,
) -> Result<Vec<String>, TranslateError> {
    let mut selected = Vec::new();
    for column in request.fields.iter().map(|c| c.trim()).filter(|c| !c.is_empty()) {
        validate_identifier(column)?;
        if !columns.is_empty() && !columns.contains_key(column) {
            return Err(TranslateError::UnknownField {
                field: column.to_string(),
                dataset: table.to_string(),
            });
        }
        selected.push(column.to_string());
    }
    Ok(selected)
}

/// The lookback window: a valid explicit value, else the intent's, else 7d.
fn time_window(request: &BuildRequest, plan: &mut QueryPlan) -> String {
    let explicit = request
        .time_range
        .as_deref()
        .map(str::trim)
        .filter(|w| !w.is_empty());

    match explicit {
        Some(window) if TIMESPAN.is_match(window) => window.to_string(),
        Some(window) => {
            warn!(window, "Invalid time window, using default");
            plan.resolution
                .log
                .push(format!("time_window_defaulted:{window}->{DEFAULT_TIME_WINDOW}"));
            DEFAULT_TIME_WINDOW.to_string()
        }
        None => request
            .intent()
            .and_then(TimeWindow::find)
            .map(|w| w.to_timespan())
            .unwrap_or_else(|| DEFAULT_TIME_WINDOW.to_string()),
    }
}

fn optional_fragment(fragment: Option<&str>) -> Result<Option<String>, TranslateError> {
    match fragment.map(str::trim).filter(|f| !f.is_empty()) {
        Some(fragment) => {
            check_fragment(fragment)?;
            Ok(Some(fragment.to_string()))
        }
        None => Ok(None),
    }
}

pub struct Kql;

impl QueryCompiler for Kql {
    fn dialect(&self) -> Dialect {
        Dialect::Kql
    }

    fn resolver(&self) -> &DatasetResolver {
        &RESOLVER
    }

    fn operator_table(&self, schema: &dyn SchemaProvider) -> OperatorTable {
        let mut table = OperatorTable::from_schema(OPERATORS, schema);
        table.add_alias("=", "==");
        table.add_alias("equals", "==");
        table
    }

    #[instrument(skip_all, fields(dialect = "kql"))]
    fn compile(
        &self,
        schema: &dyn SchemaProvider,
        request: &BuildRequest,
    ) -> Result<QueryResult, TranslateError> {
        let resolution = resolve_table(request, schema)?;
        let table = resolution.key.clone();
        let columns = schema.fields(&table);
        let operators = self.operator_table(schema);
        let ctx = FilterContext {
            dataset: &table,
            fields: &columns,
            operators: &operators,
            syntax: &SYNTAX,
            default_operator: "==",
        };

        let mut plan = QueryPlan::new(resolution);
        let window = time_window(request, &mut plan);
        if columns.is_empty() || columns.contains_key(TIMESTAMP_COLUMN) {
            let predicate = format!("{TIMESTAMP_COLUMN} > ago({window})");
            plan.push(Expression::new(
                predicate,
                ClauseMeta::new(ClauseKind::TimeRange)
                    .with_field(TIMESTAMP_COLUMN)
                    .with_operator(">")
                    .with_value(window.clone()),
            ));
        }

        for condition in &request.filters {
            if let FilterSpec::Raw(raw) = condition {
                check_fragment(raw.trim())?;
            }
            plan.push(build_filter(condition, &ctx)?);
        }
        if let Some(intent) = request.intent() {
            plan.extend(extract(intent, &columns));
        }
        plan.dedup();

        plan.project(projection(request, &table, &columns)?);
        let summarize = optional_fragment(request.summarize.as_deref())?;
        let order_by = optional_fragment(request.order_by.as_deref())?;
        let limit = plan.apply_limit(&LIMITS, request.limit);

        let mut ops = vec![KqlOp::Table(table.clone())];
        ops.extend(plan.clauses().into_iter().map(|c| KqlOp::Where(c.to_string())));
        if !plan.fields.is_empty() {
            ops.push(KqlOp::Project(plan.fields.clone()));
        }
        ops.extend(summarize.map(KqlOp::Summarize));
        ops.extend(order_by.map(KqlOp::OrderBy));
        ops.push(KqlOp::Limit(limit.value));

        let query = ops
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        let mut metadata = QueryMetadata::from_plan(Dialect::Kql, &plan);
        metadata.time_window = Some(window);
        if let Some(meta) = schema.datasets().get(&table) {
            metadata.dataset_display_name = meta.name.clone();
            metadata.dataset_metadata = meta.metadata.clone();
        }

        debug!(%query, stages = ops.len(), "Compiled KQL");
        Ok(QueryResult { query, metadata })
    }

    fn example_queries(&self, schema: &dyn SchemaProvider, table: &str) -> Vec<String> {
        let columns = schema.fields(table);
        let mut requests = vec![
            BuildRequest::builder()
                .dataset(table)
                .time_range("1d")
                .limit(EXAMPLE_LIMIT)
                .build(),
        ];
        if let Some(column) = resolve_field(SUMMARY_COLUMNS, &columns) {
            requests.push(
                BuildRequest::builder()
                    .dataset(table)
                    .summarize(format!("count() by {column}"))
                    .order_by("count_ desc")
                    .limit(EXAMPLE_LIMIT)
                    .build(),
            );
        }

        requests
            .iter()
            .filter_map(|request| match self.compile(schema, request) {
                Ok(result) => Some(result.query),
                Err(e) => {
                    debug!(table, error = %e, "Skipping example");
                    None
                }
            })
            .collect()
    }
}
