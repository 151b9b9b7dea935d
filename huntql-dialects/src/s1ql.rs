//! SentinelOne S1QL: a flat boolean expression over one event dataset.

use huntql_schema::{FieldMap, SchemaProvider};
use huntql_translate::{
    BuildRequest, Dialect, QueryCompiler, QueryMetadata, QueryResult, TranslateError,
    dataset::{DatasetResolver, ResolutionSource},
    expression::{ClauseKind, ClauseMeta, Expression},
    extract::{ExtractedEntity, Extraction, Recognizer, sorted_unique_lowercase},
    field::resolve_field,
    filter::{FilterContext, build_filter},
    operator::OperatorTable,
    patterns::{
        DOMAIN_PHRASE, FILE_PATH, FLAG, IPV4, IPV6, MD5, PORT, PROCESS_BINARY, QUOTED, SHA1,
        SHA256, USER_PHRASE, plausible_ipv6, quoted_content,
    },
    plan::{BooleanOperator, LimitPolicy, QueryPlan},
    value::{LiteralSyntax, SingleQuoted, format_untyped, requote_double_quoted},
};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::CMDLINE_STOPWORDS;

pub const DEFAULT_DATASET: &str = "processes";
pub const LIMITS: LimitPolicy = LimitPolicy {
    default: 1000,
    max: 20_000,
};

const EVENT_NAME_FIELD: &str = "meta.event.name";

const OPERATORS: &[&str] = &[
    "=",
    "!=",
    "<",
    "<=",
    ">",
    ">=",
    "in",
    "not in",
    "in:anycase",
    "in:matchcase",
    "contains",
    "contains:anycase",
    "contains anycase",
    "containscis",
    "matches",
    "exists",
];

static RESOLVER: DatasetResolver = DatasetResolver {
    noun: "dataset",
    aliases: &[
        ("process", "processes"),
        ("network", "network_actions"),
        ("file", "files"),
        ("login", "logins"),
        ("task", "scheduled_tasks"),
    ],
    keywords: &[
        ("process", "processes"),
        ("processes", "processes"),
        ("executable", "processes"),
        ("file", "files"),
        ("files", "files"),
        ("dns", "dns"),
        ("network", "network_actions"),
        ("connection", "network_actions"),
        ("connections", "network_actions"),
        ("traffic", "network_actions"),
        ("url", "url"),
        ("http", "url"),
        ("login", "logins"),
        ("logon", "logins"),
        ("module", "modules"),
        ("driver", "driver"),
        ("registry", "registry"),
        ("scheduled task", "scheduled_tasks"),
        ("task", "scheduled_tasks"),
        ("indicator", "indicators"),
        ("script", "command_scripts"),
        ("cross process", "cross_process"),
    ],
    default: Some(DEFAULT_DATASET),
    fallback_to_first: true,
};

/// Event names a dataset is restricted to when its schema entry declares none.
const EVENT_FILTERS: &[(&str, &[&str])] = &[
    ("processes", &["PROCESSCREATION"]),
    (
        "files",
        &[
            "FILESCAN",
            "FILERENAME",
            "FILEDELETION",
            "FILECREATION",
            "FILEMODIFICATION",
            "MALICIOUSFILE",
        ],
    ),
    ("dns", &["DNS"]),
    ("url", &["HTTP"]),
    ("modules", &["MODULELOAD"]),
    (
        "registry",
        &[
            "REGKEYCREATE",
            "REGKEYDELETE",
            "REGVALUEMODIFIED",
            "REGVALUECREATE",
            "REGKEYRENAME",
            "REGVALUEDELETE",
            "REGKEYEXPORT",
            "REGKEYSECURITYCHANGED",
            "REGKEYIMPORT",
        ],
    ),
    ("indicators", &["BEHAVIORALINDICATORS"]),
];

const SYNTAX: SingleQuoted = SingleQuoted::ESCAPED;

/// Single quoted literals with backslashes doubled; raw filters have their
/// double quoted literals rewritten the same way.
struct S1Syntax;

impl LiteralSyntax for S1Syntax {
    fn quote(&self, raw: &str) -> String {
        SYNTAX.quote(raw)
    }

    fn normalize_raw(&self, raw: &str) -> String {
        requote_double_quoted(raw.trim(), |content| SYNTAX.quote(content))
    }
}

/// Whether a recognized value is written as a bare literal or as a one
/// element list.
#[derive(Clone, Copy)]
enum Shape {
    Scalar,
    List,
}

struct Pass {
    recognizer: Recognizer,
    operator: &'static str,
    shape: Shape,
}

static PORT_PASS: Recognizer = Recognizer {
    kind: ClauseKind::Port,
    pattern: &PORT,
    group: 1,
    candidates: &["dst.port.number", "src.port.number"],
};

const IP_FIELDS: &[&str] = &[
    "dst.ip.address",
    "src.ip.address",
    "network.ip",
    "network.dns.resolvedIp",
];

static IOC_PASSES: [Pass; 7] = [
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Sha256,
            pattern: &SHA256,
            group: 0,
            candidates: &[
                "tgt.file.sha256",
                "src.file.sha256",
                "tgt.process.image.sha256",
                "src.process.image.sha256",
            ],
        },
        operator: "in:matchcase",
        shape: Shape::List,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Sha1,
            pattern: &SHA1,
            group: 0,
            candidates: &[
                "tgt.file.sha1",
                "src.file.sha1",
                "tgt.process.image.sha1",
                "src.process.image.sha1",
            ],
        },
        operator: "in:matchcase",
        shape: Shape::List,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Md5,
            pattern: &MD5,
            group: 0,
            candidates: &[
                "tgt.file.md5",
                "tgt.file.image.md5",
                "src.file.md5",
                "tgt.process.image.md5",
                "src.process.image.md5",
            ],
        },
        operator: "in:matchcase",
        shape: Shape::List,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Ipv4,
            pattern: &IPV4,
            group: 0,
            candidates: IP_FIELDS,
        },
        operator: "=",
        shape: Shape::Scalar,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Ipv6,
            pattern: &IPV6,
            group: 0,
            candidates: IP_FIELDS,
        },
        operator: "=",
        shape: Shape::Scalar,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Domain,
            pattern: &DOMAIN_PHRASE,
            group: 1,
            candidates: &[
                "network.http.host",
                "dns.request.domain",
                "dns.response.domain",
                "url.address",
            ],
        },
        operator: "contains:anycase",
        shape: Shape::Scalar,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Username,
            pattern: &USER_PHRASE,
            group: 1,
            candidates: &[
                "actor.user.name",
                "identity.user.username",
                "src.process.user",
                "tgt.process.user",
            ],
        },
        operator: "in:anycase",
        shape: Shape::List,
    },
];

static PROCESS_PASS: Recognizer = Recognizer {
    kind: ClauseKind::Process,
    pattern: &PROCESS_BINARY,
    group: 1,
    candidates: &[
        "tgt.process.displayName",
        "tgt.process.name",
        "src.process.displayName",
        "src.process.name",
        "osSrc.process.displayName",
        "osSrc.process.name",
    ],
};

static PATH_PASS: Pass = Pass {
    recognizer: Recognizer {
        kind: ClauseKind::FilePath,
        pattern: &FILE_PATH,
        group: 1,
        candidates: &["tgt.file.name", "tgt.file.path", "src.file.name", "src.file.path"],
    },
    operator: "contains:anycase",
    shape: Shape::Scalar,
};

const CMDLINE_FIELDS: &[&str] = &[
    "tgt.process.cmdline",
    "src.process.cmdline",
    "osSrc.process.cmdline",
];

fn render_entity(entity: &ExtractedEntity) -> String {
    S1Syntax.clause(
        &entity.field,
        &entity.operator,
        &format_untyped(&entity.value, &S1Syntax),
    )
}

fn run_pass(pass: &Pass, text: &str, fields: &FieldMap, extraction: &mut Extraction) {
    for hit in pass.recognizer.scan(text, fields, &mut extraction.spans) {
        if pass.recognizer.kind == ClauseKind::Ipv6 && !plausible_ipv6(hit.value) {
            continue;
        }
        let value = match pass.shape {
            Shape::Scalar => Value::from(hit.value),
            Shape::List => Value::Array(vec![Value::from(hit.value)]),
        };
        extraction.push(ExtractedEntity::from_hit(
            pass.recognizer.kind,
            &hit,
            pass.operator,
            value,
        ));
    }
}

/// Free text to S1QL conditions. Every category is an independent pass over
/// the whole text.
pub fn extract(text: &str, fields: &FieldMap) -> Vec<Expression> {
    let mut extraction = Extraction::default();

    for hit in PORT_PASS.scan(text, fields, &mut extraction.spans) {
        match hit.value.parse::<u32>() {
            Ok(port @ 1..=65535) => extraction.push(ExtractedEntity::from_hit(
                ClauseKind::Port,
                &hit,
                "=",
                port,
            )),
            _ => debug!(value = hit.value, "Ignoring out of range port"),
        }
    }

    for pass in &IOC_PASSES {
        run_pass(pass, text, fields, &mut extraction);
    }

    let processes = PROCESS_PASS.scan(text, fields, &mut extraction.spans);
    if let Some(first) = processes.first() {
        let values: Vec<Value> = sorted_unique_lowercase(processes.iter().map(|hit| hit.value))
            .into_iter()
            .map(Value::String)
            .collect();
        extraction.push(ExtractedEntity::from_hit(
            ClauseKind::Process,
            first,
            "in:anycase",
            values,
        ));
    }

    run_pass(&PATH_PASS, text, fields, &mut extraction);
    extract_cmdline(text, fields, &mut extraction);

    extraction.into_expressions(render_entity)
}

/// Quoted fragments become command line conditions. Without any, switches
/// such as `-enc` are used, but only when the text talks about a command line.
fn extract_cmdline(text: &str, fields: &FieldMap, extraction: &mut Extraction) {
    let Some(field) = resolve_field(CMDLINE_FIELDS, fields) else {
        return;
    };

    let mut found = false;
    for caps in QUOTED.captures_iter(text) {
        let Some(content) = quoted_content(&caps) else {
            continue;
        };
        let value = content.as_str();
        if value.chars().count() < 3 || CMDLINE_STOPWORDS.contains(&value.to_lowercase().as_str())
        {
            continue;
        }
        found = true;
        extraction.push(ExtractedEntity::new(
            ClauseKind::Cmdline,
            field,
            "contains:anycase",
            value,
            content.range(),
        ));
    }

    if found || !text.to_lowercase().contains("cmdline") {
        return;
    }

    for caps in FLAG.captures_iter(text) {
        let Some(flag) = caps.get(1) else {
            continue;
        };
        if flag.as_str().len() > 2 {
            extraction.push(ExtractedEntity::new(
                ClauseKind::Cmdline,
                field,
                "contains:anycase",
                flag.as_str(),
                flag.range(),
            ));
        }
    }
}

fn event_names(schema: &dyn SchemaProvider, dataset: &str) -> Vec<String> {
    if let Some(meta) = schema.datasets().get(dataset) {
        if !meta.event_filter.is_empty() {
            return meta.event_filter.clone();
        }
    }

    EVENT_FILTERS
        .iter()
        .find(|(key, _)| *key == dataset)
        .map(|(_, names)| names.iter().map(|n| n.to_string()).collect())
        .unwrap_or_default()
}

fn event_filter(names: &[String]) -> Option<Expression> {
    if names.is_empty() {
        return None;
    }

    let value = Value::from(names.to_vec());
    Some(Expression::new(
        S1Syntax.clause(EVENT_NAME_FIELD, "in", &format_untyped(&value, &S1Syntax)),
        ClauseMeta::new(ClauseKind::EventFilter)
            .with_field(EVENT_NAME_FIELD)
            .with_operator("in")
            .with_value(value),
    ))
}

pub struct S1ql;

impl QueryCompiler for S1ql {
    fn dialect(&self) -> Dialect {
        Dialect::S1ql
    }

    fn resolver(&self) -> &DatasetResolver {
        &RESOLVER
    }

    fn operator_table(&self, schema: &dyn SchemaProvider) -> OperatorTable {
        let mut table = OperatorTable::from_schema(OPERATORS, schema);
        if table.normalize("equals").is_err() {
            table.add_alias("equals", "=");
        }
        table
    }

    #[instrument(skip_all, fields(dialect = "s1ql"))]
    fn compile(
        &self,
        schema: &dyn SchemaProvider,
        request: &BuildRequest,
    ) -> Result<QueryResult, TranslateError> {
        let boolean_operator =
            BooleanOperator::parse_or_default(request.boolean_operator.as_deref())?;
        let intent = request.intent();
        if request.filters.is_empty() && intent.is_none() {
            return Err(TranslateError::InsufficientInput(
                "Must provide either filters or a natural language intent".to_string(),
            ));
        }

        let resolution = RESOLVER.resolve(request.dataset(), intent, schema.datasets())?;
        let dataset = resolution.key.clone();
        let fields = schema.fields(&dataset);
        let operators = self.operator_table(schema);
        let ctx = FilterContext {
            dataset: &dataset,
            fields: &fields,
            operators: &operators,
            syntax: &S1Syntax,
            default_operator: "=",
        };

        let mut plan = QueryPlan::new(resolution);
        for filter in &request.filters {
            plan.push(build_filter(filter, &ctx)?);
        }

        let extracted = intent.map(|text| extract(text, &fields)).unwrap_or_default();
        let names = event_names(schema, &dataset);
        let chosen_deliberately = matches!(
            plan.resolution.source,
            ResolutionSource::Explicit | ResolutionSource::Inferred
        );
        if extracted.is_empty()
            && request.filters.is_empty()
            && !chosen_deliberately
            && names.is_empty()
        {
            return Err(TranslateError::InsufficientInput(
                "No valid expressions could be generated from the intent".to_string(),
            ));
        }
        plan.extend(extracted);

        if let Some(expression) = event_filter(&names) {
            plan.prepend(expression);
        }
        plan.dedup();
        plan.apply_limit(&LIMITS, request.limit);

        let query = boolean_operator.join(&plan.clauses());
        let mut metadata = QueryMetadata::from_plan(Dialect::S1ql, &plan);
        metadata.boolean_operator = Some(boolean_operator);
        if let Some(meta) = schema.datasets().get(&dataset) {
            metadata.dataset_display_name = meta.name.clone();
            metadata.dataset_metadata = meta.metadata.clone();
        }

        debug!(%query, clauses = plan.expressions.len(), "Compiled S1QL");
        Ok(QueryResult { query, metadata })
    }
}
