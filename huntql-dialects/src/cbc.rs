//! Carbon Black Cloud: `field:value` terms against a search type.

use huntql_schema::{FieldMap, SchemaProvider};
use huntql_translate::{
    BuildRequest, Dialect, QueryCompiler, QueryMetadata, QueryResult, TranslateError,
    dataset::DatasetResolver,
    expression::{ClauseKind, ClauseMeta, Expression},
    extract::{ExtractedEntity, Extraction, Recognizer},
    field::resolve_field,
    filter::{FilterContext, build_filter},
    operator::OperatorTable,
    patterns::{
        DOMAIN_PHRASE, FILE_PATH, FLAG, IPV4, IPV6, MD5, PORT, PROCESS_BINARY, QUOTED, SHA256,
        USER_PHRASE, WORD, plausible_ipv6, quoted_content,
    },
    plan::{BooleanOperator, LimitPolicy, QueryPlan},
    time_window::TimeWindow,
    value::{LiteralSyntax, format_untyped},
};
use tracing::{debug, instrument};

use crate::CMDLINE_STOPWORDS;

pub const DEFAULT_SEARCH_TYPE: &str = "process_search";
pub const LIMITS: LimitPolicy = LimitPolicy {
    default: 100,
    max: 5000,
};

static RESOLVER: DatasetResolver = DatasetResolver {
    noun: "search type",
    aliases: &[
        ("process", "process_search"),
        ("binary", "binary_search"),
        ("alert", "alert_search"),
        ("alerts", "alert_search"),
        ("threat", "threat_report_search"),
        ("threat_report", "threat_report_search"),
        ("report", "threat_report_search"),
    ],
    keywords: &[
        ("binary", "binary_search"),
        ("alert", "alert_search"),
        ("threat report", "threat_report_search"),
        ("report", "threat_report_search"),
        ("process", "process_search"),
    ],
    default: Some(DEFAULT_SEARCH_TYPE),
    fallback_to_first: true,
};

/// Characters the search syntax gives meaning to. A leading `/` opens a regex.
const RESERVED: &[char] = &[
    '"', '(', ')', '[', ']', '{', '}', ':', '!', '^', '~', '\\', '/', '*', '?', '+', '-', '&',
    '|', '<', '>', '=',
];

/// Filler that never becomes a full text term.
const STOPWORDS: &[&str] = &[
    "find", "show", "list", "display", "get", "search", "look", "looking", "for", "all", "any",
    "the", "and", "not", "with", "without", "from", "into", "that", "this", "these", "those",
    "which", "where", "when", "who", "what", "are", "was", "were", "been", "has", "have", "had",
    "activity", "activities", "event", "events", "process", "processes", "binary", "binaries",
    "file", "files", "named", "name", "running", "run", "runs", "ran", "executed", "execution",
    "launched", "launching", "started", "starting", "spawned", "via", "using", "used", "ip",
    "ips", "address", "addresses", "hash", "hashes", "md5", "sha256", "port", "ports", "domain",
    "user", "username", "host", "hostname", "last", "past", "minute", "minutes", "hour",
    "hours", "day", "days", "week", "weeks", "month", "months", "cmdline", "command", "line",
    "commandline", "containing", "contains", "path", "connection", "connections", "network",
    "alert", "alerts", "report", "reports", "threat", "query", "queries",
];

const CMDLINE_FIELDS: &[&str] = &["process_cmdline", "cmdline"];
const CMDLINE_MARKERS: &[&str] = &["cmdline", "command line", "commandline"];

/// Bare terms, double quoted once they hold whitespace or query syntax.
struct CbcSyntax;

impl LiteralSyntax for CbcSyntax {
    fn quote(&self, raw: &str) -> String {
        if raw.is_empty() || raw.chars().any(|c| c.is_whitespace() || RESERVED.contains(&c)) {
            format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
        } else {
            raw.to_string()
        }
    }

    fn list(&self, items: &[String]) -> String {
        format!("({})", items.join(" OR "))
    }

    fn clause(&self, field: &str, _operator: &str, literal: &str) -> String {
        format!("{field}:{literal}")
    }
}

struct Pass {
    recognizer: Recognizer,
    lowercase: bool,
}

static ADDRESS_PASSES: [Pass; 4] = [
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Md5,
            pattern: &MD5,
            group: 0,
            candidates: &["process_md5", "md5"],
        },
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Sha256,
            pattern: &SHA256,
            group: 0,
            candidates: &["process_sha256", "sha256"],
        },
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Ipv4,
            pattern: &IPV4,
            group: 0,
            candidates: &["ipaddr", "netconn_ipv4"],
        },
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Ipv6,
            pattern: &IPV6,
            group: 0,
            candidates: &["ipv6addr", "netconn_ipv6"],
        },
        lowercase: false,
    },
];

static ENTITY_PASSES: [Pass; 3] = [
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Process,
            pattern: &PROCESS_BINARY,
            group: 1,
            candidates: &["process_name", "childproc_name"],
        },
        lowercase: true,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Domain,
            pattern: &DOMAIN_PHRASE,
            group: 1,
            candidates: &["domain", "netconn_domain"],
        },
        lowercase: false,
    },
    Pass {
        recognizer: Recognizer {
            kind: ClauseKind::Username,
            pattern: &USER_PHRASE,
            group: 1,
            candidates: &["username", "process_username"],
        },
        lowercase: false,
    },
];

static PORT_PASS: Recognizer = Recognizer {
    kind: ClauseKind::Port,
    pattern: &PORT,
    group: 1,
    candidates: &["ipport", "netconn_port"],
};

static PATH_PASS: Recognizer = Recognizer {
    kind: ClauseKind::FilePath,
    pattern: &FILE_PATH,
    group: 1,
    candidates: &["path", "filemod_name"],
};

fn render_entity(entity: &ExtractedEntity) -> String {
    CbcSyntax.clause(
        &entity.field,
        &entity.operator,
        &format_untyped(&entity.value, &CbcSyntax),
    )
}

/// What free text contributed to a CBC query.
#[derive(Debug, Default)]
pub struct CbcExtraction {
    pub expressions: Vec<Expression>,
    /// Relative window in the `-24h` form the search API expects.
    pub time_window: Option<String>,
}

pub fn extract(text: &str, fields: &FieldMap) -> CbcExtraction {
    let mut extraction = Extraction::default();

    run_passes(&ADDRESS_PASSES, text, fields, &mut extraction);
    extract_ports(text, fields, &mut extraction);
    run_passes(&ENTITY_PASSES, text, fields, &mut extraction);

    extract_cmdline(text, fields, &mut extraction);
    for hit in PATH_PASS.scan_unclaimed(text, fields, &mut extraction.spans) {
        extraction.push(ExtractedEntity::from_hit(ClauseKind::FilePath, &hit, ":", hit.value));
    }

    let mut time_window = None;
    for (window, span) in TimeWindow::find_all(text) {
        extraction.spans.claim(ClauseKind::TimeRange, span);
        if time_window.is_none() {
            time_window = Some(format!("-{}", window.to_timespan()));
        }
    }

    let keywords = residual_keywords(text, &extraction);
    let mut expressions = extraction.into_expressions(render_entity);
    expressions.extend(keywords);

    CbcExtraction {
        expressions,
        time_window,
    }
}

fn run_passes(passes: &[Pass], text: &str, fields: &FieldMap, extraction: &mut Extraction) {
    for pass in passes {
        for hit in pass.recognizer.scan(text, fields, &mut extraction.spans) {
            if pass.recognizer.kind == ClauseKind::Ipv6 && !plausible_ipv6(hit.value) {
                continue;
            }
            let value = if pass.lowercase {
                hit.value.to_lowercase()
            } else {
                hit.value.to_string()
            };
            extraction.push(ExtractedEntity::from_hit(pass.recognizer.kind, &hit, ":", value));
        }
    }
}

fn extract_ports(text: &str, fields: &FieldMap, extraction: &mut Extraction) {
    for hit in PORT_PASS.scan(text, fields, &mut extraction.spans) {
        match hit.value.parse::<u32>() {
            Ok(port @ 1..=65535) => {
                extraction.push(ExtractedEntity::from_hit(ClauseKind::Port, &hit, ":", port))
            }
            _ => debug!(value = hit.value, "Ignoring out of range port"),
        }
    }
}

fn extract_cmdline(text: &str, fields: &FieldMap, extraction: &mut Extraction) {
    let Some(field) = resolve_field(CMDLINE_FIELDS, fields) else {
        return;
    };

    let mut found = false;
    for caps in QUOTED.captures_iter(text) {
        let (Some(whole), Some(content)) = (caps.get(0), quoted_content(&caps)) else {
            continue;
        };
        let value = content.as_str();
        if value.chars().count() < 3 || CMDLINE_STOPWORDS.contains(&value.to_lowercase().as_str())
        {
            continue;
        }
        found = true;
        extraction.spans.claim(ClauseKind::Cmdline, whole.range());
        extraction.push(ExtractedEntity::new(
            ClauseKind::Cmdline,
            field,
            ":",
            value,
            whole.range(),
        ));
    }

    let lowered = text.to_lowercase();
    if found || !CMDLINE_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return;
    }

    for caps in FLAG.captures_iter(text) {
        let Some(flag) = caps.get(1) else {
            continue;
        };
        if flag.as_str().len() > 2 {
            extraction.spans.claim(ClauseKind::Cmdline, flag.range());
            extraction.push(ExtractedEntity::new(
                ClauseKind::Cmdline,
                field,
                ":",
                flag.as_str(),
                flag.range(),
            ));
        }
    }
}

/// Whatever no pass claimed, minus filler and numbers, as bare terms.
fn residual_keywords(text: &str, extraction: &Extraction) -> Vec<Expression> {
    let mut keywords = Vec::new();
    for (_, segment) in extraction.spans.residual(text) {
        for token in WORD.find_iter(segment) {
            let word = token
                .as_str()
                .trim_matches(|c| c == '-' || c == '.')
                .to_lowercase();
            if word.chars().count() < 3
                || word.chars().all(|c| c.is_ascii_digit() || c == '.')
                || STOPWORDS.contains(&word.as_str())
            {
                continue;
            }
            keywords.push(Expression::new(
                word.clone(),
                ClauseMeta::new(ClauseKind::Keyword).with_value(word),
            ));
        }
    }
    keywords
}

/// Term fields are shared across search types, so terms are checked against
/// every field the schema knows.
fn term_fields(schema: &dyn SchemaProvider) -> FieldMap {
    let mut fields = FieldMap::new();
    for key in schema.datasets().keys() {
        fields.extend(schema.fields(key));
    }
    fields
}

pub struct Cbc;

impl QueryCompiler for Cbc {
    fn dialect(&self) -> Dialect {
        Dialect::Cbc
    }

    fn resolver(&self) -> &DatasetResolver {
        &RESOLVER
    }

    fn operator_table(&self, schema: &dyn SchemaProvider) -> OperatorTable {
        let mut table = OperatorTable::from_schema(&[":"], schema);
        for alias in ["=", "==", "equals", "is"] {
            table.add_alias(alias, ":");
        }
        table
    }

    #[instrument(skip_all, fields(dialect = "cbc"))]
    fn compile(
        &self,
        schema: &dyn SchemaProvider,
        request: &BuildRequest,
    ) -> Result<QueryResult, TranslateError> {
        let boolean_operator =
            BooleanOperator::parse_or_default(request.boolean_operator.as_deref())?;
        let resolution = RESOLVER.resolve(request.dataset(), request.intent(), schema.datasets())?;
        let search_type = resolution.key.clone();
        let fields = term_fields(schema);
        let operators = self.operator_table(schema);
        let ctx = FilterContext {
            dataset: &search_type,
            fields: &fields,
            operators: &operators,
            syntax: &CbcSyntax,
            default_operator: ":",
        };

        let mut plan = QueryPlan::new(resolution);
        for term in &request.filters {
            plan.push(build_filter(term, &ctx)?);
        }

        let mut time_window = None;
        if let Some(intent) = request.intent() {
            let extracted = extract(intent, &fields);
            plan.extend(extracted.expressions);
            time_window = extracted.time_window;
        }

        if plan.expressions.is_empty() {
            return Err(TranslateError::InsufficientInput(
                "No expressions provided".to_string(),
            ));
        }

        plan.dedup();
        plan.apply_limit(&LIMITS, request.limit);

        let query = plan
            .clauses()
            .join(&format!(" {} ", boolean_operator.as_str()));
        let mut metadata = QueryMetadata::from_plan(Dialect::Cbc, &plan);
        metadata.boolean_operator = Some(boolean_operator);
        metadata.time_window = time_window;
        if let Some(meta) = schema.datasets().get(&search_type) {
            metadata.dataset_display_name = meta.name.clone();
            metadata.dataset_metadata = meta.metadata.clone();
        }

        debug!(%query, terms = plan.expressions.len(), "Compiled CBC query");
        Ok(QueryResult { query, metadata })
    }
}

#[cfg(test)]
mod tests {
    use huntql_schema::{Schema, parse_schema};
    use huntql_translate::filter::FilterSpec;
    use serde_json::json;
    use test_case::test_case;

    use super::*;

    fn schema() -> Schema {
        parse_schema(json!({
            "search_types": {
                "process_search": "Process activity events",
                "binary_search": "Information about binaries",
                "alert_search": {"name": "Alerts"}
            },
            "process_search_fields": {
                "process_name": {"type": "string"},
                "process_md5": {"type": "string"},
                "process_sha256": {"type": "string"},
                "ipaddr": {"type": "string"},
                "ipv6addr": {"type": "string"},
                "ipport": {"type": "number"},
                "process_cmdline": {"type": "string"},
                "username": {"type": "string"},
                "domain": {"type": "string"},
                "path": {"type": "string"}
            },
            "binary_search_fields": {
                "binary_name": {"type": "string"},
                "binary_md5": {"type": "string"}
            }
        }))
        .unwrap()
    }

    fn compile(request: BuildRequest) -> Result<QueryResult, TranslateError> {
        Cbc.compile(&schema(), &request)
    }

    fn intent(text: &str) -> QueryResult {
        compile(BuildRequest::builder().intent(text).build()).unwrap()
    }

    #[test_case("plain", "plain" ; "bare")]
    #[test_case("Microsoft Edge", "\"Microsoft Edge\"" ; "whitespace")]
    #[test_case(r"C:\Windows\cmd.exe", r#""C:\\Windows\\cmd.exe""# ; "path")]
    #[test_case("say \"hi\"", r#""say \"hi\"""# ; "embedded quote")]
    #[test_case("2001:db8::1", "\"2001:db8::1\"" ; "colon")]
    #[test_case("", "\"\"" ; "empty")]
    #[test_case("/tmp/payload.sh", "\"/tmp/payload.sh\"" ; "leading slash")]
    #[test_case("evil*", "\"evil*\"" ; "wildcard")]
    #[test_case("-enc", "\"-enc\"" ; "leading dash")]
    #[test_case("a&&b", "\"a&&b\"" ; "ampersand")]
    #[test_case("x=1", "\"x=1\"" ; "equals")]
    fn quoting(raw: &str, expected: &str) {
        assert_eq!(CbcSyntax.quote(raw), expected);
    }

    #[test_case("find processes named powershell.exe", "process_name:powershell.exe" ; "process")]
    #[test_case(
        "show me activity for IP 1.2.3.4 and hash 5d41402abc4b2a76b9719d911017c592",
        "process_md5:5d41402abc4b2a76b9719d911017c592 AND ipaddr:1.2.3.4" ;
        "iocs"
    )]
    #[test_case("find activity for 2001:db8::1", "ipv6addr:\"2001:db8::1\"" ; "ipv6")]
    #[test_case("find connections on port 443", "ipport:443" ; "port")]
    #[test_case(
        "find activity for IP 10.0.0.1 and hash 5d41402abc4b2a76b9719d911017c592 and port 8080",
        "process_md5:5d41402abc4b2a76b9719d911017c592 AND ipaddr:10.0.0.1 AND ipport:8080" ;
        "multiple iocs"
    )]
    #[test_case("find processes in domain CORP", "domain:CORP" ; "domain")]
    #[test_case(
        "find processes with cmdline containing \"-enc\"",
        "process_cmdline:\"-enc\"" ;
        "quoted cmdline"
    )]
    #[test_case(
        "processes with command line flag -EncodedCommand",
        "process_cmdline:\"-EncodedCommand\" AND flag" ;
        "cmdline flag"
    )]
    #[test_case("find malicious processes", "malicious" ; "residual keyword")]
    #[test_case("find processes running as administrator", "administrator" ; "residual user")]
    #[test_case(
        "svchost.exe connecting in the last 24 hours",
        "process_name:svchost.exe AND connecting" ;
        "time window words claimed"
    )]
    #[test_case(
        r#"find "with" processes named cmd.exe"#,
        "process_name:cmd.exe" ;
        "quoted filler word"
    )]
    #[test_case(
        r#"find "The" malware"#,
        "malware" ;
        "quoted filler word any case"
    )]
    fn natural_language(text: &str, expected: &str) {
        assert_eq!(intent(text).query, expected);
    }

    #[test]
    fn quoted_path_is_a_cmdline_term() {
        let result = intent(r#"find processes with path "C:\Windows\System32\cmd.exe""#);
        assert_eq!(
            result.query,
            r#"process_name:cmd.exe AND process_cmdline:"C:\\Windows\\System32\\cmd.exe""#
        );
    }

    #[test]
    fn posix_path_is_quoted() {
        let result = intent("files in /tmp/payload.sh");
        assert_eq!(result.query, "path:\"/tmp/payload.sh\"");
    }

    #[test]
    fn sha256_under_binary_search() {
        let sha256 = "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae";
        let result = intent(&format!("find binary with hash {sha256}"));
        assert_eq!(result.query, format!("process_sha256:{sha256}"));
        assert_eq!(result.metadata.dataset, "binary_search");
    }

    #[test]
    fn time_window_in_metadata() {
        let result = intent("malware in the past 2 weeks");
        assert_eq!(result.metadata.time_window.as_deref(), Some("-14d"));
        assert_eq!(result.query, "malware");
    }

    #[test]
    fn structured_terms() {
        let result = compile(
            BuildRequest::builder()
                .filters(vec![
                    FilterSpec::Raw("username:admin".to_string()),
                    FilterSpec::Raw("domain:WORKGROUP".to_string()),
                    FilterSpec::structured("process_name", "equals", "Microsoft Edge"),
                ])
                .build(),
        )
        .unwrap();
        assert_eq!(
            result.query,
            "username:admin AND domain:WORKGROUP AND process_name:\"Microsoft Edge\""
        );
        assert_eq!(result.metadata.dataset, "process_search");
        assert_eq!(result.metadata.boolean_operator, Some(BooleanOperator::And));
    }

    #[test]
    fn or_is_not_parenthesized() {
        let result = compile(
            BuildRequest::builder()
                .filters(vec![
                    FilterSpec::Raw("process_name:cmd.exe".to_string()),
                    FilterSpec::Raw("process_name:powershell.exe".to_string()),
                ])
                .boolean_operator("Or")
                .build(),
        )
        .unwrap();
        assert_eq!(
            result.query,
            "process_name:cmd.exe OR process_name:powershell.exe"
        );
        assert_eq!(result.metadata.boolean_operator, Some(BooleanOperator::Or));
    }

    #[test]
    fn list_values() {
        let result = compile(
            BuildRequest::builder()
                .filters(vec![FilterSpec::structured(
                    "process_name",
                    ":",
                    json!(["cmd.exe", "powershell.exe"]),
                )])
                .build(),
        )
        .unwrap();
        assert_eq!(result.query, "process_name:(cmd.exe OR powershell.exe)");
    }

    #[test_case("alerts", "alert_search", &["normalised_from:alerts->alert_search"] ; "alias")]
    #[test_case("Process_Search", "process_search", &["normalised_from:Process_Search->process_search"] ; "case")]
    #[test_case("process_search", "process_search", &[] ; "verbatim")]
    #[test_case("bin", "binary_search", &["prefix_matched:binary_search"] ; "prefix")]
    fn search_type_resolution(requested: &str, expected: &str, log: &[&str]) {
        let result = compile(
            BuildRequest::builder()
                .dataset(requested)
                .filters(vec![FilterSpec::Raw("process_name:x".to_string())])
                .build(),
        )
        .unwrap();
        assert_eq!(result.metadata.dataset, expected);
        assert_eq!(result.metadata.normalisation, log);
    }

    #[test]
    fn limits() {
        let request = |limit| {
            BuildRequest::builder()
                .filters(vec![FilterSpec::Raw("process_name:test".to_string())])
                .limit(limit)
                .build()
        };
        let clamped = compile(request(10_000)).unwrap();
        assert_eq!(clamped.metadata.limit, 5000);
        assert_eq!(clamped.metadata.limit_clamped, Some(5000));

        let kept = compile(request(50)).unwrap();
        assert_eq!(kept.metadata.limit, 50);
        assert_eq!(kept.metadata.limit_clamped, None);
    }

    #[test]
    fn errors() {
        assert_eq!(
            compile(BuildRequest::default()).unwrap_err(),
            TranslateError::InsufficientInput("No expressions provided".to_string())
        );
        assert_eq!(
            compile(
                BuildRequest::builder()
                    .filters(vec![FilterSpec::Raw(
                        "process_name:test; DROP TABLE users".to_string()
                    )])
                    .build()
            )
            .unwrap_err()
            .kind(),
            "unsafe_expression"
        );
        assert_eq!(
            compile(
                BuildRequest::builder()
                    .filters(vec![FilterSpec::Raw("process_name:test".to_string())])
                    .boolean_operator("XOR")
                    .build()
            )
            .unwrap_err()
            .kind(),
            "unsupported_boolean_operator"
        );
        assert_eq!(
            compile(BuildRequest::builder().intent("the and for").build()).unwrap_err(),
            TranslateError::InsufficientInput("No expressions provided".to_string())
        );
    }
}
