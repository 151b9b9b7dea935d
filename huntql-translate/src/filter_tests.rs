use collection_macros::btreemap;
use huntql_schema::{FieldMap, FieldMeta};
use serde_json::{Value, json};
use test_case::test_case;

use crate::{
    error::TranslateError,
    expression::ClauseKind,
    filter::{FilterContext, FilterSpec, build_filter, check_safe},
    operator::OperatorTable,
    value::{LiteralSyntax, SingleQuoted, requote_double_quoted},
};

struct Requoting;

impl LiteralSyntax for Requoting {
    fn quote(&self, raw: &str) -> String {
        SingleQuoted::ESCAPED.quote(raw)
    }

    fn normalize_raw(&self, raw: &str) -> String {
        requote_double_quoted(raw.trim(), |s| self.quote(s))
    }
}

fn fields() -> FieldMap {
    btreemap! {
        "tgt.process.displayName".to_string() => FieldMeta::typed("String"),
        "src.process.name".to_string() => FieldMeta::typed("String"),
        "dst.port.number".to_string() => FieldMeta::typed("Numeric"),
    }
}

fn build(spec: &FilterSpec) -> Result<(String, ClauseKind), TranslateError> {
    let fields = fields();
    let operators = OperatorTable::with_symbols(&["=", "!=", "in", "contains"]);
    let ctx = FilterContext {
        dataset: "processes",
        fields: &fields,
        operators: &operators,
        syntax: &Requoting,
        default_operator: "=",
    };
    build_filter(spec, &ctx).map(|expr| (expr.clause, expr.meta.kind))
}

fn structured(field: &str, operator: Option<&str>, value: Option<Value>) -> FilterSpec {
    FilterSpec::Structured {
        field: field.to_string(),
        operator: operator.map(str::to_string),
        value,
    }
}

#[test_case(
    structured("tgt.process.displayName", Some("="), Some(json!("powershell.exe"))),
    "tgt.process.displayName = 'powershell.exe'" ;
    "equals string"
)]
#[test_case(
    structured("tgt.process.displayName", None, Some(json!("cmd.exe"))),
    "tgt.process.displayName = 'cmd.exe'" ;
    "default operator"
)]
#[test_case(
    structured("src.process.name", Some("IN"), Some(json!(["psexec.exe", "paexec.exe"]))),
    "src.process.name in ('psexec.exe', 'paexec.exe')" ;
    "membership list"
)]
#[test_case(
    structured("dst.port.number", Some("="), Some(json!("443"))),
    "dst.port.number = 443" ;
    "numeric string coerced"
)]
#[test_case(
    structured(" dst.port.number ", Some("!="), Some(json!(80))),
    "dst.port.number != 80" ;
    "field trimmed"
)]
fn structured_filters(spec: FilterSpec, expected: &str) {
    assert_eq!(build(&spec), Ok((expected.to_string(), ClauseKind::Structured)));
}

#[test]
fn raw_double_quotes_are_requoted() {
    let spec = FilterSpec::Raw(r#" tgt.process.cmdline contains "C:\Temp" "#.to_string());
    assert_eq!(
        build(&spec),
        Ok((
            r"tgt.process.cmdline contains 'C:\\Temp'".to_string(),
            ClauseKind::Raw
        ))
    );
}

#[test_case(
    structured("nope", Some("="), Some(json!("x"))),
    TranslateError::UnknownField { field: "nope".to_string(), dataset: "processes".to_string() } ;
    "unknown field"
)]
#[test_case(
    structured("src.process.name", Some("~~"), Some(json!("x"))),
    TranslateError::UnknownOperator("~~".to_string()) ;
    "unknown operator"
)]
#[test_case(
    structured("src.process.name", Some("="), None),
    TranslateError::MissingValue("src.process.name".to_string()) ;
    "missing value"
)]
#[test_case(
    structured("dst.port.number", Some("="), Some(json!("https"))),
    TranslateError::TypeMismatch { field: "dst.port.number".to_string(), value: "https".to_string() } ;
    "type mismatch"
)]
#[test_case(
    FilterSpec::Raw("   ".to_string()),
    TranslateError::InsufficientInput("Filter expression is empty".to_string()) ;
    "empty raw"
)]
fn rejected(spec: FilterSpec, expected: TranslateError) {
    assert_eq!(build(&spec), Err(expected));
}

#[test_case("a = 1; DROP TABLE users" ; "semicolon")]
#[test_case("a = 1 | delete" ; "pipe")]
#[test_case("a = 1\nb = 2" ; "newline")]
#[test_case("a = \u{0}" ; "nul")]
fn unsafe_raw_strings(raw: &str) {
    let err = build(&FilterSpec::Raw(raw.to_string())).unwrap_err();
    assert_eq!(err.kind(), "unsafe_expression");
    assert!(check_safe(raw).is_err());
}

#[test]
fn filter_specs_deserialize_untagged() {
    let specs: Vec<FilterSpec> = serde_json::from_value(json!([
        "event.type = 'Process Creation'",
        {"field": "src.process.name", "operator": "in", "value": ["a.exe"]},
        {"field": "dst.port.number", "value": null},
    ]))
    .unwrap();

    assert_eq!(
        specs,
        vec![
            FilterSpec::Raw("event.type = 'Process Creation'".to_string()),
            structured("src.process.name", Some("in"), Some(json!(["a.exe"]))),
            structured("dst.port.number", None, None),
        ]
    );
}
