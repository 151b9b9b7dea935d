use huntql_schema::DataType;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value;

use crate::error::TranslateError;

static DOUBLE_QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""((?:[^"\\]|\\.)*)""#).expect("double quoted regex"));

/// How a dialect spells literals and single clauses.
pub trait LiteralSyntax: Sync {
    fn quote(&self, raw: &str) -> String;

    /// Strings already written in the dialect's own syntax (function calls,
    /// enum references) that must not be quoted again.
    fn is_verbatim(&self, _raw: &str) -> bool {
        false
    }

    fn list(&self, items: &[String]) -> String {
        format!("({})", items.join(", "))
    }

    fn null(&self) -> &'static str {
        "null"
    }

    /// Rewrites quoting inside a raw pass-through expression.
    fn normalize_raw(&self, raw: &str) -> String {
        raw.trim().to_string()
    }

    fn clause(&self, field: &str, operator: &str, literal: &str) -> String {
        format!("{field} {operator} {literal}")
    }
}

/// Single quoted literals with `'` escaped as `\'`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SingleQuoted {
    /// Double backslashes before escaping quotes.
    pub escape_backslashes: bool,
}

impl SingleQuoted {
    pub const ESCAPED: Self = Self {
        escape_backslashes: true,
    };
}

impl LiteralSyntax for SingleQuoted {
    fn quote(&self, raw: &str) -> String {
        let escaped = if self.escape_backslashes {
            raw.replace('\\', "\\\\")
        } else {
            raw.to_string()
        };
        format!("'{}'", escaped.replace('\'', "\\'"))
    }
}

/// Replaces every `"..."` literal in `raw` with `quote` applied to its
/// unescaped content.
pub fn requote_double_quoted(raw: &str, quote: impl Fn(&str) -> String) -> String {
    DOUBLE_QUOTED
        .replace_all(raw, |caps: &Captures| quote(&caps[1].replace("\\\"", "\"")))
        .into_owned()
}

/// Renders a value without any type coercion. Cannot fail.
pub fn format_untyped(value: &Value, syntax: &dyn LiteralSyntax) -> String {
    match value {
        Value::Null => syntax.null().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if syntax.is_verbatim(s) => s.to_string(),
        Value::String(s) => syntax.quote(s),
        Value::Array(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|item| format_untyped(item, syntax))
                .collect();
            syntax.list(&rendered)
        }
        Value::Object(_) => syntax.quote(&value.to_string()),
    }
}

/// Renders a value for a field of the given type. Strings bound for numeric
/// fields must parse as integers.
pub fn format_value(
    field: &str,
    value: &Value,
    data_type: DataType,
    syntax: &dyn LiteralSyntax,
) -> Result<String, TranslateError> {
    if data_type != DataType::Numeric {
        return Ok(format_untyped(value, syntax));
    }

    match value {
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(|n| n.to_string())
            .map_err(|_| TranslateError::TypeMismatch {
                field: field.to_string(),
                value: s.to_string(),
            }),
        Value::Array(items) => format_list(field, items, data_type, syntax),
        _ => Ok(format_untyped(value, syntax)),
    }
}

pub fn format_list(
    field: &str,
    items: &[Value],
    data_type: DataType,
    syntax: &dyn LiteralSyntax,
) -> Result<String, TranslateError> {
    let rendered = items
        .iter()
        .map(|item| format_value(field, item, data_type, syntax))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(syntax.list(&rendered))
}
