use huntql_schema::FieldMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::TranslateError,
    expression::{ClauseKind, ClauseMeta, Expression},
    operator::OperatorTable,
    value::{LiteralSyntax, format_value},
};

/// A caller supplied filter: either dialect syntax passed through as is, or a
/// `{field, operator, value}` triple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterSpec {
    Raw(String),
    Structured {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operator: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Value>,
    },
}

impl FilterSpec {
    pub fn structured(field: &str, operator: &str, value: impl Into<Value>) -> Self {
        Self::Structured {
            field: field.to_string(),
            operator: Some(operator.to_string()),
            value: Some(value.into()),
        }
    }
}

/// What a filter is validated and rendered against.
pub struct FilterContext<'a> {
    pub dataset: &'a str,
    pub fields: &'a FieldMap,
    pub operators: &'a OperatorTable,
    pub syntax: &'a dyn LiteralSyntax,
    pub default_operator: &'a str,
}

pub fn build_filter(spec: &FilterSpec, ctx: &FilterContext) -> Result<Expression, TranslateError> {
    match spec {
        FilterSpec::Raw(raw) => build_raw(raw, ctx),
        FilterSpec::Structured {
            field,
            operator,
            value,
        } => build_structured(field, operator.as_deref(), value.as_ref(), ctx),
    }
}

fn build_raw(raw: &str, ctx: &FilterContext) -> Result<Expression, TranslateError> {
    let normalized = ctx.syntax.normalize_raw(raw);
    if normalized.is_empty() {
        return Err(TranslateError::InsufficientInput(
            "Filter expression is empty".to_string(),
        ));
    }
    check_safe(&normalized)?;

    let meta = ClauseMeta::new(ClauseKind::Raw).with_value(normalized.clone());
    Ok(Expression::new(normalized, meta))
}

fn build_structured(
    field: &str,
    operator: Option<&str>,
    value: Option<&Value>,
    ctx: &FilterContext,
) -> Result<Expression, TranslateError> {
    let field = field.trim();
    let Some(meta) = ctx.fields.get(field) else {
        return Err(TranslateError::UnknownField {
            field: field.to_string(),
            dataset: ctx.dataset.to_string(),
        });
    };

    let operator = ctx
        .operators
        .normalize(operator.unwrap_or(ctx.default_operator))?;

    let Some(value) = value else {
        return Err(TranslateError::MissingValue(field.to_string()));
    };

    let literal = format_value(field, value, meta.data_type(), ctx.syntax)?;
    let clause = ctx.syntax.clause(field, &operator, &literal);

    Ok(Expression::new(
        clause,
        ClauseMeta::new(ClauseKind::Structured)
            .with_field(field)
            .with_operator(operator)
            .with_value(value.clone()),
    ))
}

/// Rejects statement separators, pipes and control characters.
pub fn check_safe(expression: &str) -> Result<(), TranslateError> {
    match expression
        .chars()
        .find(|c| matches!(c, ';' | '|') || c.is_control())
    {
        Some(c) => Err(TranslateError::UnsafeExpression {
            expression: expression.to_string(),
            reason: format!("disallowed character {c:?}"),
        }),
        None => Ok(()),
    }
}
