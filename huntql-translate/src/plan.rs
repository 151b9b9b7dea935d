use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    dataset::Resolution,
    error::TranslateError,
    expression::{ClauseMeta, Expression, dedup},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicy {
    pub default: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppliedLimit {
    pub value: u32,
    /// Whether the requested limit had to be moved into range.
    pub clamped: bool,
}

impl LimitPolicy {
    pub fn apply(&self, requested: Option<i64>) -> AppliedLimit {
        let Some(requested) = requested else {
            return AppliedLimit {
                value: self.default,
                clamped: false,
            };
        };

        let value = requested.clamp(1, i64::from(self.max)) as u32;
        AppliedLimit {
            value,
            clamped: i64::from(value) != requested,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BooleanOperator {
    #[default]
    And,
    Or,
}

impl BooleanOperator {
    pub fn parse_or_default(value: Option<&str>) -> Result<Self, TranslateError> {
        match value.map(str::trim).filter(|v| !v.is_empty()) {
            Some(value) => value.parse(),
            None => Ok(Self::default()),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }

    /// Joins clauses, parenthesizing only a disjunction of several clauses.
    pub fn join<S: AsRef<str>>(&self, clauses: &[S]) -> String {
        let joined = clauses
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join(&format!(" {} ", self.as_str()));
        if *self == Self::Or && clauses.len() > 1 {
            format!("({joined})")
        } else {
            joined
        }
    }
}

impl FromStr for BooleanOperator {
    type Err = TranslateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AND" => Ok(Self::And),
            "OR" => Ok(Self::Or),
            _ => Err(TranslateError::UnsupportedBooleanOperator(s.to_string())),
        }
    }
}

impl fmt::Display for BooleanOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ordered clauses and decisions of one query, before serialization.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub resolution: Resolution,
    pub expressions: Vec<Expression>,
    pub fields: Vec<String>,
    pub limit: Option<AppliedLimit>,
}

impl QueryPlan {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            expressions: Vec::new(),
            fields: Vec::new(),
            limit: None,
        }
    }

    pub fn dataset(&self) -> &str {
        &self.resolution.key
    }

    pub fn push(&mut self, expression: Expression) {
        self.expressions.push(expression);
    }

    pub fn extend(&mut self, expressions: impl IntoIterator<Item = Expression>) {
        self.expressions.extend(expressions);
    }

    pub fn prepend(&mut self, expression: Expression) {
        self.expressions.insert(0, expression);
    }

    pub fn dedup(&mut self) {
        self.expressions = dedup(std::mem::take(&mut self.expressions));
    }

    pub fn project(&mut self, fields: Vec<String>) {
        self.fields = fields;
    }

    pub fn apply_limit(&mut self, policy: &LimitPolicy, requested: Option<i64>) -> AppliedLimit {
        let limit = policy.apply(requested);
        self.limit = Some(limit);
        limit
    }

    pub fn clauses(&self) -> Vec<&str> {
        self.expressions.iter().map(|e| e.clause.as_str()).collect()
    }

    pub fn recognised(&self) -> Vec<ClauseMeta> {
        self.expressions.iter().map(|e| e.meta.clone()).collect()
    }
}
