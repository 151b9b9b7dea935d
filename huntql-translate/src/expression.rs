use std::fmt;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a clause came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseKind {
    Structured,
    Raw,
    EventFilter,
    TimeRange,
    Md5,
    Sha1,
    Sha256,
    Ipv4,
    Ipv6,
    Port,
    Process,
    ProcessKeyword,
    FilePath,
    Domain,
    Hostname,
    Username,
    Cmdline,
    Keyword,
}

/// Provenance of one rendered clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClauseMeta {
    #[serde(rename = "type")]
    pub kind: ClauseKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl ClauseMeta {
    pub fn new(kind: ClauseKind) -> Self {
        Self {
            kind,
            field: None,
            operator: None,
            value: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.value = Some(value.into());
        self
    }
}

/// A single rendered clause, before being joined into a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Expression {
    pub clause: String,
    pub meta: ClauseMeta,
}

impl Expression {
    pub fn new(clause: impl Into<String>, meta: ClauseMeta) -> Self {
        Self {
            clause: clause.into(),
            meta,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clause)
    }
}

/// Drops every expression whose rendered clause was already seen.
pub fn dedup(expressions: Vec<Expression>) -> Vec<Expression> {
    let mut seen = HashSet::with_capacity(expressions.len());
    expressions
        .into_iter()
        .filter(|expr| seen.insert(expr.clause.clone()))
        .collect()
}
