use std::{fmt, str::FromStr};

use huntql_schema::SchemaProvider;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    dataset::{DatasetResolver, ResolutionSource},
    error::TranslateError,
    expression::ClauseMeta,
    filter::FilterSpec,
    operator::OperatorTable,
    plan::{BooleanOperator, QueryPlan},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Pipeline stages: `dataset = x | filter ... | fields ... | limit n`.
    Xql,
    /// Boolean event queries joined with AND / OR.
    S1ql,
    /// `field:value` terms against a search type.
    Cbc,
    /// Tabular hunting queries: `Table | where ... | project ...`.
    Kql,
}

impl Dialect {
    pub const ALL: [Dialect; 4] = [Dialect::Xql, Dialect::S1ql, Dialect::Cbc, Dialect::Kql];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xql => "xql",
            Self::S1ql => "s1ql",
            Self::Cbc => "cbc",
            Self::Kql => "kql",
        }
    }
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xql" | "cortex" => Ok(Self::Xql),
            "s1ql" | "s1" | "sentinelone" => Ok(Self::S1ql),
            "cbc" | "carbonblack" => Ok(Self::Cbc),
            "kql" | "defender" => Ok(Self::Kql),
            _ => Err(format!(
                "unknown dialect '{s}', expected one of: xql, s1ql, cbc, kql"
            )),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of one translation call. Dialects ignore the parts they have no use
/// for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, bon::Builder)]
#[serde(default)]
pub struct BuildRequest {
    #[builder(into)]
    #[serde(alias = "search_type", alias = "table")]
    pub dataset: Option<String>,

    #[builder(default)]
    #[serde(alias = "terms", alias = "where")]
    pub filters: Vec<FilterSpec>,

    #[builder(into)]
    #[serde(alias = "natural_language_intent")]
    pub intent: Option<String>,

    #[builder(into)]
    pub boolean_operator: Option<String>,

    #[builder(default)]
    #[serde(alias = "select")]
    pub fields: Vec<String>,

    pub limit: Option<i64>,

    /// Pipeline dialect: an extra time filter. Tabular dialect: the lookback window.
    #[builder(into)]
    #[serde(alias = "time_window")]
    pub time_range: Option<String>,

    #[builder(into)]
    pub summarize: Option<String>,

    #[builder(into)]
    pub order_by: Option<String>,
}

impl BuildRequest {
    /// The free text intent, if it has any content.
    pub fn intent(&self) -> Option<&str> {
        self.intent
            .as_deref()
            .map(str::trim)
            .filter(|intent| !intent.is_empty())
    }

    pub fn dataset(&self) -> Option<&str> {
        self.dataset
            .as_deref()
            .map(str::trim)
            .filter(|dataset| !dataset.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMetadata {
    pub dialect: Dialect,
    pub dataset: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_display_name: Option<String>,

    pub resolution: ResolutionSource,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub normalisation: Vec<String>,

    pub recognised: Vec<ClauseMeta>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,

    pub limit: u32,

    /// Set to the effective limit when the requested one was out of range.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_clamped: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub boolean_operator: Option<BooleanOperator>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,

    #[serde(skip_serializing_if = "Value::is_null")]
    pub dataset_metadata: Value,
}

impl QueryMetadata {
    pub fn from_plan(dialect: Dialect, plan: &QueryPlan) -> Self {
        let limit = plan.limit.map(|l| l.value).unwrap_or_default();
        Self {
            dialect,
            dataset: plan.resolution.key.clone(),
            dataset_display_name: None,
            resolution: plan.resolution.source,
            normalisation: plan.resolution.log.clone(),
            recognised: plan.recognised(),
            fields: plan.fields.clone(),
            limit,
            limit_clamped: plan.limit.filter(|l| l.clamped).map(|l| l.value),
            boolean_operator: None,
            time_window: None,
            dataset_metadata: Value::Null,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    pub query: String,
    pub metadata: QueryMetadata,
}

impl fmt::Display for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query)
    }
}

/// One target query language.
///
/// Compilers hold no state across calls, so a single instance may be shared
/// by any number of threads against the same schema snapshot.
pub trait QueryCompiler: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn resolver(&self) -> &DatasetResolver;

    fn operator_table(&self, schema: &dyn SchemaProvider) -> OperatorTable;

    fn compile(
        &self,
        schema: &dyn SchemaProvider,
        request: &BuildRequest,
    ) -> Result<QueryResult, TranslateError>;

    /// Ready to run queries over one dataset, generated from its fields.
    fn example_queries(&self, _schema: &dyn SchemaProvider, _dataset: &str) -> Vec<String> {
        Vec::new()
    }
}
