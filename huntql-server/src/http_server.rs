use std::{collections::BTreeMap, sync::Arc, time::Instant};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use color_eyre::Result;
use huntql_dialects::compiler_for;
use huntql_schema::{FieldMap, FieldMeta, OperatorDoc, OperatorVariant, Schema, SchemaProvider};
use huntql_translate::{
    BuildRequest, Dialect, QueryResult, TranslateError,
    dataset::{Resolution, ResolutionSource},
    field::suggest_fields,
    operator::OperatorTable,
};
use prometheus::TextEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{Level, error, info, span, warn};
use uuid::Uuid;

use crate::{config::Config, metrics::METRICS, schema_store::SchemaStore};

const INTERNAL_SERVER_ERROR: &str = "Internal server error";

struct App {
    stores: BTreeMap<Dialect, SchemaStore>,
}

impl App {
    fn new(config: Config) -> Self {
        let stores = config
            .schemas
            .into_iter()
            .map(|(dialect, path)| {
                let store = SchemaStore::new(dialect, path, config.reload_check_interval);
                (dialect, store)
            })
            .collect();
        Self { stores }
    }

    fn store(&self, dialect: &str) -> Result<(Dialect, &SchemaStore), HttpError> {
        let not_found = || {
            HttpError::new(
                StatusCode::NOT_FOUND,
                format!("dialect '{dialect}' is not configured"),
            )
        };
        let dialect: Dialect = dialect.parse().map_err(|_| not_found())?;
        let store = self.stores.get(&dialect).ok_or_else(not_found)?;
        Ok((dialect, store))
    }

    fn schema(&self, dialect: &str) -> Result<(Dialect, Arc<Schema>), HttpError> {
        let (dialect, store) = self.store(dialect)?;
        let schema = store.snapshot().map_err(|e| {
            HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to load {dialect} schema: {e:?}"),
            )
        })?;
        Ok((dialect, schema))
    }

    fn resolve(
        &self,
        dialect: &str,
        dataset: &str,
    ) -> Result<(Dialect, Arc<Schema>, Resolution), HttpError> {
        let (dialect, schema) = self.schema(dialect)?;
        let resolution = compiler_for(dialect)
            .resolver()
            .resolve(Some(dataset), None, schema.datasets())?;
        Ok((dialect, schema, resolution))
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
    kind: Option<&'static str>,
}

impl HttpError {
    fn new(status: StatusCode, message: String) -> HttpError {
        Self {
            status,
            message,
            kind: None,
        }
    }
}

impl From<TranslateError> for HttpError {
    fn from(e: TranslateError) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: e.to_string(),
            kind: Some(e.kind()),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = if self.status.is_server_error() {
            error!("Internal server error: {}", self.message);
            Json(json!({"error": INTERNAL_SERVER_ERROR}))
        } else {
            warn!("User error: {}", self.message);
            match self.kind {
                Some(kind) => Json(json!({"error": self.message, "kind": kind})),
                None => Json(json!({"error": self.message})),
            }
        };

        (self.status, body).into_response()
    }
}

async fn health_check() -> impl IntoResponse {
    "OK"
}

async fn metrics() -> Result<Response, HttpError> {
    let metric_families = prometheus::gather();
    let mut buffer = String::with_capacity(1024);
    let encoder = TextEncoder::new();
    encoder
        .encode_utf8(&metric_families, &mut buffer)
        .map_err(|e| {
            HttpError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode metrics: {e}"),
            )
        })?;
    Ok(buffer.into_response())
}

async fn get_dialects(State(state): State<Arc<App>>) -> Json<Vec<Dialect>> {
    Json(state.stores.keys().copied().collect())
}

#[derive(Serialize)]
struct DatasetSummary<'a> {
    key: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    field_count: usize,
}

#[derive(Debug, Default, Deserialize)]
struct KeywordParams {
    keyword: Option<String>,
}

impl KeywordParams {
    fn keyword(&self) -> Option<String> {
        self.keyword
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_lowercase)
    }
}

async fn get_datasets(
    State(state): State<Arc<App>>,
    Path(dialect): Path<String>,
    Query(params): Query<KeywordParams>,
) -> Result<Response, HttpError> {
    let (_, schema) = state.schema(&dialect)?;
    let keyword = params.keyword();
    let datasets: Vec<DatasetSummary> = schema
        .datasets()
        .iter()
        .filter(|(key, meta)| {
            keyword.as_deref().is_none_or(|keyword| {
                key.to_lowercase().contains(keyword)
                    || meta
                        .name
                        .as_deref()
                        .is_some_and(|name| name.to_lowercase().contains(keyword))
            })
        })
        .map(|(key, meta)| DatasetSummary {
            key,
            name: meta.name.as_deref(),
            description: meta.description.as_deref(),
            field_count: schema.fields(key).len(),
        })
        .collect();
    Ok(Json(datasets).into_response())
}

#[derive(Serialize)]
struct DatasetFields {
    dataset: String,
    resolution: ResolutionSource,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    normalisation: Vec<String>,
    fields: FieldMap,
}

async fn get_fields(
    State(state): State<Arc<App>>,
    Path((dialect, dataset)): Path<(String, String)>,
) -> Result<Json<DatasetFields>, HttpError> {
    let (_, schema, resolution) = state.resolve(&dialect, &dataset)?;

    Ok(Json(DatasetFields {
        fields: schema.fields(&resolution.key),
        dataset: resolution.key,
        resolution: resolution.source,
        normalisation: resolution.log,
    }))
}

#[derive(Serialize)]
struct FieldSuggestions<'a> {
    dataset: &'a str,
    suggestions: Vec<FieldSuggestion<'a>>,
}

#[derive(Serialize)]
struct FieldSuggestion<'a> {
    name: &'a str,
    #[serde(flatten)]
    meta: &'a FieldMeta,
}

async fn get_field_suggestions(
    State(state): State<Arc<App>>,
    Path((dialect, dataset)): Path<(String, String)>,
    Query(params): Query<KeywordParams>,
) -> Result<Response, HttpError> {
    let (_, schema, resolution) = state.resolve(&dialect, &dataset)?;
    let fields = schema.fields(&resolution.key);
    let keyword = params.keyword();

    let suggestions = suggest_fields(&fields, keyword.as_deref())
        .into_iter()
        .filter_map(|name| fields.get_key_value(name))
        .map(|(name, meta)| FieldSuggestion { name, meta })
        .collect();
    info!(%dialect, dataset = %resolution.key, ?keyword, "Suggested fields");
    Ok(Json(FieldSuggestions {
        dataset: &resolution.key,
        suggestions,
    })
    .into_response())
}

#[derive(Serialize)]
struct DatasetExamples {
    dataset: String,
    examples: Vec<String>,
}

async fn get_dataset_examples(
    State(state): State<Arc<App>>,
    Path((dialect, dataset)): Path<(String, String)>,
) -> Result<Json<DatasetExamples>, HttpError> {
    let (dialect, schema, resolution) = state.resolve(&dialect, &dataset)?;
    let mut examples = schema
        .datasets()
        .get(&resolution.key)
        .map(|meta| meta.example_queries.clone())
        .unwrap_or_default();
    examples.extend(compiler_for(dialect).example_queries(&*schema, &resolution.key));

    Ok(Json(DatasetExamples {
        dataset: resolution.key,
        examples,
    }))
}

async fn get_best_practices(
    State(state): State<Arc<App>>,
    Path(dialect): Path<String>,
) -> Result<Response, HttpError> {
    let (_, schema) = state.schema(&dialect)?;
    let best_practices = match &schema.best_practices {
        Value::Null => json!([]),
        value => value.clone(),
    };
    Ok(Json(json!({"best_practices": best_practices})).into_response())
}

#[derive(Debug, Default, Deserialize)]
struct CategoryParams {
    category: Option<String>,
}

async fn get_examples(
    State(state): State<Arc<App>>,
    Path(dialect): Path<String>,
    Query(params): Query<CategoryParams>,
) -> Result<Response, HttpError> {
    let (_, schema) = state.schema(&dialect)?;
    let Some(category) = params.category.as_deref().map(str::trim).filter(|c| !c.is_empty())
    else {
        return Ok(Json(json!({"examples": schema.example_queries})).into_response());
    };

    match schema.example_queries.get(category) {
        Some(examples) => {
            Ok(Json(json!({"category": category, "examples": examples})).into_response())
        }
        None => {
            let available: Vec<&str> = schema.example_queries.keys().map(String::as_str).collect();
            Err(HttpError::new(
                StatusCode::NOT_FOUND,
                format!(
                    "Unknown category '{category}'. Available: {}",
                    available.join(", ")
                ),
            ))
        }
    }
}

#[derive(Serialize)]
struct Operators<'a> {
    documented: &'a [OperatorDoc],
    variants: &'a BTreeMap<String, Vec<OperatorVariant>>,
    normalized: OperatorTable,
}

async fn get_operators(
    State(state): State<Arc<App>>,
    Path(dialect): Path<String>,
) -> Result<Response, HttpError> {
    let (dialect, schema) = state.schema(&dialect)?;
    let operators = Operators {
        documented: schema.operators(),
        variants: schema.operator_variants(),
        normalized: compiler_for(dialect).operator_table(&*schema),
    };
    Ok(Json(operators).into_response())
}

async fn build_query(
    State(state): State<Arc<App>>,
    Path(dialect): Path<String>,
    Json(request): Json<BuildRequest>,
) -> Result<Json<QueryResult>, HttpError> {
    let request_id = Uuid::now_v7();
    let span = span!(Level::INFO, "build", ?request_id, %dialect);
    let _enter = span.enter();

    let (dialect, schema) = state.schema(&dialect)?;
    let label = dialect.as_str();

    info!(?request, "Building query");
    let start = Instant::now();
    let result = compiler_for(dialect).compile(&*schema, &request);
    METRICS
        .query_build_latency
        .with_label_values(&[label])
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(result) => {
            METRICS.queries_built_total.with_label_values(&[label]).inc();
            info!(query = %result.query, "Query built");
            Ok(Json(result))
        }
        Err(e) => {
            METRICS
                .query_errors_total
                .with_label_values(&[label, e.kind()])
                .inc();
            Err(e.into())
        }
    }
}

pub fn create_axum_app(config: Config) -> Result<Router> {
    let app = App::new(config);
    for (dialect, store) in &app.stores {
        if let Err(e) = store.snapshot() {
            warn!(%dialect, path = %store.path().display(), error = ?e, "Schema not loadable yet");
        }
    }

    Ok(Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/dialects", get(get_dialects))
        .route("/:dialect/datasets", get(get_datasets))
        .route("/:dialect/datasets/:dataset/fields", get(get_fields))
        .route(
            "/:dialect/datasets/:dataset/suggestions",
            get(get_field_suggestions),
        )
        .route("/:dialect/datasets/:dataset/examples", get(get_dataset_examples))
        .route("/:dialect/operators", get(get_operators))
        .route("/:dialect/best_practices", get(get_best_practices))
        .route("/:dialect/examples", get(get_examples))
        .route("/:dialect/query", post(build_query))
        .with_state(Arc::new(app)))
}
