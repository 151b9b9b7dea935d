use once_cell::sync::Lazy;
use prometheus::{
    HistogramVec, IntCounterVec, exponential_buckets, register_histogram_vec,
    register_int_counter_vec,
};

pub static METRICS: Lazy<Metrics> = Lazy::new(Metrics::default);

pub struct Metrics {
    pub queries_built_total: IntCounterVec,
    pub query_errors_total: IntCounterVec,
    pub query_build_latency: HistogramVec,
    pub schema_reloads_total: IntCounterVec,
}

/// From 10us to roughly 160ms.
fn latency_buckets() -> Vec<f64> {
    exponential_buckets(0.00001, 2.0, 15).expect("valid latency buckets")
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            queries_built_total: register_int_counter_vec!(
                "huntql_queries_built_total",
                "Number of queries successfully built",
                &["dialect"]
            )
            .expect("create queries_built_total"),

            query_errors_total: register_int_counter_vec!(
                "huntql_query_errors_total",
                "Number of failed query builds",
                &["dialect", "kind"]
            )
            .expect("create query_errors_total"),

            query_build_latency: register_histogram_vec!(
                "huntql_query_build_latency",
                "Duration of a single query build in seconds",
                &["dialect"],
                latency_buckets()
            )
            .expect("create query_build_latency"),

            schema_reloads_total: register_int_counter_vec!(
                "huntql_schema_reloads_total",
                "Number of schema snapshot loads",
                &["dialect", "status"]
            )
            .expect("create schema_reloads_total"),
        }
    }
}
