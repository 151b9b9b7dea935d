mod common;

use std::path::PathBuf;

use color_eyre::Result;
use ctor::ctor;
use huntql_server::config::{Config, load_config};
use huntql_translate::Dialect;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

use common::{init_test_tracing, repo_path, spawn_app};

#[ctor]
fn init() {
    init_test_tracing();
}

async fn example_app() -> Result<String> {
    spawn_app(load_config(repo_path("config.example.json"))?).await
}

async fn post_query(base: &str, dialect: &str, body: Value) -> Result<(StatusCode, Value)> {
    let response = Client::new()
        .post(format!("{base}/{dialect}/query"))
        .json(&body)
        .send()
        .await?;
    let status = response.status();
    Ok((status, response.json().await?))
}

async fn get_json(url: String) -> Result<(StatusCode, Value)> {
    let response = Client::new().get(url).send().await?;
    let status = response.status();
    Ok((status, response.json().await?))
}

#[tokio::test]
async fn health_and_dialects() -> Result<()> {
    let base = example_app().await?;

    let health = Client::new().get(format!("{base}/health")).send().await?;
    assert_eq!(health.status(), StatusCode::OK);
    assert_eq!(health.text().await?, "OK");

    let (status, dialects) = get_json(format!("{base}/dialects")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dialects, json!(["xql", "s1ql", "cbc", "kql"]));
    Ok(())
}

#[tokio::test]
async fn build_xql_query() -> Result<()> {
    let base = example_app().await?;

    let (status, body) = post_query(
        &base,
        "xql",
        json!({
            "dataset": "xdr_data",
            "filters": [{"field": "agent_hostname", "operator": "=", "value": "WS-01"}],
            "limit": 5
        }),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["query"],
        "dataset = xdr_data\n\
         | filter agent_hostname = 'WS-01'\n\
         | fields _time, agent_hostname, actor_process_image_name, action_process_image_command_line\n\
         | limit 5"
    );
    assert_eq!(body["metadata"]["dialect"], "xql");
    assert_eq!(body["metadata"]["dataset_display_name"], "XDR Data");
    assert_eq!(body["metadata"]["resolution"], "explicit");
    Ok(())
}

#[tokio::test]
async fn build_kql_query_from_intent() -> Result<()> {
    let base = example_app().await?;

    let (status, body) = post_query(
        &base,
        "defender",
        json!({"natural_language_intent": "connections to 10.1.1.1 in the last 24 hours"}),
    )
    .await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["query"],
        "DeviceNetworkEvents\n\
         | where Timestamp > ago(24h)\n\
         | where RemoteIP == '10.1.1.1'\n\
         | limit 100"
    );
    assert_eq!(body["metadata"]["time_window"], "24h");
    Ok(())
}

#[tokio::test]
async fn translation_errors_are_bad_requests() -> Result<()> {
    let base = example_app().await?;

    let (status, body) = post_query(
        &base,
        "kql",
        json!({"table": "DeviceProcessEvents", "where": ["FileName == 'a'; drop table x"]}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unsafe_expression");

    let (status, body) = post_query(&base, "cbc", json!({"search_type": "bogus"})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unknown_dataset");
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("process_search"))
    );

    let (status, body) = post_query(&base, "s1ql", json!({})).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "insufficient_input");
    Ok(())
}

#[tokio::test]
async fn unknown_dialect_is_not_found() -> Result<()> {
    let base = example_app().await?;
    let (status, body) = post_query(&base, "sql", json!({})).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "dialect 'sql' is not configured");
    Ok(())
}

#[tokio::test]
async fn unloadable_schema_is_a_server_error() -> Result<()> {
    let base = spawn_app(Config::single(
        Dialect::Kql,
        PathBuf::from(repo_path("schemas/does-not-exist.json")),
    ))
    .await?;

    let (status, body) = post_query(&base, "kql", json!({"table": "DeviceProcessEvents"})).await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal server error");

    let (status, _) = post_query(&base, "xql", json!({})).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn schema_introspection() -> Result<()> {
    let base = example_app().await?;

    let (status, datasets) = get_json(format!("{base}/cbc/datasets")).await?;
    assert_eq!(status, StatusCode::OK);
    let process = datasets
        .as_array()
        .and_then(|all| all.iter().find(|d| d["key"] == "process_search"))
        .cloned()
        .unwrap();
    assert_eq!(process["description"], "Process activity events");
    assert_eq!(process["field_count"], 11);

    let (status, fields) =
        get_json(format!("{base}/s1ql/datasets/Network%20Actions/fields")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fields["dataset"], "network_actions");
    assert!(fields["fields"]["dst.port.number"].is_object());
    assert!(fields["fields"]["event.type"].is_object());

    let (status, body) = get_json(format!("{base}/kql/datasets/NoSuchTable/fields")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unknown_dataset");

    let (status, operators) = get_json(format!("{base}/s1ql/operators")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(operators["normalized"]["equals"], "=");
    assert_eq!(operators["documented"][0]["name"], "equals");
    assert!(operators["variants"]["operators_string"].is_array());
    Ok(())
}

#[tokio::test]
async fn dataset_lookups() -> Result<()> {
    let base = example_app().await?;

    let (status, datasets) = get_json(format!("{base}/cbc/datasets?keyword=ALERT")).await?;
    assert_eq!(status, StatusCode::OK);
    let keys: Vec<&Value> = datasets
        .as_array()
        .map(|all| all.iter().map(|d| &d["key"]).collect())
        .unwrap_or_default();
    assert_eq!(keys, vec!["alert_search"]);

    let (status, datasets) = get_json(format!("{base}/kql/datasets?keyword=network")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(datasets.as_array().map(Vec::len), Some(1));

    let (status, body) =
        get_json(format!("{base}/kql/datasets/DeviceNetworkEvents/suggestions?keyword=remote"))
            .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dataset"], "DeviceNetworkEvents");
    let names: Vec<&Value> = body["suggestions"]
        .as_array()
        .map(|all| all.iter().map(|s| &s["name"]).collect())
        .unwrap_or_default();
    assert_eq!(names, vec!["RemoteIP", "RemotePort", "RemoteUrl"]);
    assert_eq!(body["suggestions"][1]["data_type"], "int");

    let (status, body) =
        get_json(format!("{base}/kql/datasets/DeviceProcesEvents/suggestions")).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "unknown_dataset");
    assert!(
        body["error"]
            .as_str()
            .is_some_and(|e| e.contains("Did you mean 'DeviceProcessEvents'?")),
        "{body}"
    );

    let (status, body) =
        get_json(format!("{base}/kql/datasets/DeviceNetworkEvents/examples")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["examples"],
        json!([
            "DeviceNetworkEvents | where RemotePort == 3389 | summarize count() by DeviceName",
            "DeviceNetworkEvents\n| where Timestamp > ago(1d)\n| limit 10",
            "DeviceNetworkEvents\n| where Timestamp > ago(7d)\n| summarize count() by DeviceName\n| order by count_ desc\n| limit 10",
        ])
    );

    let (status, body) = get_json(format!("{base}/cbc/datasets/process/examples")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dataset"], "process_search");
    assert_eq!(body["examples"], json!([]));
    Ok(())
}

#[tokio::test]
async fn guidance_and_example_categories() -> Result<()> {
    let base = example_app().await?;

    let (status, body) = get_json(format!("{base}/cbc/best_practices")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["best_practices"].as_array().map(Vec::len), Some(3));

    let (status, body) = get_json(format!("{base}/xql/best_practices")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["best_practices"], json!([]));

    let (status, body) = get_json(format!("{base}/cbc/examples")).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["examples"]["network"].is_array());
    assert!(body["examples"]["powershell"].is_array());

    let (status, body) = get_json(format!("{base}/cbc/examples?category=network")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["category"], "network");
    assert_eq!(body["examples"][0]["query"], "ipport:4444");

    let (status, body) = get_json(format!("{base}/cbc/examples?category=lateral")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body["error"],
        "Unknown category 'lateral'. Available: network, powershell"
    );
    Ok(())
}

#[tokio::test]
async fn metrics_count_builds() -> Result<()> {
    let base = example_app().await?;
    let (status, _) = post_query(&base, "xql", json!({"dataset": "xdr_data"})).await?;
    assert_eq!(status, StatusCode::OK);

    let metrics = Client::new()
        .get(format!("{base}/metrics"))
        .send()
        .await?
        .text()
        .await?;
    assert!(metrics.contains("huntql_queries_built_total"));
    assert!(metrics.contains("huntql_query_build_latency"));
    Ok(())
}
