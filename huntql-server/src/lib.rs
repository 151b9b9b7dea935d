pub mod config;
pub mod http_server;
pub mod humantime_utils;
pub mod metrics;
pub mod schema_store;
