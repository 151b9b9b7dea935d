pub mod compiler;
pub mod dataset;
pub mod error;
pub mod expression;
pub mod extract;
pub mod field;
pub mod filter;
pub mod operator;
pub mod patterns;
pub mod plan;
pub mod time_window;
pub mod value;

#[cfg(test)]
mod filter_tests;

pub use compiler::{BuildRequest, Dialect, QueryCompiler, QueryMetadata, QueryResult};
pub use error::TranslateError;
