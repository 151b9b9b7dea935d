pub mod field;
pub mod load;
pub mod provider;
pub mod schema;

pub use field::{DataType, FieldMap, FieldMeta};
pub use load::{load_schema, parse_schema};
pub use provider::SchemaProvider;
pub use schema::{DatasetMeta, FieldGroup, OperatorDoc, OperatorVariant, Schema};
