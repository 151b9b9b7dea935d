use std::collections::BTreeMap;

use crate::{
    field::FieldMap,
    schema::{DatasetMeta, FieldGroup, OperatorDoc, OperatorVariant, Schema},
};

/// Everything a compiler reads from a dialect's schema.
///
/// Implementations are treated as immutable for the duration of one
/// translation call.
pub trait SchemaProvider {
    fn datasets(&self) -> &BTreeMap<String, DatasetMeta>;

    /// The field map of a dataset, merged over the schema's common fields.
    /// Unknown datasets yield only the common fields.
    fn fields(&self, dataset: &str) -> FieldMap;

    fn operators(&self) -> &[OperatorDoc];

    fn operator_variants(&self) -> &BTreeMap<String, Vec<OperatorVariant>>;

    fn field_groups(&self) -> &BTreeMap<String, FieldGroup>;
}

impl SchemaProvider for Schema {
    fn datasets(&self) -> &BTreeMap<String, DatasetMeta> {
        &self.datasets
    }

    fn fields(&self, dataset: &str) -> FieldMap {
        let mut fields = self.common_fields.clone();
        if let Some(meta) = self.datasets.get(dataset) {
            fields.extend(meta.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        fields
    }

    fn operators(&self) -> &[OperatorDoc] {
        &self.operators
    }

    fn operator_variants(&self) -> &BTreeMap<String, Vec<OperatorVariant>> {
        &self.operator_variants
    }

    fn field_groups(&self) -> &BTreeMap<String, FieldGroup> {
        &self.field_groups
    }
}
