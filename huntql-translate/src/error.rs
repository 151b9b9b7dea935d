/// Every way a translation call can fail.
///
/// All variants are caller errors: the engine is deterministic, so repeating
/// the same call reproduces the same failure.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error(
        "Unknown {noun} '{requested}'.{} Valid options: {}",
        did_you_mean(suggestion.as_deref()),
        valid.join(", ")
    )]
    UnknownDataset {
        noun: &'static str,
        requested: String,
        /// The closest known key, when one is near enough to be a typo.
        suggestion: Option<String>,
        valid: Vec<String>,
    },

    #[error("schema declares no {0}")]
    NoDatasets(&'static str),

    #[error("Unknown operator '{0}'")]
    UnknownOperator(String),

    #[error("Field '{field}' is not available for {dataset}")]
    UnknownField { field: String, dataset: String },

    #[error("Filter for field '{0}' is missing a value")]
    MissingValue(String),

    #[error("Field '{field}' expects a numeric value, got '{value}'")]
    TypeMismatch { field: String, value: String },

    #[error("Unsafe characters detected in expression '{expression}': {reason}")]
    UnsafeExpression { expression: String, reason: String },

    #[error("{0}")]
    InsufficientInput(String),

    #[error("Unsupported boolean operator '{0}', expected AND or OR")]
    UnsupportedBooleanOperator(String),

    #[error("Identifier '{0}' contains invalid characters")]
    InvalidIdentifier(String),
}

fn did_you_mean(suggestion: Option<&str>) -> String {
    suggestion
        .map(|key| format!(" Did you mean '{key}'?"))
        .unwrap_or_default()
}

impl TranslateError {
    /// Stable label for metrics and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownDataset { .. } => "unknown_dataset",
            Self::NoDatasets(_) => "no_datasets",
            Self::UnknownOperator(_) => "unknown_operator",
            Self::UnknownField { .. } => "unknown_field",
            Self::MissingValue(_) => "missing_value",
            Self::TypeMismatch { .. } => "type_mismatch",
            Self::UnsafeExpression { .. } => "unsafe_expression",
            Self::InsufficientInput(_) => "insufficient_input",
            Self::UnsupportedBooleanOperator(_) => "unsupported_boolean_operator",
            Self::InvalidIdentifier(_) => "invalid_identifier",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_dataset_lists_valid_keys() {
        let err = TranslateError::UnknownDataset {
            noun: "search type",
            requested: "bogus".to_string(),
            suggestion: None,
            valid: vec!["alert_search".to_string(), "process_search".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown search type 'bogus'. Valid options: alert_search, process_search"
        );
        assert_eq!(err.kind(), "unknown_dataset");
    }

    #[test]
    fn unknown_dataset_suggests_closest_key() {
        let err = TranslateError::UnknownDataset {
            noun: "table",
            requested: "DeviceProcesEvents".to_string(),
            suggestion: Some("DeviceProcessEvents".to_string()),
            valid: vec!["DeviceNetworkEvents".to_string(), "DeviceProcessEvents".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown table 'DeviceProcesEvents'. Did you mean 'DeviceProcessEvents'? \
             Valid options: DeviceNetworkEvents, DeviceProcessEvents"
        );
    }
}
