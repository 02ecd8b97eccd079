use thiserror::Error;

use crate::types::SourceKind;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Required source '{source_kind}' is missing")]
    MissingSource { source_kind: SourceKind },

    #[error("Source '{source_kind}' is malformed: row {row} has {actual} cells, header has {expected}")]
    MalformedSource {
        source_kind: SourceKind,
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Feature '{feature}' already set for customer {unified_id}")]
    FeatureOverwrite { unified_id: u64, feature: String },

    #[error("Invalid state: model has not been trained")]
    ModelNotTrained,

    #[error("Schema mismatch: model expects column '{column}' which is not in the feature table")]
    SchemaMismatch { column: String },

    #[error("Cannot train on an empty feature table")]
    EmptyTrainingSet,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
