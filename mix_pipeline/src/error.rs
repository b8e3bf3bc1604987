use thiserror::Error;

/// Terminal conditions for a single dataset run.
///
/// Malformed cells, unmapped labels and zero-total periods are not errors;
/// they are recovered locally and counted in `Diagnostics`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source for dataset '{dataset}' is unavailable: {reason}")]
    SourceUnavailable { dataset: String, reason: String },
    #[error("source for dataset '{0}' returned no rows")]
    EmptySource(String),
    #[error("column {column} not found (available: {available})")]
    MissingColumn { column: String, available: String },
    #[error("source files disagree on header: {0}")]
    SchemaMismatch(String),
    #[error("invalid taxonomy: {0}")]
    InvalidTaxonomy(String),
    #[error("mapping rule targets unknown category '{0}'")]
    UnknownCategory(String),
    #[error("invalid label pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("dataset '{0}' produced no usable records")]
    NoUsableRecords(String),
}
