use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconciliationError {
    #[error("Source '{source_name}' is unavailable: {details}")]
    SourceUnavailable {
        source_name: String,
        details: String,
    },

    #[error("Invalid reference entry for {year}-{month:02}: {details}")]
    InvalidReferenceEntry {
        year: i32,
        month: u32,
        details: String,
    },

    #[error("Malformed reference row {row}: {details}")]
    MalformedReferenceRow { row: usize, details: String },

    #[error("Duplicate reference entry for {year}-{month:02}")]
    DuplicateReferenceEntry { year: i32, month: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Run cancelled after {processed} rows")]
    Cancelled { processed: u64 },

    #[error("Aggregation invariant violated: {0}")]
    InvariantViolation(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconciliationError {
    pub fn unavailable(source_name: impl Into<String>, details: impl ToString) -> Self {
        Self::SourceUnavailable {
            source_name: source_name.into(),
            details: details.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconciliationError>;
