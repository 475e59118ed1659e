use thiserror::Error;

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Formato no reconocido. Usa las plantillas oficiales. (sheets found: {})", sheets.join(", "))]
    UnrecognizedFormat { sheets: Vec<String> },

    #[error("Error procesando archivo: {0}")]
    Parse(String),

    #[error("Store write failed on '{table}': {message}")]
    StoreWrite { table: String, message: String },

    #[error("Store read failed on '{table}': {message}")]
    StoreRead { table: String, message: String },

    #[error("Upload {upload_id} was partially processed: write to '{table}' failed: {message}")]
    PartialCommit {
        upload_id: String,
        table: String,
        message: String,
    },

    /// Rows were stored but no upload entry could be written for them.
    #[error(
        "{records} records were stored (parent: {}) but the upload entry could not be written: {message}",
        .parent_id.as_deref().unwrap_or("none")
    )]
    UnrecordedCommit {
        parent_id: Option<String>,
        records: usize,
        message: String,
    },

        #[error("No record with id {id} in '{table}'")]
    NotFound { table: String, id: String },

    #[error("Invalid period: {0}")]
    InvalidPeriod(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl IntakeError {
    pub fn store_write(table: &str, message: impl Into<String>) -> Self {
        Self::StoreWrite {
            table: table.to_string(),
            message: message.into(),
        }
    }

    pub fn store_read(table: &str, message: impl Into<String>) -> Self {
        Self::StoreRead {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, IntakeError>;
