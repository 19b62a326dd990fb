use thiserror::Error;

#[derive(Error, Debug)]
pub enum TellerError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule store error: {0}")]
    Store(String),

    #[error("Rule store is locked by another writer")]
    StoreLocked,

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Invalid split: {0}")]
    InvalidSplit(String),

    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Research lookup failed: {0}")]
    Research(String),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TellerError>;
