use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("row not found: {0}")]
    NotFound(String),
    #[error("unique index violation on {index}: {value}")]
    UniqueViolation { index: String, value: String },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("transaction conflict, retry")]
    Conflict,
    #[cfg(feature = "store-sqlx")]
    #[error("sql error: {0}")]
    Sql(#[from] sqlx::Error),
    #[error("backend error: {0}")]
    Backend(String),
}
