//! Application error types and result alias.

use thiserror::Error;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Verdict database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Verdict database error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Verdict database error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Verdict database error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Verdict database error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Message bus error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("Object store error: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Object store credentials error: {0}")]
    S3Credentials(#[from] s3::creds::error::CredentialsError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid rule pattern: {0}")]
    Rule(#[from] regex::Error),

    #[error("Analyzer error: {0}")]
    Analyzer(String),

    #[error("Queue closed")]
    QueueClosed,

    #[error("Internal error: {0}")]
    Internal(String),
}
