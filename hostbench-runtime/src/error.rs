use thiserror::Error;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("No database is attached to this runtime")]
    NoDatabase,

    #[error("Unsupported database URL: {0}")]
    UnsupportedDatabase(String),

    #[error("HTTP request to {url} was short-circuited ({code}): {message}")]
    HttpShortCircuit {
        url: String,
        code: String,
        message: String,
    },

    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

pub type Result<T> = std::result::Result<T, RuntimeError>;
