use thiserror::Error;

/// Why an inbound wire message was skipped.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("empty message")]
    Empty,
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not utf-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unrecognized message: {0}")]
    Unrecognized(String),
}
