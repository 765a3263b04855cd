//! Error taxonomy shared by the store, intake and session layers.
//!
//! Every variant is recoverable per request: callers surface it to the user
//! and the library never leaves a record without its file on the upload path.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReelError {
    /// Empty title or filename, disallowed extension, missing upload field.
    #[error("{0}")]
    Validation(String),

    #[error("video {0} not found")]
    NotFound(i64),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid credentials")]
    AuthRejected,

    /// No administrative credential has been set up yet.
    #[error("no administrative credential configured; run `reel_admin set-credential`")]
    CredentialNotConfigured,

    #[error("database error: {0}")]
    Database(rusqlite::Error),

    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

impl ReelError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<rusqlite::Error> for ReelError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(code, detail)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let detail = detail.unwrap_or_else(|| "constraint violated".into());
                if detail.contains("videos.filename") {
                    Self::Validation("a video with that filename already exists".into())
                } else {
                    Self::Validation(detail)
                }
            }
            other => Self::Database(other),
        }
    }
}

pub type ReelResult<T> = Result<T, ReelError>;
